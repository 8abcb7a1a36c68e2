//! Store persistence
//!
//! The whole store is saved as one versioned JSON record. Saving writes the
//! primary file and every mirror (the shared app-group container read by
//! widgets). Failures are reported to the caller, who treats them as
//! non-fatal: in-memory state stays authoritative until the next load.

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::error::AnalyticsError;
use crate::types::{HealthSnapshot, MoodSnapshot, ProcessedData, SnapType};

/// Newest store record version this crate reads and writes
pub const STORE_VERSION: u32 = 1;

/// Default file name inside a storage directory
pub const STORE_FILE_NAME: &str = "data.json";

const INTRO_NOTE: &str = "Welcome to MoodSnap! Record how you feel with the + button. \
Add #hashtags to your notes to see how they relate to your mood.";

/// Versioned on-disk record of the whole store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: Uuid,
    #[serde(default)]
    pub version: u32,
    /// App settings and UI state the pipeline does not read
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub mood_snapshots: Vec<MoodSnapshot>,
    #[serde(default)]
    pub health_snapshots: Vec<HealthSnapshot>,
    #[serde(default)]
    pub processed_data: ProcessedData,
}

impl StoreRecord {
    /// Fresh record seeded with the introductory note
    pub fn fresh() -> Self {
        Self {
            id: Uuid::new_v4(),
            version: STORE_VERSION,
            settings: serde_json::Value::Null,
            mood_snapshots: vec![make_intro_snapshot()],
            health_snapshots: Vec::new(),
            processed_data: ProcessedData::default(),
        }
    }

    /// Parse a record and bring it to the current version
    pub fn from_json(json: &str) -> Result<Self, AnalyticsError> {
        let record: StoreRecord = serde_json::from_str(json)?;
        record.migrate()
    }

    pub fn to_json(&self) -> Result<String, AnalyticsError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Upgrade older records; records from a newer version are rejected
    pub fn migrate(mut self) -> Result<Self, AnalyticsError> {
        if self.version > STORE_VERSION {
            return Err(AnalyticsError::UnsupportedVersion {
                found: self.version,
                supported: STORE_VERSION,
            });
        }
        if self.version == 0 {
            // Unversioned records predate processed data being stored
            self.processed_data = ProcessedData::default();
            self.version = STORE_VERSION;
        }
        Ok(self)
    }
}

/// Introductory note shown in an empty store
pub fn make_intro_snapshot() -> MoodSnapshot {
    MoodSnapshot {
        snap_type: SnapType::Note,
        notes: INTRO_NOTE.to_string(),
        ..MoodSnapshot::new(Utc::now())
    }
}

/// Trait for durable storage of the store record
pub trait Persistence: Send + Sync {
    /// Load the record; `Ok(None)` when nothing has been saved yet
    fn load(&self) -> Result<Option<StoreRecord>, AnalyticsError>;

    fn save(&self, record: &StoreRecord) -> Result<(), AnalyticsError>;
}

/// Load the stored record, falling back to a fresh seeded one when it is
/// missing or unreadable.
pub fn load_or_default(persistence: &dyn Persistence) -> StoreRecord {
    match persistence.load() {
        Ok(Some(record)) => record,
        Ok(None) => {
            debug!("no saved store, starting fresh");
            StoreRecord::fresh()
        }
        Err(e) => {
            warn!("failed to load store, starting fresh: {e}");
            StoreRecord::fresh()
        }
    }
}

/// JSON file storage with optional mirror files
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    primary: PathBuf,
    mirrors: Vec<PathBuf>,
}

impl JsonFileStore {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            mirrors: Vec::new(),
        }
    }

    /// Also write every save to `path`
    pub fn with_mirror(mut self, path: impl Into<PathBuf>) -> Self {
        self.mirrors.push(path.into());
        self
    }

    /// Store in `dir/data.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORE_FILE_NAME))
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    fn write_atomic(path: &Path, contents: &str) -> Result<(), AnalyticsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Persistence for JsonFileStore {
    fn load(&self) -> Result<Option<StoreRecord>, AnalyticsError> {
        let json = match fs::read_to_string(&self.primary) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        StoreRecord::from_json(&json).map(Some)
    }

    fn save(&self, record: &StoreRecord) -> Result<(), AnalyticsError> {
        let json = record.to_json()?;
        let mut failures = Vec::new();

        for path in std::iter::once(&self.primary).chain(self.mirrors.iter()) {
            if let Err(e) = Self::write_atomic(path, &json) {
                failures.push(format!("{}: {}", path.display(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AnalyticsError::Persistence(failures.join("; ")))
        }
    }
}

/// In-memory storage for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    record: Mutex<Option<StoreRecord>>,
    saves: Mutex<usize>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: StoreRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            saves: Mutex::new(0),
        }
    }

    /// Most recently saved record
    pub fn saved(&self) -> Option<StoreRecord> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Option<StoreRecord>, AnalyticsError> {
        Ok(self.saved())
    }

    fn save(&self, record: &StoreRecord) -> Result<(), AnalyticsError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
