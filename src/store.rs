//! Snapshot store
//!
//! `SnapshotStore` is the single writer of mood and health snapshots.
//! Processing never reads it directly: every run works on an immutable
//! `StoreSnapshot` frozen when the run starts.
//!
//! `DataStore` is the app-facing object. Every mutation goes through it and
//! explicitly restarts processing; there is no hidden change observation.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use log::{debug, warn};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::error::AnalyticsError;
use crate::health::{fetch_or_empty, HealthProvider};
use crate::orchestrator::{Orchestrator, RunState};
use crate::persistence::{load_or_default, Persistence, StoreRecord, STORE_VERSION};
use crate::sequencer::day_range;
use crate::types::{HealthSnapshot, MoodSnapshot, ProcessedData};

fn order_key(snapshot: &MoodSnapshot) -> (DateTime<Utc>, Uuid) {
    (snapshot.timestamp, snapshot.id)
}

/// Immutable view of the store taken at run start
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub store_id: Uuid,
    /// Store revision this view was frozen at
    pub revision: u64,
    pub settings: serde_json::Value,
    /// Sorted by (timestamp, id)
    pub mood_snapshots: Vec<MoodSnapshot>,
    /// Sorted by date
    pub health_snapshots: Vec<HealthSnapshot>,
}

impl StoreSnapshot {
    pub fn from_record(record: &StoreRecord) -> Self {
        let mut mood_snapshots = record.mood_snapshots.clone();
        mood_snapshots.sort_by_key(order_key);
        let mut health_snapshots = record.health_snapshots.clone();
        health_snapshots.sort_by_key(|h| h.date);

        Self {
            store_id: record.id,
            revision: 0,
            settings: record.settings.clone(),
            mood_snapshots,
            health_snapshots,
        }
    }

    /// Record to persist, carrying the last published processed data
    pub fn to_record(&self, processed: &ProcessedData) -> StoreRecord {
        StoreRecord {
            id: self.store_id,
            version: STORE_VERSION,
            settings: self.settings.clone(),
            mood_snapshots: self.mood_snapshots.clone(),
            health_snapshots: self.health_snapshots.clone(),
            processed_data: processed.clone(),
        }
    }
}

/// Ordered collection of mood and health snapshots
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    id: Uuid,
    settings: serde_json::Value,
    mood: Vec<MoodSnapshot>,
    health: Vec<HealthSnapshot>,
    revision: u64,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Empty store with a fresh identifier
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            settings: serde_json::Value::Null,
            mood: Vec::new(),
            health: Vec::new(),
            revision: 0,
        }
    }

    /// Rebuild a store from a loaded record.
    ///
    /// Loading is lenient: snapshots with a duplicate id or invalid levels
    /// are dropped with a warning instead of failing the whole load.
    pub fn from_record(record: &StoreRecord) -> Self {
        let mut store = Self {
            id: record.id,
            settings: record.settings.clone(),
            ..Self::new()
        };
        for snapshot in &record.mood_snapshots {
            if let Err(e) = store.insert(snapshot.clone()) {
                warn!("dropping stored snapshot: {e}");
            }
        }
        store.set_health_snapshots(record.health_snapshots.clone());
        store.revision = 0;
        store
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Incremented on every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn mood_snapshots(&self) -> &[MoodSnapshot] {
        &self.mood
    }

    pub fn health_snapshots(&self) -> &[HealthSnapshot] {
        &self.health
    }

    pub fn settings(&self) -> &serde_json::Value {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: serde_json::Value) {
        self.settings = settings;
        self.revision += 1;
    }

    pub fn len(&self) -> usize {
        self.mood.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mood.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&MoodSnapshot> {
        self.mood.iter().find(|s| s.id == id)
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.mood.iter().position(|s| s.id == id)
    }

    fn insert_sorted(&mut self, snapshot: MoodSnapshot) {
        let key = order_key(&snapshot);
        let at = self.mood.partition_point(|s| order_key(s) < key);
        self.mood.insert(at, snapshot);
    }

    /// Add a new snapshot
    pub fn insert(&mut self, snapshot: MoodSnapshot) -> Result<(), AnalyticsError> {
        snapshot.validate()?;
        if self.position(snapshot.id).is_some() {
            return Err(AnalyticsError::DuplicateSnapshot(snapshot.id));
        }
        self.insert_sorted(snapshot);
        self.revision += 1;
        Ok(())
    }

    /// Replace the snapshot with the same id, keeping the order invariant
    pub fn update(&mut self, snapshot: MoodSnapshot) -> Result<(), AnalyticsError> {
        snapshot.validate()?;
        let at = self
            .position(snapshot.id)
            .ok_or(AnalyticsError::SnapshotNotFound(snapshot.id))?;
        self.mood.remove(at);
        self.insert_sorted(snapshot);
        self.revision += 1;
        Ok(())
    }

    pub fn remove(&mut self, id: Uuid) -> Result<MoodSnapshot, AnalyticsError> {
        let at = self.position(id).ok_or(AnalyticsError::SnapshotNotFound(id))?;
        self.revision += 1;
        Ok(self.mood.remove(at))
    }

    /// Replace every health record
    pub fn set_health_snapshots(&mut self, mut snapshots: Vec<HealthSnapshot>) {
        snapshots.sort_by_key(|h| h.date);
        self.health = snapshots;
        self.revision += 1;
    }

    /// First and last local day with a mood snapshot
    pub fn day_range(&self, offset: FixedOffset) -> Option<(NaiveDate, NaiveDate)> {
        day_range(&self.mood, offset)
    }

    /// Freeze the current contents for a processing run
    pub fn freeze(&self) -> Arc<StoreSnapshot> {
        Arc::new(StoreSnapshot {
            store_id: self.id,
            revision: self.revision,
            settings: self.settings.clone(),
            mood_snapshots: self.mood.clone(),
            health_snapshots: self.health.clone(),
        })
    }
}

/// App-facing store: snapshot editing plus background processing
pub struct DataStore {
    store: SnapshotStore,
    orchestrator: Orchestrator,
}

impl DataStore {
    /// Load the store from `persistence` and start the first processing run.
    ///
    /// Load failures fall back to a fresh store seeded with the introductory
    /// note.
    pub fn open(
        persistence: Arc<dyn Persistence>,
        config: AnalyticsConfig,
        handle: Handle,
    ) -> Result<Self, AnalyticsError> {
        let record = load_or_default(persistence.as_ref());
        let store = SnapshotStore::from_record(&record);
        debug!("opened store {} with {} snapshots", store.id(), store.len());

        let orchestrator = Orchestrator::new(handle, config, persistence, record.processed_data)?;
        let data_store = Self { store, orchestrator };
        data_store.process();
        Ok(data_store)
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &AnalyticsConfig {
        self.orchestrator.config()
    }

    /// Restart processing over the current contents; returns the run id
    pub fn process(&self) -> u64 {
        self.orchestrator.start(self.store.freeze())
    }

    pub fn add_snapshot(&mut self, snapshot: MoodSnapshot) -> Result<u64, AnalyticsError> {
        self.store.insert(snapshot)?;
        Ok(self.process())
    }

    pub fn update_snapshot(&mut self, snapshot: MoodSnapshot) -> Result<u64, AnalyticsError> {
        self.store.update(snapshot)?;
        Ok(self.process())
    }

    pub fn delete_snapshot(&mut self, id: Uuid) -> Result<u64, AnalyticsError> {
        self.store.remove(id)?;
        Ok(self.process())
    }

    pub fn set_settings(&mut self, settings: serde_json::Value) -> u64 {
        self.store.set_settings(settings);
        self.process()
    }

    /// Fetch health records over the recorded day range and restart
    /// processing. Provider failures leave the store with no health data.
    pub async fn refresh_health(
        &mut self,
        provider: Arc<dyn HealthProvider>,
    ) -> Result<u64, AnalyticsError> {
        let snapshots = match self.store.day_range(self.config().offset()) {
            Some((first, last)) => self
                .orchestrator
                .handle()
                .spawn_blocking(move || fetch_or_empty(provider.as_ref(), first..=last))
                .await
                .map_err(|e| AnalyticsError::TaskFailed(e.to_string()))?,
            None => Vec::new(),
        };
        debug!("refreshed {} health records", snapshots.len());

        self.store.set_health_snapshots(snapshots);
        Ok(self.process())
    }

    /// Last published processed data
    pub fn processed(&self) -> Arc<ProcessedData> {
        self.orchestrator.processed()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ProcessedData>> {
        self.orchestrator.subscribe()
    }

    /// Wait for the current run to complete or be cancelled
    pub async fn settled(&self) -> RunState {
        self.orchestrator.settled().await
    }
}
