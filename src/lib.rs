//! MoodSnap core - derived analytics for mood snapshot journals
//!
//! The pipeline turns a chronological list of mood snapshots (and optional
//! daily health records) into time-bucketed aggregates: sequencing into a
//! dense daily calendar → per-day levels, sliding averages and volatility →
//! co-occurrence "butterfly" profiles around hashtags, tags, life events and
//! menstrual cycle starts.
//!
//! ## Modules
//!
//! - **Pure pipeline**: `sequencer`, `history`, `butterfly`, `menstrual`, `pipeline`
//! - **Store and scheduling**: `store`, `orchestrator`, `persistence`, `health`

pub mod butterfly;
pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod menstrual;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod sequencer;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::{AnalyticsConfig, DayReduction};
pub use error::AnalyticsError;
pub use health::HealthProvider;
pub use orchestrator::{Orchestrator, RunState};
pub use persistence::{JsonFileStore, MemoryPersistence, Persistence, StoreRecord};
pub use pipeline::{process_record_json, process_snapshot};
pub use store::{DataStore, SnapshotStore, StoreSnapshot};
pub use types::{ButterflyEntry, HealthSnapshot, MoodLevels, MoodSnapshot, ProcessedData};

/// Library version, reported by the CLI and the C ABI
pub const MOODSNAP_VERSION: &str = env!("CARGO_PKG_VERSION");
