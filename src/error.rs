//! Error types for MoodSnap core

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while editing, persisting or processing snapshots
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid snapshot {id}: {reason}")]
    InvalidSnapshot { id: Uuid, reason: String },

    #[error("Duplicate snapshot id: {0}")]
    DuplicateSnapshot(Uuid),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(Uuid),

    #[error("Unsupported store version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Health provider error: {0}")]
    HealthProvider(String),

    #[error("Processing run was cancelled")]
    Cancelled,

    #[error("Aggregation task failed: {0}")]
    TaskFailed(String),
}

impl AnalyticsError {
    /// Cancellation is a normal outcome of a superseded run, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalyticsError::Cancelled)
    }
}
