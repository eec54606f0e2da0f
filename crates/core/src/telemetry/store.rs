use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{StageAverages, TelemetryRow};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Trait for the historical-timing store.
pub trait TelemetryStore: Send + Sync {
    /// Append a row, returns the assigned ID.
    fn append(&self, row: &TelemetryRow) -> Result<i64, TelemetryError>;

    /// Per-stage mean durations over rows recorded at or after `since`.
    /// Stages that were never reached (duration 0) do not count as samples.
    fn stage_averages(&self, since: DateTime<Utc>) -> Result<StageAverages, TelemetryError>;

    /// Most recent rows, newest first.
    fn recent(&self, limit: i64) -> Result<Vec<TelemetryRow>, TelemetryError>;
}
