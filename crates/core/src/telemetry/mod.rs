//! Historical stage timings.
//!
//! Every finished command appends one [`TelemetryRow`]. Rows are never
//! updated or deleted; their per-stage means seed the estimates of future
//! commands.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteTelemetryStore;
pub use store::{TelemetryError, TelemetryStore};
pub use types::{StageAverages, TelemetryRow};
