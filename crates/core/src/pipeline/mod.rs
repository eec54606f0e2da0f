//! The natural-language command pipeline.
//!
//! A command moves through six fixed [`Stage`]s under the control of the
//! [`CommandOrchestrator`]. Each command owns a [`CommandTimer`] that measures
//! its stages, streams `command_*` events to the hub and persists one
//! telemetry row when it ends.

mod command;
mod error;
mod impact;
mod orchestrator;
mod stage;
mod timer;

pub use command::{
    progress_percentage, Command, CommandCompletion, CommandFailure, CommandResult,
    CommandSnapshot, CommandStatus, CurrentStageSnapshot, StageSnapshot,
};
pub use error::{CommandError, ErrorKind};
pub use impact::{ImpactAssessment, RiskLevel};
pub use orchestrator::{normalize_command, CommandOrchestrator, CommandOutcome};
pub use stage::Stage;
pub use timer::CommandTimer;
