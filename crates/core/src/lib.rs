pub mod config;
pub mod events;
pub mod executor;
pub mod interpreter;
pub mod metrics;
pub mod pipeline;
pub mod telemetry;
pub mod testing;
pub mod ticket;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, EventsConfig,
    PipelineConfig, StageDurations,
};
pub use events::{EventHub, EventKind, ServerEvent, Subscription, ThrottleManager};
pub use executor::ChangeExecutor;
pub use interpreter::{
    ChangeProposer, InterpreterError, KeywordChangeProposer, KeywordQueryInterpreter,
    QueryInterpreter,
};
pub use pipeline::{
    CommandError, CommandOrchestrator, CommandOutcome, CommandTimer, ErrorKind, Stage,
};
pub use telemetry::{SqliteTelemetryStore, TelemetryStore};
pub use ticket::{SqliteTicketStore, TicketStore};
