use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::Stage;

/// Hard upper bound on how many tickets one command may touch.
pub const MAX_MATCHES_HARD_CAP: usize = 25;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("ticketdesk.db")
}

/// Event stream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventsConfig {
    /// Interval between heartbeat pings (milliseconds).
    /// The heartbeat loop itself wakes up twice per interval.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Consecutive missed pings before a client is considered timed out.
    #[serde(default = "default_max_missed_pings")]
    pub max_missed_pings: u32,

    /// Outbound frame buffer per client. A client that falls this far
    /// behind is dropped.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,

    /// Minimum gap between `status` events per client (milliseconds).
    #[serde(default = "default_status_throttle")]
    pub status_throttle_ms: u64,

    /// Minimum gap between `tickets_updated` events per client (milliseconds).
    #[serde(default = "default_tickets_updated_throttle")]
    pub tickets_updated_throttle_ms: u64,
}

fn default_ping_interval() -> u64 {
    30_000
}

fn default_max_missed_pings() -> u32 {
    3
}

fn default_client_buffer() -> usize {
    64
}

fn default_status_throttle() -> u64 {
    1_000
}

fn default_tickets_updated_throttle() -> u64 {
    500
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            max_missed_pings: default_max_missed_pings(),
            client_buffer: default_client_buffer(),
            status_throttle_ms: default_status_throttle(),
            tickets_updated_throttle_ms: default_tickets_updated_throttle(),
        }
    }
}

impl EventsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Silence longer than this means the client is gone.
    pub fn ping_timeout(&self) -> Duration {
        self.ping_interval() * self.max_missed_pings
    }
}

/// Command pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Maximum tickets a single command may match (capped at 25).
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,

    /// Longest accepted command text, in characters.
    #[serde(default = "default_max_command_length")]
    pub max_command_length: usize,

    /// Cadence of `command_progress` emission while a stage is open (milliseconds).
    #[serde(default = "default_progress_tick")]
    pub progress_tick_ms: u64,

    /// Trailing window of telemetry used to seed stage estimates (days).
    #[serde(default = "default_history_window")]
    pub history_window_days: i64,

    /// Upper bound on a single interpreter call (milliseconds).
    #[serde(default = "default_interpreter_timeout")]
    pub interpreter_timeout_ms: u64,

    /// Refuse change sets whose impact assessment is `critical`.
    #[serde(default = "default_block_critical")]
    pub block_critical_impact: bool,

    /// Stage durations used when there is no telemetry history.
    #[serde(default)]
    pub stage_defaults: StageDurations,

    /// Per-ticket additions to the scaled stages.
    #[serde(default)]
    pub ticket_surcharge: TicketSurcharge,
}

fn default_max_matches() -> usize {
    MAX_MATCHES_HARD_CAP
}

fn default_max_command_length() -> usize {
    500
}

fn default_progress_tick() -> u64 {
    100
}

fn default_history_window() -> i64 {
    7
}

fn default_interpreter_timeout() -> u64 {
    30_000
}

fn default_block_critical() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_matches: default_max_matches(),
            max_command_length: default_max_command_length(),
            progress_tick_ms: default_progress_tick(),
            history_window_days: default_history_window(),
            interpreter_timeout_ms: default_interpreter_timeout(),
            block_critical_impact: default_block_critical(),
            stage_defaults: StageDurations::default(),
            ticket_surcharge: TicketSurcharge::default(),
        }
    }
}

impl PipelineConfig {
    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }

    pub fn interpreter_timeout(&self) -> Duration {
        Duration::from_millis(self.interpreter_timeout_ms)
    }
}

/// One duration (milliseconds) per pipeline stage.
///
/// Serialized with `stage_1` .. `stage_6` keys, which is also the wire shape
/// of the historical-average endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct StageDurations {
    pub stage_1: u64,
    pub stage_2: u64,
    pub stage_3: u64,
    pub stage_4: u64,
    pub stage_5: u64,
    pub stage_6: u64,
}

impl Default for StageDurations {
    fn default() -> Self {
        Self {
            stage_1: 500,
            stage_2: 2_000,
            stage_3: 1_000,
            stage_4: 1_500,
            stage_5: 3_000,
            stage_6: 300,
        }
    }
}

impl StageDurations {
    pub fn get(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Understand => self.stage_1,
            Stage::Query => self.stage_2,
            Stage::Find => self.stage_3,
            Stage::Analyze => self.stage_4,
            Stage::Prepare => self.stage_5,
            Stage::Ready => self.stage_6,
        }
    }

    pub fn set(&mut self, stage: Stage, millis: u64) {
        let slot = match stage {
            Stage::Understand => &mut self.stage_1,
            Stage::Query => &mut self.stage_2,
            Stage::Find => &mut self.stage_3,
            Stage::Analyze => &mut self.stage_4,
            Stage::Prepare => &mut self.stage_5,
            Stage::Ready => &mut self.stage_6,
        };
        *slot = millis;
    }

    pub fn to_array(&self) -> [u64; 6] {
        [
            self.stage_1,
            self.stage_2,
            self.stage_3,
            self.stage_4,
            self.stage_5,
            self.stage_6,
        ]
    }
}

/// Per-ticket surcharges (milliseconds) for the stages whose cost grows
/// with the number of matched tickets.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TicketSurcharge {
    #[serde(default = "default_find_surcharge")]
    pub find_ms: u64,
    #[serde(default = "default_analyze_surcharge")]
    pub analyze_ms: u64,
    #[serde(default = "default_prepare_surcharge")]
    pub prepare_ms: u64,
}

fn default_find_surcharge() -> u64 {
    100
}

fn default_analyze_surcharge() -> u64 {
    150
}

fn default_prepare_surcharge() -> u64 {
    100
}

impl Default for TicketSurcharge {
    fn default() -> Self {
        Self {
            find_ms: default_find_surcharge(),
            analyze_ms: default_analyze_surcharge(),
            prepare_ms: default_prepare_surcharge(),
        }
    }
}

impl TicketSurcharge {
    /// Surcharge per ticket for `stage`; zero for fixed-cost stages.
    pub fn per_ticket(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Find => self.find_ms,
            Stage::Analyze => self.analyze_ms,
            Stage::Prepare => self.prepare_ms,
            Stage::Understand | Stage::Query | Stage::Ready => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "ticketdesk.db");
        assert_eq!(config.events.ping_interval_ms, 30_000);
        assert_eq!(config.events.max_missed_pings, 3);
        assert_eq!(config.pipeline.max_matches, 25);
        assert_eq!(config.pipeline.progress_tick_ms, 100);
        assert_eq!(config.pipeline.history_window_days, 7);
        assert!(config.pipeline.block_critical_impact);
    }

    #[test]
    fn test_deserialize_server_section() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_deserialize_with_custom_database_path() {
        let toml = r#"
[database]
path = "/data/desk.sqlite"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "/data/desk.sqlite");
    }

    #[test]
    fn test_deserialize_pipeline_overrides() {
        let toml = r#"
[pipeline]
max_matches = 10
progress_tick_ms = 250

[pipeline.stage_defaults]
stage_1 = 100
stage_2 = 200
stage_3 = 300
stage_4 = 400
stage_5 = 500
stage_6 = 600

[pipeline.ticket_surcharge]
analyze_ms = 75
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pipeline.max_matches, 10);
        assert_eq!(config.pipeline.progress_tick(), Duration::from_millis(250));
        assert_eq!(
            config.pipeline.stage_defaults.to_array(),
            [100, 200, 300, 400, 500, 600]
        );
        assert_eq!(config.pipeline.ticket_surcharge.analyze_ms, 75);
        assert_eq!(config.pipeline.ticket_surcharge.find_ms, 100);
    }

    #[test]
    fn test_ping_timeout_is_interval_times_missed() {
        let events = EventsConfig {
            ping_interval_ms: 1_000,
            max_missed_pings: 3,
            ..Default::default()
        };
        assert_eq!(events.ping_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_stage_durations_get_set() {
        let mut durations = StageDurations::default();
        durations.set(Stage::Analyze, 42);
        assert_eq!(durations.get(Stage::Analyze), 42);
        assert_eq!(durations.stage_4, 42);
    }

    #[test]
    fn test_surcharge_only_for_scaled_stages() {
        let surcharge = TicketSurcharge::default();
        assert_eq!(surcharge.per_ticket(Stage::Find), 100);
        assert_eq!(surcharge.per_ticket(Stage::Analyze), 150);
        assert_eq!(surcharge.per_ticket(Stage::Prepare), 100);
        assert_eq!(surcharge.per_ticket(Stage::Understand), 0);
        assert_eq!(surcharge.per_ticket(Stage::Query), 0);
        assert_eq!(surcharge.per_ticket(Stage::Ready), 0);
    }
}
