use super::{types::Config, ConfigError, MAX_MATCHES_HARD_CAP};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Heartbeat settings are usable
/// - Pipeline limits stay inside their hard bounds
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Event stream validation
    if config.events.ping_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "events.ping_interval_ms must be greater than 0".to_string(),
        ));
    }
    if config.events.max_missed_pings == 0 {
        return Err(ConfigError::ValidationError(
            "events.max_missed_pings must be at least 1".to_string(),
        ));
    }
    if config.events.client_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "events.client_buffer must be greater than 0".to_string(),
        ));
    }

    // Pipeline validation
    let pipeline = &config.pipeline;
    if pipeline.max_matches == 0 || pipeline.max_matches > MAX_MATCHES_HARD_CAP {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.max_matches must be between 1 and {}",
            MAX_MATCHES_HARD_CAP
        )));
    }
    if pipeline.max_command_length == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.max_command_length must be greater than 0".to_string(),
        ));
    }
    if pipeline.progress_tick_ms == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.progress_tick_ms must be greater than 0".to_string(),
        ));
    }
    if pipeline.history_window_days <= 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.history_window_days must be positive".to_string(),
        ));
    }
    if pipeline.stage_defaults.to_array().contains(&0) {
        return Err(ConfigError::ValidationError(
            "pipeline.stage_defaults entries must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, ServerConfig, StageDurations};
    use std::net::IpAddr;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_max_matches_above_cap_fails() {
        let config = Config {
            pipeline: PipelineConfig {
                max_matches: MAX_MATCHES_HARD_CAP + 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_matches"));
    }

    #[test]
    fn test_validate_zero_stage_default_fails() {
        let config = Config {
            pipeline: PipelineConfig {
                stage_defaults: StageDurations {
                    stage_3: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_ping_interval_fails() {
        let mut config = Config::default();
        config.events.ping_interval_ms = 0;
        assert!(validate_config(&config).is_err());
    }
}
