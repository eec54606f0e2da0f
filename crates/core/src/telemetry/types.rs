use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StageDurations;
use crate::pipeline::Stage;

/// Append-only record of one finished command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRow {
    pub command_text: String,
    /// Measured duration per stage in milliseconds, 0 when never reached.
    pub stage_durations_ms: [u64; 6],
    pub matched_count: usize,
    pub affected_count: usize,
    /// Whether the command reached `complete`.
    pub accepted: bool,
    pub recorded_at: DateTime<Utc>,
}

impl TelemetryRow {
    pub fn duration_of(&self, stage: Stage) -> u64 {
        self.stage_durations_ms[stage.index()]
    }
}

/// Mean stage durations over a window of telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageAverages {
    /// Mean in milliseconds per stage; `None` when the stage has no samples.
    pub means_ms: [Option<f64>; 6],
    /// Number of rows in the window.
    pub samples: u64,
}

impl StageAverages {
    /// Fill gaps from `defaults`, rounding means to whole milliseconds.
    pub fn or_defaults(&self, defaults: &StageDurations) -> StageDurations {
        let mut out = *defaults;
        for stage in Stage::all() {
            if let Some(mean) = self.means_ms[stage.index()] {
                out.set(stage, mean.round().max(1.0) as u64);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_defaults_fills_missing_stages() {
        let averages = StageAverages {
            means_ms: [Some(120.4), None, Some(80.6), None, None, Some(0.2)],
            samples: 3,
        };
        let defaults = StageDurations::default();
        let merged = averages.or_defaults(&defaults);

        assert_eq!(merged.stage_1, 120);
        assert_eq!(merged.stage_2, defaults.stage_2);
        assert_eq!(merged.stage_3, 81);
        assert_eq!(merged.stage_5, defaults.stage_5);
        // Never rounds down to a zero estimate
        assert_eq!(merged.stage_6, 1);
    }

    #[test]
    fn test_empty_averages_are_defaults() {
        let defaults = StageDurations::default();
        assert_eq!(StageAverages::default().or_defaults(&defaults), defaults);
    }
}
