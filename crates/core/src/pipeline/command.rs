//! Per-request command state and its wire snapshots.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{CommandError, ImpactAssessment, Stage};
use crate::config::StageDurations;
use crate::interpreter::ProposedChange;
use crate::ticket::{Ticket, TicketQuery};

/// Command lifecycle. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Initializing,
    Processing,
    Complete,
    Error,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Complete | CommandStatus::Error)
    }
}

/// Sigmoid progress for an open stage: `100 * sigmoid((e/E) * 6 - 3)`,
/// never above 99. Reaching 100 is reserved for closing the stage.
pub fn progress_percentage(elapsed: Duration, estimate: Duration) -> u8 {
    if estimate.is_zero() {
        return 99;
    }
    let x = (elapsed.as_secs_f64() / estimate.as_secs_f64()) * 6.0 - 3.0;
    let pct = 100.0 / (1.0 + (-x).exp());
    pct.floor().clamp(0.0, 99.0) as u8
}

#[derive(Debug, Clone)]
struct StageRecord {
    duration: Duration,
    completed: bool,
}

#[derive(Debug, Clone)]
struct OpenStage {
    stage: Stage,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// One natural-language request moving through the pipeline.
///
/// Holds at most one open stage. Closed stage durations are frozen and the
/// terminal elapsed time is their sum.
#[derive(Debug)]
pub struct Command {
    id: String,
    text: String,
    started_at: DateTime<Utc>,
    status: CommandStatus,
    stages: BTreeMap<Stage, StageRecord>,
    current: Option<OpenStage>,
    matched_tickets_count: usize,
    estimates: StageDurations,
}

impl Command {
    pub fn new(text: impl Into<String>, estimates: StageDurations) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            started_at: Utc::now(),
            status: CommandStatus::Initializing,
            stages: BTreeMap::new(),
            current: None,
            matched_tickets_count: 0,
            estimates,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.current.as_ref().map(|open| open.stage)
    }

    /// Stages that have been entered, in order.
    pub fn visited_stages(&self) -> Vec<Stage> {
        self.stages.keys().copied().collect()
    }

    pub fn matched_tickets_count(&self) -> usize {
        self.matched_tickets_count
    }

    pub fn set_matched_tickets_count(&mut self, count: usize) {
        self.matched_tickets_count = count;
    }

    pub fn estimates(&self) -> &StageDurations {
        &self.estimates
    }

    pub fn set_estimates(&mut self, estimates: StageDurations) {
        self.estimates = estimates;
    }

    /// Open `stage`, closing whatever stage is open. Returns the stage that
    /// was force-closed, if any.
    pub fn open_stage(
        &mut self,
        stage: Stage,
        now: Instant,
    ) -> Result<Option<(Stage, Duration)>, CommandError> {
        if self.status.is_terminal() {
            return Err(CommandError::invalid_transition(format!(
                "Command {} already finished",
                self.id
            )));
        }
        if let Some(highest) = self.stages.keys().next_back() {
            if stage < *highest {
                return Err(CommandError::invalid_transition(format!(
                    "Cannot enter stage {} after stage {}",
                    stage.number(),
                    highest.number()
                ))
                .with_details(serde_json::json!({
                    "requested": stage.number(),
                    "highest": highest.number(),
                })));
            }
        }

        let closed = self.close_stage(now);
        if self.status == CommandStatus::Initializing {
            self.status = CommandStatus::Processing;
        }
        self.stages
            .entry(stage)
            .or_insert(StageRecord {
                duration: Duration::ZERO,
                completed: false,
            })
            .completed = false;
        self.current = Some(OpenStage {
            stage,
            started: now,
            started_at: Utc::now(),
        });
        Ok(closed)
    }

    /// Close the open stage, freezing its measured duration.
    pub fn close_stage(&mut self, now: Instant) -> Option<(Stage, Duration)> {
        let open = self.current.take()?;
        let elapsed = now.saturating_duration_since(open.started);
        let record = self.stages.entry(open.stage).or_insert(StageRecord {
            duration: Duration::ZERO,
            completed: false,
        });
        record.duration += elapsed;
        record.completed = true;
        Some((open.stage, elapsed))
    }

    /// Move to a terminal status, closing any open stage first.
    pub fn finish(
        &mut self,
        status: CommandStatus,
        now: Instant,
    ) -> Result<Option<(Stage, Duration)>, CommandError> {
        if self.status.is_terminal() {
            return Err(CommandError::invalid_transition(format!(
                "Command {} already finished as {:?}",
                self.id, self.status
            )));
        }
        if !status.is_terminal() {
            return Err(CommandError::invalid_transition(format!(
                "{:?} is not a terminal status",
                status
            )));
        }
        let closed = self.close_stage(now);
        self.status = status;
        Ok(closed)
    }

    /// Measured milliseconds per stage, 0 for stages never entered.
    pub fn stage_durations_ms(&self) -> [u64; 6] {
        let mut out = [0u64; 6];
        for (stage, record) in &self.stages {
            out[stage.index()] = record.duration.as_millis() as u64;
        }
        out
    }

    pub fn snapshot(&self, now: Instant) -> CommandSnapshot {
        let open_elapsed = self
            .current
            .as_ref()
            .map(|open| now.saturating_duration_since(open.started))
            .unwrap_or_default();

        let stages: Vec<StageSnapshot> = self
            .stages
            .iter()
            .map(|(stage, record)| {
                let is_open = self.current_stage() == Some(*stage);
                let duration = if is_open {
                    record.duration + open_elapsed
                } else {
                    record.duration
                };
                let percentage = if record.completed {
                    100
                } else {
                    progress_percentage(
                        open_elapsed,
                        Duration::from_millis(self.estimates.get(*stage)),
                    )
                };
                StageSnapshot {
                    number: stage.number(),
                    description: stage.description(),
                    duration: duration.as_millis() as u64,
                    completed: record.completed,
                    percentage,
                }
            })
            .collect();

        let current_stage = self.current.as_ref().map(|open| {
            let estimate = Duration::from_millis(self.estimates.get(open.stage));
            CurrentStageSnapshot {
                number: open.stage.number(),
                description: open.stage.description(),
                start_time: open.started_at,
                elapsed: open_elapsed.as_millis() as u64,
                estimated_duration: estimate.as_millis() as u64,
                percentage: progress_percentage(open_elapsed, estimate),
            }
        });

        CommandSnapshot {
            command_id: self.id.clone(),
            status: self.status,
            command: self.text.clone(),
            start_time: self.started_at,
            elapsed: stages.iter().map(|s| s.duration).sum(),
            matched_tickets_count: self.matched_tickets_count,
            stages,
            current_stage,
        }
    }
}

// ============================================================================
// Wire snapshots
// ============================================================================

/// Payload of `command_start` and `command_progress`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSnapshot {
    pub command_id: String,
    pub status: CommandStatus,
    pub command: String,
    pub start_time: DateTime<Utc>,
    /// Milliseconds, summed over the stage entries.
    pub elapsed: u64,
    pub matched_tickets_count: usize,
    pub stages: Vec<StageSnapshot>,
    pub current_stage: Option<CurrentStageSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    pub number: u8,
    pub description: &'static str,
    pub duration: u64,
    pub completed: bool,
    pub percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStageSnapshot {
    pub number: u8,
    pub description: &'static str,
    pub start_time: DateTime<Utc>,
    pub elapsed: u64,
    pub estimated_duration: u64,
    pub percentage: u8,
}

/// What a successful command hands back for admin review.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub query: TicketQuery,
    pub explanation: String,
    pub tickets: Vec<Ticket>,
    pub match_count: usize,
    pub suggested_changes: Vec<ProposedChange>,
    pub impact: Option<ImpactAssessment>,
}

impl CommandResult {
    /// Result for a query that matched nothing.
    pub fn empty(query: TicketQuery, explanation: impl Into<String>) -> Self {
        Self {
            query,
            explanation: explanation.into(),
            tickets: Vec::new(),
            match_count: 0,
            suggested_changes: Vec::new(),
            impact: None,
        }
    }
}

/// Payload of `command_complete`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCompletion {
    #[serde(flatten)]
    pub command: CommandSnapshot,
    pub total_elapsed: u64,
    pub result: CommandResult,
}

/// Payload of `command_error`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailure {
    #[serde(flatten)]
    pub command: CommandSnapshot,
    pub total_elapsed: u64,
    pub error: CommandError,
}
