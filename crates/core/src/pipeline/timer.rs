//! Stage timing, live progress and telemetry for one command.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    Command, CommandCompletion, CommandError, CommandFailure, CommandResult, CommandSnapshot,
    CommandStatus, Stage,
};
use crate::config::{PipelineConfig, StageDurations};
use crate::events::{EventHub, ServerEvent};
use crate::metrics;
use crate::telemetry::{TelemetryRow, TelemetryStore};

/// Per-command progress estimator.
///
/// Owns the [`Command`], drives its stage transitions, broadcasts
/// `command_*` events and writes one telemetry row when the command ends.
/// While a stage is open a spawned ticker re-broadcasts progress at a fixed
/// cadence; the ticker is aborted when the stage closes or the timer drops.
pub struct CommandTimer {
    command: Arc<Mutex<Command>>,
    hub: EventHub,
    telemetry: Arc<dyn TelemetryStore>,
    config: PipelineConfig,
    ticker: Option<JoinHandle<()>>,
    /// Historical (or default) estimates, looked up once.
    base_estimates: Option<StageDurations>,
}

fn lock(command: &Mutex<Command>) -> MutexGuard<'_, Command> {
    command.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CommandTimer {
    /// Open a command for `text` and broadcast `command_start`.
    pub fn begin(
        text: impl Into<String>,
        hub: EventHub,
        telemetry: Arc<dyn TelemetryStore>,
        config: PipelineConfig,
    ) -> Self {
        let command = Command::new(text, config.stage_defaults);
        let snapshot = command.snapshot(Instant::now());
        info!(command_id = %command.id(), text = %command.text(), "Command started");

        let timer = Self {
            command: Arc::new(Mutex::new(command)),
            hub,
            telemetry,
            config,
            ticker: None,
            base_estimates: None,
        };
        timer.hub.broadcast(&ServerEvent::CommandStart(snapshot));
        timer
    }

    pub fn command_id(&self) -> String {
        lock(&self.command).id().to_string()
    }

    pub fn status(&self) -> CommandStatus {
        lock(&self.command).status()
    }

    pub fn current_stage(&self) -> Option<Stage> {
        lock(&self.command).current_stage()
    }

    pub fn estimates(&self) -> StageDurations {
        *lock(&self.command).estimates()
    }

    pub fn snapshot(&self) -> CommandSnapshot {
        lock(&self.command).snapshot(Instant::now())
    }

    pub fn set_matched_tickets(&self, count: usize) {
        lock(&self.command).set_matched_tickets_count(count);
    }

    /// Seed stage estimates from recent history and scale the
    /// ticket-dependent stages by `ticket_count`.
    pub fn initialize_estimates(&mut self, ticket_count: usize) {
        let base = match self.base_estimates {
            Some(base) => base,
            None => {
                let base = self.historical_estimates();
                self.base_estimates = Some(base);
                base
            }
        };

        let mut estimates = base;
        for stage in Stage::all() {
            let surcharge = self.config.ticket_surcharge.per_ticket(stage) * ticket_count as u64;
            estimates.set(stage, base.get(stage) + surcharge);
        }
        lock(&self.command).set_estimates(estimates);
    }

    fn historical_estimates(&self) -> StageDurations {
        let since = Utc::now() - chrono::Duration::days(self.config.history_window_days);
        match self.telemetry.stage_averages(since) {
            Ok(averages) => averages.or_defaults(&self.config.stage_defaults),
            Err(e) => {
                warn!(error = %e, "Failed to load stage history, using defaults");
                self.config.stage_defaults
            }
        }
    }

    /// Close any open stage and open `stage`.
    pub fn start_stage(&mut self, stage: Stage) -> Result<(), CommandError> {
        self.stop_ticker();
        let now = Instant::now();
        let snapshot = {
            let mut command = lock(&self.command);
            if let Some((closed, elapsed)) = command.open_stage(stage, now)? {
                record_stage(closed, elapsed);
            }
            command.snapshot(now)
        };
        debug!(command_id = %snapshot.command_id, stage = stage.label(), "Stage started");

        self.hub.broadcast(&ServerEvent::CommandProgress(snapshot));
        self.start_ticker();
        Ok(())
    }

    /// Close the open stage at 100% and return its measured duration.
    pub fn end_stage(&mut self) -> Option<Duration> {
        self.stop_ticker();
        let now = Instant::now();
        let (closed, snapshot) = {
            let mut command = lock(&self.command);
            let closed = command.close_stage(now)?;
            (closed, command.snapshot(now))
        };
        record_stage(closed.0, closed.1);
        debug!(
            command_id = %snapshot.command_id,
            stage = closed.0.label(),
            duration_ms = closed.1.as_millis() as u64,
            "Stage finished"
        );

        self.hub.broadcast(&ServerEvent::CommandProgress(snapshot));
        Some(closed.1)
    }

    fn start_ticker(&mut self) {
        let command = Arc::clone(&self.command);
        let hub = self.hub.clone();
        let tick = self.config.progress_tick().max(Duration::from_millis(1));

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let snapshot = {
                    let command = lock(&command);
                    if command.current_stage().is_none() {
                        break;
                    }
                    command.snapshot(Instant::now())
                };
                hub.broadcast(&ServerEvent::CommandProgress(snapshot));
            }
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    /// Whether a progress ticker is currently armed.
    pub fn is_ticking(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Finish successfully and broadcast `command_complete`.
    pub fn complete(&mut self, result: &CommandResult) -> Result<CommandCompletion, CommandError> {
        let snapshot = self.finish(CommandStatus::Complete)?;
        self.save(
            snapshot.matched_tickets_count,
            result.suggested_changes.len(),
            true,
        );

        let completion = CommandCompletion {
            total_elapsed: snapshot.elapsed,
            command: snapshot,
            result: result.clone(),
        };
        metrics::COMMANDS_TOTAL.with_label_values(&["complete"]).inc();
        info!(
            command_id = %completion.command.command_id,
            elapsed_ms = completion.total_elapsed,
            matched = completion.result.match_count,
            changes = completion.result.suggested_changes.len(),
            "Command complete"
        );

        self.hub
            .broadcast(&ServerEvent::CommandComplete(Box::new(completion.clone())));
        Ok(completion)
    }

    /// Finish with `error` and broadcast `command_error`.
    pub fn fail(&mut self, error: &CommandError) -> Result<CommandFailure, CommandError> {
        let snapshot = self.finish(CommandStatus::Error)?;
        self.save(snapshot.matched_tickets_count, 0, false);

        let failure = CommandFailure {
            total_elapsed: snapshot.elapsed,
            command: snapshot,
            error: error.clone(),
        };
        metrics::COMMANDS_TOTAL.with_label_values(&["error"]).inc();
        metrics::COMMAND_ERRORS
            .with_label_values(&[error.kind.as_str()])
            .inc();
        warn!(
            command_id = %failure.command.command_id,
            kind = %error.kind,
            error = %error.message,
            "Command failed"
        );

        self.hub
            .broadcast(&ServerEvent::CommandError(Box::new(failure.clone())));
        Ok(failure)
    }

    fn finish(&mut self, status: CommandStatus) -> Result<CommandSnapshot, CommandError> {
        self.stop_ticker();
        let now = Instant::now();
        let mut command = lock(&self.command);
        if let Some((closed, elapsed)) = command.finish(status, now)? {
            record_stage(closed, elapsed);
        }
        Ok(command.snapshot(now))
    }

    /// Append the telemetry row. Failures are logged, never returned.
    pub fn save(&self, matched: usize, affected: usize, accepted: bool) {
        let row = {
            let command = lock(&self.command);
            TelemetryRow {
                command_text: command.text().to_string(),
                stage_durations_ms: command.stage_durations_ms(),
                matched_count: matched,
                affected_count: affected,
                accepted,
                recorded_at: Utc::now(),
            }
        };

        if let Err(e) = self.telemetry.append(&row) {
            metrics::TELEMETRY_SAVE_FAILURES.inc();
            warn!(error = %e, "Failed to save command telemetry");
        }
    }
}

fn record_stage(stage: Stage, elapsed: Duration) {
    metrics::STAGE_DURATION
        .with_label_values(&[stage.label()])
        .observe(elapsed.as_secs_f64());
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        self.stop_ticker();
        if !self.status().is_terminal() {
            let error = CommandError::internal("Command was abandoned before it finished");
            let _ = self.fail(&error);
        }
    }
}
