//! Drives a command through the six fixed stages.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use super::{CommandError, CommandResult, CommandTimer, RiskLevel, Stage};
use crate::config::{PipelineConfig, StageDurations, MAX_MATCHES_HARD_CAP};
use crate::events::{EventHub, ServerEvent, StatusPayload};
use crate::interpreter::{ChangeProposal, ChangeProposer, InterpreterError, QueryInterpreter};
use crate::metrics;
use crate::telemetry::TelemetryStore;
use crate::ticket::{Ticket, TicketStore};

/// A finished command as returned to the submitter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub command_id: String,
    pub result: CommandResult,
}

/// Trim and collapse whitespace, rejecting empty or oversized input.
pub fn normalize_command(text: &str, max_length: usize) -> Result<String, CommandError> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(CommandError::invalid_command("Command text is empty"));
    }
    let length = normalized.chars().count();
    if length > max_length {
        return Err(CommandError::invalid_command(format!(
            "Command is {} characters long, the limit is {}",
            length, max_length
        ))
        .with_details(serde_json::json!({ "length": length, "limit": max_length }))
        .with_suggestion("Shorten the command"));
    }
    Ok(normalized)
}

/// Keeps the active-command count right on every exit path.
struct ActiveGuard<'a> {
    orchestrator: &'a CommandOrchestrator,
}

impl<'a> ActiveGuard<'a> {
    fn enter(orchestrator: &'a CommandOrchestrator) -> Self {
        orchestrator.active.fetch_add(1, Ordering::SeqCst);
        metrics::COMMANDS_ACTIVE.inc();
        orchestrator.broadcast_status();
        Self { orchestrator }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.active.fetch_sub(1, Ordering::SeqCst);
        metrics::COMMANDS_ACTIVE.dec();
        self.orchestrator.broadcast_status();
    }
}

/// Runs the command pipeline. Stages within a command are sequential;
/// separate commands run concurrently, each with its own [`CommandTimer`].
pub struct CommandOrchestrator {
    config: PipelineConfig,
    tickets: Arc<dyn TicketStore>,
    telemetry: Arc<dyn TelemetryStore>,
    interpreter: Arc<dyn QueryInterpreter>,
    proposer: Arc<dyn ChangeProposer>,
    hub: EventHub,
    active: AtomicUsize,
}

impl CommandOrchestrator {
    pub fn new(
        config: PipelineConfig,
        tickets: Arc<dyn TicketStore>,
        telemetry: Arc<dyn TelemetryStore>,
        interpreter: Arc<dyn QueryInterpreter>,
        proposer: Arc<dyn ChangeProposer>,
        hub: EventHub,
    ) -> Self {
        Self {
            config,
            tickets,
            telemetry,
            interpreter,
            proposer,
            hub,
            active: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn active_commands(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn max_matches(&self) -> usize {
        self.config.max_matches.clamp(1, MAX_MATCHES_HARD_CAP)
    }

    fn broadcast_status(&self) {
        self.hub.broadcast(&ServerEvent::Status(StatusPayload {
            active_commands: self.active_commands(),
            connected_clients: self.hub.client_count(),
            timestamp: Utc::now(),
        }));
    }

    /// Mean stage durations over the history window, or the defaults.
    pub fn historical_estimates(&self) -> Result<StageDurations, CommandError> {
        let since = Utc::now() - chrono::Duration::days(self.config.history_window_days);
        let averages = self.telemetry.stage_averages(since)?;
        Ok(averages.or_defaults(&self.config.stage_defaults))
    }

    /// Run `text` through all stages. Invalid input is rejected before a
    /// command is opened; every opened command ends with exactly one
    /// terminal event.
    pub async fn execute(&self, text: &str) -> Result<CommandOutcome, CommandError> {
        let text = match normalize_command(text, self.config.max_command_length) {
            Ok(text) => text,
            Err(e) => {
                metrics::COMMANDS_TOTAL.with_label_values(&["rejected"]).inc();
                debug!(error = %e, "Rejected command before start");
                return Err(e);
            }
        };

        let _active = ActiveGuard::enter(self);
        let mut timer = CommandTimer::begin(
            text.clone(),
            self.hub.clone(),
            Arc::clone(&self.telemetry),
            self.config.clone(),
        );
        let command_id = timer.command_id();

        match self.run_stages(&mut timer, &text).await {
            Ok(result) => {
                timer.complete(&result)?;
                Ok(CommandOutcome { command_id, result })
            }
            Err(error) => {
                timer.fail(&error)?;
                Err(error)
            }
        }
    }

    async fn run_stages(
        &self,
        timer: &mut CommandTimer,
        text: &str,
    ) -> Result<CommandResult, CommandError> {
        let limit = self.max_matches();

        // 1. Understand
        timer.start_stage(Stage::Understand)?;
        timer.initialize_estimates(0);
        timer.end_stage();

        // 2. Query
        timer.start_stage(Stage::Query)?;
        let interpretation = self.bounded(self.interpreter.interpret(text)).await?;
        if interpretation.query.filter_count() == 0 {
            return Err(CommandError::ambiguous(
                "The command does not say which tickets to change",
            )
            .with_details(serde_json::json!({ "explanation": interpretation.explanation })));
        }
        if interpretation.estimated_matches > limit {
            return Err(CommandError::too_many_matches(
                interpretation.estimated_matches,
                limit,
            ));
        }
        timer.end_stage();
        timer.initialize_estimates(interpretation.estimated_matches);

        // 3. Find
        timer.start_stage(Stage::Find)?;
        let found = self.tickets.query(&interpretation.query, limit + 1)?;
        if found.len() > limit {
            return Err(CommandError::too_many_matches(found.len(), limit));
        }
        timer.set_matched_tickets(found.len());
        timer.end_stage();

        if found.is_empty() {
            info!("No tickets matched, skipping to review");
            timer.start_stage(Stage::Ready)?;
            let result = CommandResult::empty(
                interpretation.query,
                format!("{}. No tickets matched.", interpretation.explanation),
            );
            timer.end_stage();
            return Ok(result);
        }
        timer.initialize_estimates(found.len());

        // 4. Analyze
        timer.start_stage(Stage::Analyze)?;
        let tickets = analyze(found);
        timer.set_matched_tickets(tickets.len());
        timer.end_stage();

        // 5. Prepare
        timer.start_stage(Stage::Prepare)?;
        let proposal = self.bounded(self.proposer.propose(text, &tickets)).await?;
        self.validate_proposal(&tickets, &proposal)?;
        timer.end_stage();

        // 6. Ready
        timer.start_stage(Stage::Ready)?;
        let result = CommandResult {
            query: interpretation.query,
            explanation: format!("{}. {}", interpretation.explanation, proposal.rationale),
            match_count: tickets.len(),
            tickets,
            suggested_changes: proposal.changes,
            impact: Some(proposal.impact),
        };
        timer.end_stage();
        Ok(result)
    }

    /// Apply the interpreter timeout to one call.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, InterpreterError>>,
    ) -> Result<T, CommandError> {
        let timeout = self.config.interpreter_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(CommandError::from),
            Err(_) => Err(InterpreterError::Timeout(timeout).into()),
        }
    }

    fn validate_proposal(
        &self,
        tickets: &[Ticket],
        proposal: &ChangeProposal,
    ) -> Result<(), CommandError> {
        if proposal.changes.is_empty() {
            return Err(CommandError::insufficient(
                "None of the matched tickets need changes",
            )
            .with_details(serde_json::json!({ "matched": tickets.len() })));
        }

        let matched: HashSet<&str> = tickets.iter().map(|t| t.id.as_str()).collect();
        let mut seen = HashSet::new();
        for change in &proposal.changes {
            if !matched.contains(change.ticket_id.as_str()) {
                return Err(CommandError::inconsistent(format!(
                    "Change targets ticket {} which the command did not match",
                    change.ticket_id
                ))
                .with_details(serde_json::json!({ "ticket_id": change.ticket_id })));
            }
            if !seen.insert(change.ticket_id.as_str()) {
                return Err(CommandError::inconsistent(format!(
                    "Ticket {} has more than one proposed change",
                    change.ticket_id
                ))
                .with_details(serde_json::json!({ "ticket_id": change.ticket_id })));
            }
            if change.updates.is_empty() {
                return Err(CommandError::inconsistent(format!(
                    "Change for ticket {} updates nothing",
                    change.ticket_id
                ))
                .with_details(serde_json::json!({ "ticket_id": change.ticket_id })));
            }
        }

        if proposal.impact.level == RiskLevel::Critical && self.config.block_critical_impact {
            return Err(CommandError::new(
                super::ErrorKind::HighImpactChanges,
                format!("Change set is too risky: {}", proposal.impact.summary),
            )
            .with_details(serde_json::to_value(&proposal.impact).unwrap_or_default()));
        }
        Ok(())
    }
}

/// Deduplicate matched tickets and order them by priority, then id.
fn analyze(tickets: Vec<Ticket>) -> Vec<Ticket> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Ticket> = tickets
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .collect();
    unique.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ErrorKind;
    use crate::testing::fixtures;
    use crate::ticket::{Priority, TicketStatus};

    #[test]
    fn test_normalize_command() {
        assert_eq!(
            normalize_command("  close   all\twaiting\n tickets ", 500).unwrap(),
            "close all waiting tickets"
        );
        assert_eq!(
            normalize_command("   ", 500).unwrap_err().kind,
            ErrorKind::InvalidCommand
        );
        assert_eq!(
            normalize_command(&"x".repeat(501), 500).unwrap_err().kind,
            ErrorKind::InvalidCommand
        );
        assert!(normalize_command(&"x".repeat(500), 500).is_ok());
    }

    #[test]
    fn test_analyze_dedups_and_orders() {
        let tickets = vec![
            fixtures::ticket("T-3", TicketStatus::Open, Priority::Low),
            fixtures::ticket("T-2", TicketStatus::Open, Priority::Urgent),
            fixtures::ticket("T-1", TicketStatus::Open, Priority::Low),
            fixtures::ticket("T-2", TicketStatus::Open, Priority::Urgent),
        ];
        let ids: Vec<String> = analyze(tickets).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["T-2", "T-1", "T-3"]);
    }
}
