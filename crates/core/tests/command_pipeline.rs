//! Command pipeline integration tests.
//!
//! These tests drive whole commands through the orchestrator against a
//! SQLite helpdesk and watch the event stream a subscribed client sees:
//! command_start -> command_progress* -> command_complete | command_error

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tempfile::TempDir;

use ticketdesk_core::{
    events::Subscription,
    interpreter::InterpreterError,
    pipeline::{ImpactAssessment, RiskLevel},
    testing::{fixtures, MockChangeProposer, MockQueryInterpreter},
    ticket::{ApprovedChange, Priority, TicketQuery, TicketStatus, TicketUpdates},
    ChangeExecutor, ChangeProposer, CommandOrchestrator, ErrorKind, EventHub, EventsConfig,
    KeywordChangeProposer, KeywordQueryInterpreter, PipelineConfig, QueryInterpreter,
    SqliteTelemetryStore, SqliteTicketStore, TelemetryStore, TicketStore,
};

/// Test helper holding the stores, the hub and a seeded helpdesk.
struct TestHarness {
    tickets: Arc<SqliteTicketStore>,
    telemetry: Arc<SqliteTelemetryStore>,
    hub: EventHub,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let tickets =
            Arc::new(SqliteTicketStore::new(&db_path).expect("Failed to create ticket store"));
        let telemetry = Arc::new(
            SqliteTelemetryStore::new(&db_path).expect("Failed to create telemetry store"),
        );
        fixtures::seed_helpdesk(tickets.as_ref());

        let hub = EventHub::new(EventsConfig {
            client_buffer: 4096,
            ..Default::default()
        });

        Self {
            tickets,
            telemetry,
            hub,
            _temp_dir: temp_dir,
        }
    }

    fn orchestrator_with(
        &self,
        config: PipelineConfig,
        interpreter: Arc<dyn QueryInterpreter>,
        proposer: Arc<dyn ChangeProposer>,
    ) -> CommandOrchestrator {
        CommandOrchestrator::new(
            config,
            self.tickets.clone(),
            self.telemetry.clone(),
            interpreter,
            proposer,
            self.hub.clone(),
        )
    }

    fn keyword_orchestrator(&self) -> CommandOrchestrator {
        self.orchestrator_with(
            PipelineConfig::default(),
            Arc::new(KeywordQueryInterpreter::with_store(self.tickets.clone())),
            Arc::new(KeywordChangeProposer::new()),
        )
    }
}

/// Collect every frame already delivered to `sub`, as (event name, payload).
async fn drain(sub: &mut Subscription) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(20), sub.next()).await
    {
        let data: Value = serde_json::from_str(&frame.data).expect("frame is JSON");
        out.push((frame.event.to_string(), data));
    }
    out
}

fn named<'a>(frames: &'a [(String, Value)], event: &str) -> Vec<&'a Value> {
    frames
        .iter()
        .filter(|(name, _)| name == event)
        .map(|(_, data)| data)
        .collect()
}

fn stage_numbers(payload: &Value) -> Vec<u64> {
    payload["stages"]
        .as_array()
        .expect("stages array")
        .iter()
        .map(|s| s["number"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_close_all_waiting_tickets() {
    let harness = TestHarness::new();
    let mut sub = harness.hub.subscribe("admin").unwrap();
    let orchestrator = harness.keyword_orchestrator();

    let outcome = orchestrator
        .execute("close all waiting tickets")
        .await
        .expect("command should complete");

    assert_eq!(
        outcome.result.query,
        TicketQuery::default().with_status(TicketStatus::Waiting)
    );
    assert_eq!(outcome.result.match_count, 3);
    assert_eq!(outcome.result.suggested_changes.len(), 3);
    let impact = outcome.result.impact.as_ref().unwrap();
    assert_eq!(impact.status_flips, 3);
    assert_eq!(impact.level, RiskLevel::Medium);

    // Analyze orders by priority: high, medium, low
    let priorities: Vec<Priority> = outcome.result.tickets.iter().map(|t| t.priority).collect();
    assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);

    let frames = drain(&mut sub).await;
    let start = named(&frames, "command_start");
    assert_eq!(start.len(), 1);
    assert_eq!(start[0]["commandId"], outcome.command_id.as_str());

    // The progress event that closes stage 3 carries the match count
    let find_done = named(&frames, "command_progress")
        .into_iter()
        .find(|p| {
            p["currentStage"].is_null()
                && p["stages"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .any(|s| s["number"] == 3 && s["completed"] == true)
        })
        .expect("stage 3 completion event");
    assert_eq!(find_done["matchedTicketsCount"], 3);

    let complete = named(&frames, "command_complete");
    assert_eq!(complete.len(), 1);
    let complete = complete[0];
    assert_eq!(complete["status"], "complete");
    assert_eq!(stage_numbers(complete), vec![1, 2, 3, 4, 5, 6]);
    let sum: u64 = complete["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["duration"].as_u64().unwrap())
        .sum();
    assert_eq!(complete["totalElapsed"].as_u64().unwrap(), sum);
    assert_eq!(complete["result"]["suggestedChanges"].as_array().unwrap().len(), 3);
    assert_eq!(complete["result"]["impact"]["statusFlips"], 3);
    assert!(named(&frames, "command_error").is_empty());

    // Nothing was mutated by the pipeline itself
    let still_waiting = harness
        .tickets
        .query(&TicketQuery::default().with_status(TicketStatus::Waiting), 25)
        .unwrap();
    assert_eq!(still_waiting.len(), 3);

    let rows = harness.telemetry.recent(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].accepted);
    assert_eq!(rows[0].matched_count, 3);
    assert_eq!(rows[0].affected_count, 3);
}

#[tokio::test]
async fn test_empty_command_never_starts() {
    let harness = TestHarness::new();
    let mut sub = harness.hub.subscribe("admin").unwrap();
    let orchestrator = harness.keyword_orchestrator();

    let err = orchestrator.execute("   \n\t ").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidCommand);

    let frames = drain(&mut sub).await;
    assert!(named(&frames, "command_start").is_empty());
    assert!(named(&frames, "command_error").is_empty());
    assert!(harness
        .telemetry
        .recent(10)
        .unwrap()
        .iter()
        .all(|row| !row.accepted));
    assert_eq!(orchestrator.active_commands(), 0);
}

#[tokio::test]
async fn test_zero_matches_skip_to_review() {
    let harness = TestHarness::new();
    let mut sub = harness.hub.subscribe("admin").unwrap();
    let proposer = Arc::new(MockChangeProposer::new());
    let orchestrator = harness.orchestrator_with(
        PipelineConfig::default(),
        Arc::new(KeywordQueryInterpreter::with_store(harness.tickets.clone())),
        proposer.clone(),
    );

    let outcome = orchestrator
        .execute("close tickets assigned to nobody-here")
        .await
        .unwrap();
    assert_eq!(outcome.result.match_count, 0);
    assert!(outcome.result.suggested_changes.is_empty());
    assert!(proposer.calls().await.is_empty());

    let frames = drain(&mut sub).await;
    let complete = named(&frames, "command_complete")[0];
    assert_eq!(stage_numbers(complete), vec![1, 2, 3, 6]);
    assert_eq!(complete["result"]["matchCount"], 0);

    let rows = harness.telemetry.recent(1).unwrap();
    assert_eq!(rows[0].stage_durations_ms[3], 0);
    assert_eq!(rows[0].stage_durations_ms[4], 0);
}

#[tokio::test]
async fn test_estimate_over_cap_fails_before_find() {
    let harness = TestHarness::new();
    let mut sub = harness.hub.subscribe("admin").unwrap();
    let interpreter = Arc::new(MockQueryInterpreter::new());
    interpreter
        .set_interpretation(TicketQuery::default().with_status(TicketStatus::Open), 40)
        .await;
    let orchestrator = harness.orchestrator_with(
        PipelineConfig::default(),
        interpreter,
        Arc::new(MockChangeProposer::new()),
    );

    let err = orchestrator.execute("close every open ticket").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TooManyMatches);
    assert_eq!(err.details["found"], 40);

    let frames = drain(&mut sub).await;
    let error = named(&frames, "command_error")[0];
    assert_eq!(error["error"]["kind"], "too_many_matches");
    assert_eq!(stage_numbers(error), vec![1, 2]);

    let rows = harness.telemetry.recent(1).unwrap();
    assert!(!rows[0].accepted);
    assert_eq!(rows[0].stage_durations_ms[2], 0);
}

#[tokio::test]
async fn test_actual_matches_over_cap() {
    let harness = TestHarness::new();
    let interpreter = Arc::new(MockQueryInterpreter::new());
    // The interpreter underestimates; the store finds more than allowed
    interpreter
        .set_interpretation(TicketQuery::default().with_status(TicketStatus::Waiting), 1)
        .await;
    let config = PipelineConfig {
        max_matches: 2,
        ..Default::default()
    };
    let orchestrator =
        harness.orchestrator_with(config, interpreter, Arc::new(MockChangeProposer::new()));

    let err = orchestrator.execute("close waiting tickets").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TooManyMatches);
    assert_eq!(err.details["limit"], 2);
}

#[tokio::test]
async fn test_command_without_filters_is_ambiguous() {
    let harness = TestHarness::new();
    let orchestrator = harness.keyword_orchestrator();

    let err = orchestrator.execute("close everything").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AmbiguousCommand);
    assert!(!err.suggestion.is_empty());
}

#[tokio::test]
async fn test_nothing_to_change_is_insufficient() {
    let harness = TestHarness::new();
    let orchestrator = harness.keyword_orchestrator();

    let err = orchestrator.execute("close closed tickets").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InsufficientChanges);
}

#[tokio::test]
async fn test_change_for_unmatched_ticket_is_inconsistent() {
    let harness = TestHarness::new();
    let proposer = Arc::new(MockChangeProposer::new());
    proposer
        .set_changes(vec![fixtures::proposed_change(
            "not-matched",
            TicketUpdates::status(TicketStatus::Closed),
        )])
        .await;
    let orchestrator = harness.orchestrator_with(
        PipelineConfig::default(),
        Arc::new(KeywordQueryInterpreter::with_store(harness.tickets.clone())),
        proposer,
    );

    let err = orchestrator.execute("close waiting tickets").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InconsistentChanges);
    assert_eq!(err.details["ticket_id"], "not-matched");
}

#[tokio::test]
async fn test_critical_impact_is_blocked() {
    let harness = TestHarness::new();
    let proposer = Arc::new(MockChangeProposer::new());
    proposer
        .set_impact(ImpactAssessment {
            level: RiskLevel::Critical,
            status_flips: 3,
            priority_direction: 0,
            assignment_changes: 0,
            ticket_count: 3,
            summary: "forced".to_string(),
        })
        .await;
    let interpreter: Arc<dyn QueryInterpreter> =
        Arc::new(KeywordQueryInterpreter::with_store(harness.tickets.clone()));

    let blocking = harness.orchestrator_with(
        PipelineConfig::default(),
        interpreter.clone(),
        proposer.clone(),
    );
    let err = blocking.execute("close waiting tickets").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::HighImpactChanges);
    assert_eq!(err.details["level"], "critical");

    let permissive = harness.orchestrator_with(
        PipelineConfig {
            block_critical_impact: false,
            ..Default::default()
        },
        interpreter,
        proposer,
    );
    assert!(permissive.execute("close waiting tickets").await.is_ok());
}

#[tokio::test]
async fn test_interpreter_failure_reaches_command_error() {
    let harness = TestHarness::new();
    let mut sub = harness.hub.subscribe("admin").unwrap();
    let interpreter = Arc::new(MockQueryInterpreter::new());
    interpreter
        .set_next_error(InterpreterError::Backend("model unavailable".into()))
        .await;
    let orchestrator = harness.orchestrator_with(
        PipelineConfig::default(),
        interpreter,
        Arc::new(MockChangeProposer::new()),
    );

    let err = orchestrator.execute("close waiting tickets").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);

    let frames = drain(&mut sub).await;
    assert_eq!(named(&frames, "command_start").len(), 1);
    assert_eq!(named(&frames, "command_error").len(), 1);
    assert!(named(&frames, "command_complete").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_interpreter_timeout() {
    let harness = TestHarness::new();
    let interpreter = Arc::new(MockQueryInterpreter::new());
    interpreter.set_delay(Duration::from_secs(120)).await;
    let orchestrator = harness.orchestrator_with(
        PipelineConfig {
            interpreter_timeout_ms: 5_000,
            ..Default::default()
        },
        interpreter,
        Arc::new(MockChangeProposer::new()),
    );

    let err = orchestrator.execute("close waiting tickets").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert_eq!(err.details["timeout_ms"], 5_000);

    let rows = harness.telemetry.recent(1).unwrap();
    assert!(rows[0].stage_durations_ms[1] >= 5_000);
}

#[tokio::test]
async fn test_concurrent_commands_are_independent() {
    let harness = TestHarness::new();
    let mut sub = harness.hub.subscribe("admin").unwrap();
    let orchestrator = harness.keyword_orchestrator();

    let (a, b) = tokio::join!(
        orchestrator.execute("close all waiting tickets"),
        orchestrator.execute("escalate open tickets"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.command_id, b.command_id);
    assert_eq!(orchestrator.active_commands(), 0);

    let frames = drain(&mut sub).await;
    let completed: Vec<&str> = named(&frames, "command_complete")
        .iter()
        .map(|c| c["commandId"].as_str().unwrap())
        .collect();
    assert_eq!(completed.len(), 2);
    assert!(completed.contains(&a.command_id.as_str()));
    assert!(completed.contains(&b.command_id.as_str()));
    assert_eq!(harness.telemetry.recent(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_review_then_apply() {
    let harness = TestHarness::new();
    let orchestrator = harness.keyword_orchestrator();
    let executor = ChangeExecutor::new(harness.tickets.clone());

    let outcome = orchestrator.execute("close all waiting tickets").await.unwrap();
    let approved: Vec<ApprovedChange> = outcome
        .result
        .suggested_changes
        .iter()
        .map(|c| ApprovedChange {
            ticket_id: c.ticket_id.clone(),
            updates: c.updates.clone(),
            rationale: Some(c.rationale.clone()),
        })
        .collect();

    let applied = tokio_test::assert_ok!(executor.apply(&approved));
    assert_eq!(applied.updated_tickets.len(), 3);
    assert!(applied
        .updated_tickets
        .iter()
        .all(|t| t.status == TicketStatus::Closed && t.closed_at.is_some()));

    for change in &approved {
        let history = harness.tickets.history(&change.ticket_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].before.status, TicketStatus::Waiting);
    }

    // Running the same command again finds nothing left to do
    let again = orchestrator.execute("close all waiting tickets").await.unwrap();
    assert_eq!(again.result.match_count, 0);
}
