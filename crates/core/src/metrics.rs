//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Event hub (connections, delivered events, dropped clients)
//! - Command pipeline (outcomes, error kinds, stage timings)
//! - Bulk apply and telemetry persistence

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Event Hub Metrics
// =============================================================================

/// Clients currently subscribed to the event stream.
pub static EVENT_CLIENTS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ticketdesk_event_clients_active",
        "Number of connected event stream clients",
    )
    .unwrap()
});

/// Clients that ever subscribed (cumulative).
pub static EVENT_CLIENTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketdesk_event_clients_total",
        "Total event stream subscriptions since startup",
    )
    .unwrap()
});

/// Clients removed from the registry, by reason.
pub static EVENT_CLIENTS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketdesk_event_clients_dropped_total",
            "Event stream clients removed from the registry",
        ),
        &["reason"], // "disconnected", "timeout", "write_error", "shutdown"
    )
    .unwrap()
});

/// Frames written to client sinks, by event kind.
pub static EVENTS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticketdesk_events_sent_total", "Event frames delivered"),
        &["type"],
    )
    .unwrap()
});

/// Events deferred by the throttle, by event kind.
pub static EVENTS_THROTTLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ticketdesk_events_throttled_total",
            "Events queued behind a throttle window",
        ),
        &["type"],
    )
    .unwrap()
});

// =============================================================================
// Command Pipeline Metrics
// =============================================================================

/// Commands by terminal outcome.
pub static COMMANDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticketdesk_commands_total", "Commands processed"),
        &["outcome"], // "complete", "error", "rejected"
    )
    .unwrap()
});

/// Command failures by error kind.
pub static COMMAND_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticketdesk_command_errors_total", "Command failures by kind"),
        &["kind"],
    )
    .unwrap()
});

/// Commands currently running.
pub static COMMANDS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("ticketdesk_commands_active", "Commands currently in flight").unwrap()
});

/// Measured stage durations in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ticketdesk_stage_duration_seconds",
            "Duration of each pipeline stage",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["stage"],
    )
    .unwrap()
});

/// Telemetry rows that could not be persisted.
pub static TELEMETRY_SAVE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketdesk_telemetry_save_failures_total",
        "Telemetry rows that failed to persist",
    )
    .unwrap()
});

// =============================================================================
// Bulk Apply Metrics
// =============================================================================

/// Bulk-apply batches by result.
pub static CHANGE_BATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticketdesk_change_batches_total", "Bulk-apply batches"),
        &["result"], // "committed", "rolled_back", "rejected"
    )
    .unwrap()
});

/// Tickets mutated by committed batches.
pub static TICKETS_CHANGED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ticketdesk_tickets_changed_total",
        "Tickets mutated by bulk apply",
    )
    .unwrap()
});

/// All core metrics, for registration with the server's registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Event hub
        Box::new(EVENT_CLIENTS_ACTIVE.clone()),
        Box::new(EVENT_CLIENTS_TOTAL.clone()),
        Box::new(EVENT_CLIENTS_DROPPED.clone()),
        Box::new(EVENTS_SENT.clone()),
        Box::new(EVENTS_THROTTLED.clone()),
        // Pipeline
        Box::new(COMMANDS_TOTAL.clone()),
        Box::new(COMMAND_ERRORS.clone()),
        Box::new(COMMANDS_ACTIVE.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(TELEMETRY_SAVE_FAILURES.clone()),
        // Bulk apply
        Box::new(CHANGE_BATCHES.clone()),
        Box::new(TICKETS_CHANGED.clone()),
    ]
}
