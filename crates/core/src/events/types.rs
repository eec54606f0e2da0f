use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::{CommandCompletion, CommandFailure, CommandSnapshot};

/// Named event kinds carried on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Ping,
    CommandStart,
    CommandProgress,
    CommandComplete,
    CommandError,
    Status,
    TicketsUpdated,
}

/// How queued events of one kind are delivered when the throttle window ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Only the newest queued item is sent.
    LatestOnly,
    /// Everything queued since the last flush goes out as one `batch` frame.
    Batch,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Ping => "ping",
            EventKind::CommandStart => "command_start",
            EventKind::CommandProgress => "command_progress",
            EventKind::CommandComplete => "command_complete",
            EventKind::CommandError => "command_error",
            EventKind::Status => "status",
            EventKind::TicketsUpdated => "tickets_updated",
        }
    }

    /// Connection lifecycle and command events are written straight through.
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            EventKind::Connected
                | EventKind::CommandStart
                | EventKind::CommandProgress
                | EventKind::CommandComplete
                | EventKind::CommandError
        )
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        match self {
            EventKind::CommandProgress | EventKind::Status => FlushPolicy::LatestOnly,
            _ => FlushPolicy::Batch,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedPayload {
    pub client_id: String,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingPayload {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub active_commands: usize,
    pub connected_clients: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketsUpdatedPayload {
    pub ticket_ids: Vec<String>,
    pub count: usize,
}

/// Every event the server can push, with its fixed payload type.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Connected(ConnectedPayload),
    Ping(PingPayload),
    CommandStart(CommandSnapshot),
    CommandProgress(CommandSnapshot),
    CommandComplete(Box<CommandCompletion>),
    CommandError(Box<CommandFailure>),
    Status(StatusPayload),
    TicketsUpdated(TicketsUpdatedPayload),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connected(_) => EventKind::Connected,
            ServerEvent::Ping(_) => EventKind::Ping,
            ServerEvent::CommandStart(_) => EventKind::CommandStart,
            ServerEvent::CommandProgress(_) => EventKind::CommandProgress,
            ServerEvent::CommandComplete(_) => EventKind::CommandComplete,
            ServerEvent::CommandError(_) => EventKind::CommandError,
            ServerEvent::Status(_) => EventKind::Status,
            ServerEvent::TicketsUpdated(_) => EventKind::TicketsUpdated,
        }
    }

    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            ServerEvent::Connected(p) => serde_json::to_value(p),
            ServerEvent::Ping(p) => serde_json::to_value(p),
            ServerEvent::CommandStart(p) | ServerEvent::CommandProgress(p) => {
                serde_json::to_value(p)
            }
            ServerEvent::CommandComplete(p) => serde_json::to_value(p),
            ServerEvent::CommandError(p) => serde_json::to_value(p),
            ServerEvent::Status(p) => serde_json::to_value(p),
            ServerEvent::TicketsUpdated(p) => serde_json::to_value(p),
        }
    }

    pub fn ping() -> Self {
        ServerEvent::Ping(PingPayload {
            timestamp: Utc::now(),
        })
    }
}

/// A serialized event ready to be written to one client.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub kind: EventKind,
    /// SSE event name: the kind's name, or `batch`.
    pub event: &'static str,
    /// JSON payload.
    pub data: String,
}

impl EventFrame {
    pub fn single(kind: EventKind, payload: &Value) -> Self {
        Self {
            kind,
            event: kind.name(),
            data: payload.to_string(),
        }
    }

    /// Envelope for coalesced events: `{"type": kind, "events": [...]}`.
    pub fn batch(kind: EventKind, events: Vec<Value>) -> Self {
        let envelope = serde_json::json!({
            "type": kind.name(),
            "events": events,
        });
        Self {
            kind,
            event: "batch",
            data: envelope.to_string(),
        }
    }

    pub fn is_batch(&self) -> bool {
        self.event == "batch"
    }
}
