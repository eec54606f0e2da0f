//! Structured command errors.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::interpreter::InterpreterError;
use crate::telemetry::TelemetryError;
use crate::ticket::TicketError;

/// Closed set of failure kinds a command can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidCommand,
    AmbiguousCommand,
    TooManyMatches,
    NoMatches,
    ValidationError,
    InvalidStateTransition,
    HighImpactChanges,
    InsufficientChanges,
    InconsistentChanges,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCommand => "invalid_command",
            ErrorKind::AmbiguousCommand => "ambiguous_command",
            ErrorKind::TooManyMatches => "too_many_matches",
            ErrorKind::NoMatches => "no_matches",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::HighImpactChanges => "high_impact_changes",
            ErrorKind::InsufficientChanges => "insufficient_changes",
            ErrorKind::InconsistentChanges => "inconsistent_changes",
            ErrorKind::Internal => "internal",
        }
    }

    fn default_suggestion(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCommand => "Enter a non-empty command describing the tickets to change",
            ErrorKind::AmbiguousCommand => {
                "Say which tickets to change, for example by status, priority or assignee"
            }
            ErrorKind::TooManyMatches => "Narrow the command with an extra filter",
            ErrorKind::NoMatches => "Check the filters in the command against existing tickets",
            ErrorKind::ValidationError => "Review the submitted changes and try again",
            ErrorKind::InvalidStateTransition => "Start a new command",
            ErrorKind::HighImpactChanges => "Split the command into smaller batches",
            ErrorKind::InsufficientChanges => "Say what should change on the matched tickets",
            ErrorKind::InconsistentChanges => "Re-run the command to get a fresh change set",
            ErrorKind::Internal => "Try again later",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed command, ready to be shown to the admin.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Value,
    pub suggestion: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Value::Null,
            suggestion: kind.default_suggestion().to_string(),
        }
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCommand, message)
    }

    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AmbiguousCommand, message)
    }

    pub fn too_many_matches(found: usize, limit: usize) -> Self {
        Self::new(
            ErrorKind::TooManyMatches,
            format!("Command matches {} tickets, the limit is {}", found, limit),
        )
        .with_details(serde_json::json!({ "found": found, "limit": limit }))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStateTransition, message)
    }

    pub fn insufficient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientChanges, message)
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InconsistentChanges, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }
}

impl From<InterpreterError> for CommandError {
    fn from(err: InterpreterError) -> Self {
        let message = err.to_string();
        match err {
            InterpreterError::Unintelligible(_) => CommandError::invalid_command(message),
            InterpreterError::Ambiguous(_) => CommandError::ambiguous(message),
            InterpreterError::NoMatches(_) => CommandError::new(ErrorKind::NoMatches, message),
            InterpreterError::Backend(_) => CommandError::internal(message),
            InterpreterError::Timeout(timeout) => CommandError::internal(message)
                .with_details(serde_json::json!({ "timeout_ms": timeout.as_millis() as u64 })),
        }
    }
}

impl From<TicketError> for CommandError {
    fn from(err: TicketError) -> Self {
        match err {
            TicketError::NotFound(id) => {
                CommandError::validation(format!("Ticket not found: {}", id))
                    .with_details(serde_json::json!({ "ticket_id": id }))
            }
            other => CommandError::internal(other.to_string()),
        }
    }
}

impl From<TelemetryError> for CommandError {
    fn from(err: TelemetryError) -> Self {
        CommandError::internal(err.to_string())
    }
}
