//! Traits for the natural-language collaborators.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::interpreter::types::{ChangeProposal, QueryInterpretation};
use crate::ticket::Ticket;

/// Errors an interpreter can report.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("Could not understand command: {0}")]
    Unintelligible(String),

    #[error("Command is ambiguous: {0}")]
    Ambiguous(String),

    #[error("No tickets match: {0}")]
    NoMatches(String),

    #[error("Interpreter backend failed: {0}")]
    Backend(String),

    #[error("Interpreter timed out after {0:?}")]
    Timeout(Duration),
}

/// Turns command text into a structured ticket query.
#[async_trait]
pub trait QueryInterpreter: Send + Sync {
    /// Name of this interpreter for logging.
    fn name(&self) -> &str;

    async fn interpret(&self, text: &str) -> Result<QueryInterpretation, InterpreterError>;
}

/// Proposes per-ticket updates for the tickets a command matched.
#[async_trait]
pub trait ChangeProposer: Send + Sync {
    /// Name of this proposer for logging.
    fn name(&self) -> &str;

    async fn propose(
        &self,
        text: &str,
        tickets: &[Ticket],
    ) -> Result<ChangeProposal, InterpreterError>;
}
