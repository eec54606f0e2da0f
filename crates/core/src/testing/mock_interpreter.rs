//! Mock query interpreter for testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interpreter::{
    InterpreterError, KeywordQueryInterpreter, QueryInterpretation, QueryInterpreter,
};
use crate::ticket::TicketQuery;

/// Mock implementation of the QueryInterpreter trait.
///
/// Returns a configured interpretation, or falls back to the keyword
/// grammar when none is set. Records every command it was asked about.
///
/// # Example
///
/// ```rust,ignore
/// use ticketdesk_core::testing::MockQueryInterpreter;
///
/// let interpreter = MockQueryInterpreter::new();
/// interpreter
///     .set_interpretation(TicketQuery::default().with_status(TicketStatus::Waiting), 3)
///     .await;
/// interpreter.set_delay(Duration::from_millis(200)).await;
///
/// // ... run a command ...
/// assert_eq!(interpreter.calls().await, vec!["close all waiting tickets"]);
/// ```
#[derive(Default)]
pub struct MockQueryInterpreter {
    interpretation: Arc<RwLock<Option<QueryInterpretation>>>,
    next_error: Arc<RwLock<Option<InterpreterError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockQueryInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `query` with the given match estimate for every call.
    pub async fn set_interpretation(&self, query: TicketQuery, estimated_matches: usize) {
        *self.interpretation.write().await = Some(QueryInterpretation {
            explanation: format!("{} filter(s)", query.filter_count()),
            query,
            estimated_matches,
        });
    }

    /// Fail the next call with `error`.
    pub async fn set_next_error(&self, error: InterpreterError) {
        *self.next_error.write().await = Some(error);
    }

    /// Sleep this long before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Command texts received so far.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl QueryInterpreter for MockQueryInterpreter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn interpret(&self, text: &str) -> Result<QueryInterpretation, InterpreterError> {
        self.calls.write().await.push(text.to_string());

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let configured = self.interpretation.read().await.clone();
        match configured {
            Some(interpretation) => Ok(interpretation),
            None => KeywordQueryInterpreter::new().interpret(text).await,
        }
    }
}
