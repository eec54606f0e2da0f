//! Mock change proposer for testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interpreter::{
    ChangeProposal, ChangeProposer, InterpreterError, KeywordChangeProposer, ProposedChange,
};
use crate::pipeline::ImpactAssessment;
use crate::ticket::{Ticket, TicketUpdates};

/// A recorded proposal request for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedProposal {
    pub text: String,
    pub ticket_ids: Vec<String>,
}

/// Mock implementation of the ChangeProposer trait.
///
/// Without configuration it behaves like the keyword proposer. It can instead
/// apply one fixed update to every ticket, return a fixed change list, force
/// an impact assessment, fail, or stall.
#[derive(Default)]
pub struct MockChangeProposer {
    updates: Arc<RwLock<Option<TicketUpdates>>>,
    changes: Arc<RwLock<Option<Vec<ProposedChange>>>>,
    impact: Arc<RwLock<Option<ImpactAssessment>>>,
    next_error: Arc<RwLock<Option<InterpreterError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    calls: Arc<RwLock<Vec<RecordedProposal>>>,
}

impl MockChangeProposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propose `updates` for every matched ticket.
    pub async fn set_updates(&self, updates: TicketUpdates) {
        *self.updates.write().await = Some(updates);
    }

    /// Return exactly `changes`, whatever was matched.
    pub async fn set_changes(&self, changes: Vec<ProposedChange>) {
        *self.changes.write().await = Some(changes);
    }

    /// Report `impact` instead of assessing the changes.
    pub async fn set_impact(&self, impact: ImpactAssessment) {
        *self.impact.write().await = Some(impact);
    }

    pub async fn set_next_error(&self, error: InterpreterError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn calls(&self) -> Vec<RecordedProposal> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl ChangeProposer for MockChangeProposer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn propose(
        &self,
        text: &str,
        tickets: &[Ticket],
    ) -> Result<ChangeProposal, InterpreterError> {
        self.calls.write().await.push(RecordedProposal {
            text: text.to_string(),
            ticket_ids: tickets.iter().map(|t| t.id.clone()).collect(),
        });

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let fixed = self.changes.read().await.clone();
        let updates = self.updates.read().await.clone();
        let mut proposal = match (fixed, updates) {
            (Some(changes), _) => ChangeProposal {
                impact: ImpactAssessment::assess(tickets, &changes),
                rationale: "fixed change list".to_string(),
                changes,
            },
            (None, Some(updates)) => {
                let changes: Vec<ProposedChange> = tickets
                    .iter()
                    .map(|t| ProposedChange {
                        ticket_id: t.id.clone(),
                        updates: updates.clone(),
                        rationale: "mock update".to_string(),
                    })
                    .collect();
                ChangeProposal {
                    impact: ImpactAssessment::assess(tickets, &changes),
                    rationale: "same update for every ticket".to_string(),
                    changes,
                }
            }
            (None, None) => KeywordChangeProposer::new().propose(text, tickets).await?,
        };

        if let Some(impact) = self.impact.read().await.clone() {
            proposal.impact = impact;
        }
        Ok(proposal)
    }
}
