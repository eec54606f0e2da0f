//! Transactional bulk-apply of admin-approved ticket changes.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::metrics;
use crate::pipeline::CommandError;
use crate::ticket::{AppliedChanges, ApprovedChange, TicketError, TicketStore};

/// Applies an approved change set all-or-nothing.
///
/// Emits no events itself; callers broadcast `tickets_updated` once the
/// batch has committed.
pub struct ChangeExecutor {
    store: Arc<dyn TicketStore>,
}

impl ChangeExecutor {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Validate the batch shape without touching the store.
    pub fn validate(changes: &[ApprovedChange]) -> Result<(), CommandError> {
        if changes.is_empty() {
            return Err(CommandError::validation("No changes to apply")
                .with_suggestion("Approve at least one proposed change"));
        }

        let mut seen = HashSet::new();
        for change in changes {
            if change.ticket_id.trim().is_empty() {
                return Err(CommandError::validation("Change is missing a ticket id"));
            }
            if !seen.insert(change.ticket_id.as_str()) {
                return Err(CommandError::inconsistent(format!(
                    "Ticket {} appears more than once in the batch",
                    change.ticket_id
                ))
                .with_details(serde_json::json!({ "ticket_id": change.ticket_id })));
            }
            if change.updates.is_empty() {
                return Err(CommandError::insufficient(format!(
                    "Change for ticket {} updates nothing",
                    change.ticket_id
                ))
                .with_details(serde_json::json!({ "ticket_id": change.ticket_id })));
            }
        }
        Ok(())
    }

    /// Apply `changes` in one transaction. Any unknown ticket rolls back the
    /// whole batch.
    pub fn apply(&self, changes: &[ApprovedChange]) -> Result<AppliedChanges, CommandError> {
        if let Err(e) = Self::validate(changes) {
            metrics::CHANGE_BATCHES.with_label_values(&["rejected"]).inc();
            return Err(e);
        }

        match self.store.apply_changes(changes) {
            Ok(applied) => {
                metrics::CHANGE_BATCHES.with_label_values(&["committed"]).inc();
                metrics::TICKETS_CHANGED.inc_by(applied.updated_tickets.len() as u64);
                info!(
                    tickets = applied.updated_tickets.len(),
                    history = applied.history.len(),
                    "Applied change set"
                );
                Ok(applied)
            }
            Err(e) => {
                metrics::CHANGE_BATCHES.with_label_values(&["rolled_back"]).inc();
                warn!(error = %e, batch = changes.len(), "Change set rolled back");
                Err(match e {
                    TicketError::NotFound(_) => CommandError::from(e)
                        .with_suggestion("Re-run the command to refresh the change set"),
                    other => other.into(),
                })
            }
        }
    }
}
