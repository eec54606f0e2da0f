//! Testing utilities and mock implementations.
//!
//! Mocks stand in for the natural-language collaborators so pipeline tests
//! control exactly what the interpreters return and how long they take.
//!
//! # Example
//!
//! ```rust,ignore
//! use ticketdesk_core::testing::{fixtures, MockChangeProposer, MockQueryInterpreter};
//!
//! let store = SqliteTicketStore::in_memory()?;
//! fixtures::seed(&store, &[("VPN down", TicketStatus::Waiting, Priority::High)]);
//!
//! let proposer = MockChangeProposer::new();
//! proposer.set_updates(TicketUpdates::status(TicketStatus::Closed)).await;
//! ```

mod mock_interpreter;
mod mock_proposer;

pub use mock_interpreter::MockQueryInterpreter;
pub use mock_proposer::{MockChangeProposer, RecordedProposal};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::interpreter::ProposedChange;
    use crate::ticket::{
        CreateTicketRequest, Priority, Ticket, TicketStatus, TicketStore, TicketUpdates,
    };

    /// An unsaved ticket with reasonable defaults.
    pub fn ticket(id: &str, status: TicketStatus, priority: Priority) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: id.to_string(),
            title: format!("Ticket {}", id),
            description: format!("Details for {}", id),
            status,
            priority,
            assignee: None,
            created_at: now,
            updated_at: now,
            closed_at: (status == TicketStatus::Closed).then_some(now),
        }
    }

    /// Create tickets from `(title, status, priority)` rows, returning their ids
    /// in order.
    pub fn seed(store: &dyn TicketStore, rows: &[(&str, TicketStatus, Priority)]) -> Vec<String> {
        rows.iter()
            .map(|(title, status, priority)| {
                store
                    .create(
                        CreateTicketRequest::new(*title)
                            .with_description(format!("{} reported by a user", title))
                            .with_status(*status)
                            .with_priority(*priority),
                    )
                    .expect("seed ticket")
                    .id
            })
            .collect()
    }

    /// The helpdesk used in the pipeline scenarios: three waiting tickets
    /// among a handful of others.
    pub fn seed_helpdesk(store: &dyn TicketStore) -> Vec<String> {
        seed(
            store,
            &[
                ("Printer jammed on floor 2", TicketStatus::Waiting, Priority::Low),
                ("VPN drops every hour", TicketStatus::Waiting, Priority::High),
                ("Request new monitor", TicketStatus::Waiting, Priority::Medium),
                ("Password reset for Bob", TicketStatus::Open, Priority::Medium),
                ("Outage in billing service", TicketStatus::InProgress, Priority::Urgent),
                ("Old laptop returned", TicketStatus::Closed, Priority::Low),
            ],
        )
    }

    pub fn proposed_change(ticket_id: &str, updates: TicketUpdates) -> ProposedChange {
        ProposedChange {
            ticket_id: ticket_id.to_string(),
            updates,
            rationale: format!("Test change for {}", ticket_id),
        }
    }
}
