//! Ticket repository trait and types.

use thiserror::Error;

use crate::ticket::{
    AppliedChanges, ApprovedChange, HistoryEntry, Priority, Ticket, TicketQuery, TicketStatus,
};

/// Error type for ticket operations.
#[derive(Debug, Error)]
pub enum TicketError {
    /// Ticket not found.
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Request to create a new ticket.
#[derive(Debug, Clone)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub assignee: Option<String>,
}

impl CreateTicketRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            status: TicketStatus::Open,
            priority: Priority::Medium,
            assignee: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_status(mut self, status: TicketStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }
}

/// Filter for listing tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    /// Filter by status.
    pub status: Option<TicketStatus>,
    /// Filter by assignee.
    pub assignee: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl TicketFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            assignee: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for ticket storage backends.
///
/// Besides the read side used by the command pipeline, the store owns the
/// bulk-apply transaction and its audit history so that both commit or roll
/// back together.
pub trait TicketStore: Send + Sync {
    /// Create a new ticket.
    fn create(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError>;

    /// Get a ticket by its exact ID.
    fn get(&self, id: &str) -> Result<Option<Ticket>, TicketError>;

    /// List tickets matching the filter.
    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError>;

    /// Count tickets matching the filter.
    fn count(&self, filter: &TicketFilter) -> Result<i64, TicketError>;

    /// Run a structured query, returning at most `limit` tickets.
    fn query(&self, query: &TicketQuery, limit: usize) -> Result<Vec<Ticket>, TicketError>;

    /// Apply every change in one transaction, writing one history row per
    /// mutated ticket. An unknown ticket ID rolls back the whole batch.
    fn apply_changes(&self, changes: &[ApprovedChange]) -> Result<AppliedChanges, TicketError>;

    /// Audit history for a ticket, newest first.
    fn history(&self, ticket_id: &str) -> Result<Vec<HistoryEntry>, TicketError>;
}
