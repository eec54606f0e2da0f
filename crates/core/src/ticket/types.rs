//! Core ticket data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Ticket
// ============================================================================

/// Workflow status of a ticket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Waiting,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Waiting => "waiting",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn all() -> [TicketStatus; 4] {
        [
            TicketStatus::Open,
            TicketStatus::InProgress,
            TicketStatus::Waiting,
            TicketStatus::Closed,
        ]
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(TicketStatus::Open),
            "in_progress" | "in-progress" | "inprogress" => Ok(TicketStatus::InProgress),
            "waiting" => Ok(TicketStatus::Waiting),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

/// Ticket priority, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Numeric rank used for ordering in SQL (higher = more urgent).
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Priority::Low),
            1 => Some(Priority::Medium),
            2 => Some(Priority::High),
            3 => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "normal" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" | "critical" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// A support ticket as seen by the command pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while the ticket sits in `closed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Return a copy of this ticket with `updates` applied at `now`.
    ///
    /// Entering `closed` stamps `closed_at`; leaving it clears the stamp.
    pub fn with_updates(&self, updates: &TicketUpdates, now: DateTime<Utc>) -> Ticket {
        let mut next = self.clone();

        if let Some(status) = updates.status {
            let was_closed = self.status == TicketStatus::Closed;
            let is_closed = status == TicketStatus::Closed;
            next.status = status;
            if is_closed && !was_closed {
                next.closed_at = Some(now);
            } else if !is_closed {
                next.closed_at = None;
            }
        }

        if let Some(priority) = updates.priority {
            next.priority = priority;
        }

        if let Some(ref assignee) = updates.assignee {
            next.assignee = assignee.clone();
        }

        next.updated_at = now;
        next
    }
}

// ============================================================================
// Updates
// ============================================================================

/// Field updates for a single ticket.
///
/// `assignee: Some(None)` unassigns; `assignee: None` leaves it untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TicketUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub assignee: Option<Option<String>>,
}

/// Distinguishes an explicit `null` from a missing field.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

impl TicketUpdates {
    pub fn status(status: TicketStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    pub fn assign(assignee: impl Into<String>) -> Self {
        Self {
            assignee: Some(Some(assignee.into())),
            ..Default::default()
        }
    }

    pub fn unassign() -> Self {
        Self {
            assignee: Some(None),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.priority.is_none() && self.assignee.is_none()
    }
}

/// One admin-approved change, as submitted for bulk apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovedChange {
    pub ticket_id: String,
    pub updates: TicketUpdates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Audit row written for every ticket mutated by a bulk apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub ticket_id: String,
    pub changed_at: DateTime<Utc>,
    /// Snapshot of the ticket before the change.
    pub before: Ticket,
    pub updates: TicketUpdates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Outcome of a committed bulk apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppliedChanges {
    pub updated_tickets: Vec<Ticket>,
    pub history: Vec<HistoryEntry>,
}

// ============================================================================
// Structured query
// ============================================================================

/// Assignee constraint within a structured query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AssigneeFilter {
    Unassigned,
    Is(String),
}

/// Structured ticket query produced by a query interpreter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<AssigneeFilter>,
    /// Case-insensitive substring over title and description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TicketQuery {
    pub fn with_status(mut self, status: TicketStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_assignee(mut self, assignee: AssigneeFilter) -> Self {
        self.assignee = Some(assignee);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Number of constraints set. A query with zero filters would match
    /// every ticket and is treated as ambiguous.
    pub fn filter_count(&self) -> usize {
        [
            self.status.is_some(),
            self.priority.is_some(),
            self.assignee.is_some(),
            self.text.as_deref().is_some_and(|t| !t.trim().is_empty()),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// In-process evaluation of the query against one ticket.
    pub fn matches(&self, ticket: &Ticket) -> bool {
        if self.status.is_some_and(|s| s != ticket.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != ticket.priority) {
            return false;
        }
        match &self.assignee {
            Some(AssigneeFilter::Unassigned) if ticket.assignee.is_some() => return false,
            Some(AssigneeFilter::Is(name)) if ticket.assignee.as_deref() != Some(name.as_str()) => {
                return false
            }
            _ => {}
        }
        if let Some(text) = self.text.as_deref().filter(|t| !t.trim().is_empty()) {
            let needle = text.to_lowercase();
            if !ticket.title.to_lowercase().contains(&needle)
                && !ticket.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(status: TicketStatus) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: "T-1".to_string(),
            title: "Printer jam".to_string(),
            description: "Third floor printer is jammed".to_string(),
            status,
            priority: Priority::Medium,
            assignee: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    #[test]
    fn test_closing_stamps_closed_at() {
        let now = Utc::now();
        let updated = ticket(TicketStatus::Waiting)
            .with_updates(&TicketUpdates::status(TicketStatus::Closed), now);
        assert_eq!(updated.status, TicketStatus::Closed);
        assert_eq!(updated.closed_at, Some(now));
        assert_eq!(updated.updated_at, now);
    }

    #[test]
    fn test_reopening_clears_closed_at() {
        let mut closed = ticket(TicketStatus::Closed);
        closed.closed_at = Some(Utc::now());
        let reopened = closed.with_updates(&TicketUpdates::status(TicketStatus::Open), Utc::now());
        assert_eq!(reopened.status, TicketStatus::Open);
        assert!(reopened.closed_at.is_none());
    }

    #[test]
    fn test_closed_to_closed_keeps_original_stamp() {
        let stamp = Utc::now() - chrono::Duration::days(1);
        let mut closed = ticket(TicketStatus::Closed);
        closed.closed_at = Some(stamp);
        let again = closed.with_updates(&TicketUpdates::status(TicketStatus::Closed), Utc::now());
        assert_eq!(again.closed_at, Some(stamp));
    }

    #[test]
    fn test_assignee_updates() {
        let now = Utc::now();
        let assigned = ticket(TicketStatus::Open).with_updates(&TicketUpdates::assign("dana"), now);
        assert_eq!(assigned.assignee.as_deref(), Some("dana"));

        let unassigned = assigned.with_updates(&TicketUpdates::unassign(), now);
        assert!(unassigned.assignee.is_none());

        let untouched = assigned.with_updates(&TicketUpdates::priority(Priority::High), now);
        assert_eq!(untouched.assignee.as_deref(), Some("dana"));
        assert_eq!(untouched.priority, Priority::High);
    }

    #[test]
    fn test_updates_null_assignee_is_unassign() {
        let updates: TicketUpdates = serde_json::from_str(r#"{"assignee": null}"#).unwrap();
        assert_eq!(updates, TicketUpdates::unassign());

        let updates: TicketUpdates = serde_json::from_str(r#"{"status": "closed"}"#).unwrap();
        assert!(updates.assignee.is_none());
        assert!(!updates.is_empty());

        let empty: TicketUpdates = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_query_filter_count() {
        assert_eq!(TicketQuery::default().filter_count(), 0);
        assert_eq!(TicketQuery::default().with_text("   ").filter_count(), 0);
        let query = TicketQuery::default()
            .with_status(TicketStatus::Waiting)
            .with_assignee(AssigneeFilter::Unassigned);
        assert_eq!(query.filter_count(), 2);
    }

    #[test]
    fn test_query_matches() {
        let t = ticket(TicketStatus::Waiting);
        assert!(TicketQuery::default()
            .with_status(TicketStatus::Waiting)
            .matches(&t));
        assert!(!TicketQuery::default()
            .with_status(TicketStatus::Open)
            .matches(&t));
        assert!(TicketQuery::default().with_text("PRINTER").matches(&t));
        assert!(TicketQuery::default()
            .with_assignee(AssigneeFilter::Unassigned)
            .matches(&t));
        assert!(!TicketQuery::default()
            .with_assignee(AssigneeFilter::Is("dana".to_string()))
            .matches(&t));
    }

    #[test]
    fn test_status_and_priority_parse() {
        assert_eq!("In-Progress".parse::<TicketStatus>(), Ok(TicketStatus::InProgress));
        assert_eq!("critical".parse::<Priority>(), Ok(Priority::Urgent));
        assert!("sideways".parse::<TicketStatus>().is_err());
        assert!(Priority::Urgent > Priority::Low);
        assert_eq!(Priority::from_rank(Priority::High.rank()), Some(Priority::High));
    }
}
