//! Aggregate risk of a proposed change set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::interpreter::ProposedChange;
use crate::ticket::Ticket;

/// Risk classification, ordered from least to most dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    fn from_score(score: usize) -> Self {
        match score {
            0..=3 => RiskLevel::Low,
            4..=9 => RiskLevel::Medium,
            10..=39 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAssessment {
    pub level: RiskLevel,
    /// Changes that move a ticket to a different status.
    pub status_flips: usize,
    /// +1 per raised priority, -1 per lowered one.
    pub priority_direction: i64,
    pub assignment_changes: usize,
    /// Tickets touched by the change set.
    pub ticket_count: usize,
    pub summary: String,
}

impl ImpactAssessment {
    /// Derive the assessment by diffing each change against its ticket.
    /// Changes naming a ticket that is not in `tickets` count toward volume only.
    pub fn assess(tickets: &[Ticket], changes: &[ProposedChange]) -> Self {
        let by_id: HashMap<&str, &Ticket> = tickets.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut status_flips = 0;
        let mut priority_direction = 0i64;
        let mut assignment_changes = 0;

        for change in changes {
            let Some(ticket) = by_id.get(change.ticket_id.as_str()) else {
                continue;
            };
            if change.updates.status.is_some_and(|s| s != ticket.status) {
                status_flips += 1;
            }
            if let Some(priority) = change.updates.priority {
                priority_direction += (priority.rank() - ticket.priority.rank()).signum();
            }
            if change
                .updates
                .assignee
                .as_ref()
                .is_some_and(|a| *a != ticket.assignee)
            {
                assignment_changes += 1;
            }
        }

        let ticket_count = changes.len();
        let score = status_flips * 2
            + assignment_changes
            + priority_direction.unsigned_abs() as usize
            + ticket_count / 5;
        let level = RiskLevel::from_score(score);

        let mut parts = Vec::new();
        if status_flips > 0 {
            parts.push(format!("{} status change(s)", status_flips));
        }
        if priority_direction > 0 {
            parts.push(format!("net {} priority raise(s)", priority_direction));
        } else if priority_direction < 0 {
            parts.push(format!("net {} priority drop(s)", -priority_direction));
        }
        if assignment_changes > 0 {
            parts.push(format!("{} reassignment(s)", assignment_changes));
        }
        let summary = if parts.is_empty() {
            format!("{} ticket(s), no effective change", ticket_count)
        } else {
            format!("{} ticket(s): {}", ticket_count, parts.join(", "))
        };

        Self {
            level,
            status_flips,
            priority_direction,
            assignment_changes,
            ticket_count,
            summary,
        }
    }
}
