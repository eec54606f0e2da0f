//! Keyword-based interpreter pair.
//!
//! Understands commands of the form `<verb> [<filters>] [<target>]`:
//!
//! - verbs: close, resolve, reopen, mark/set/move ... as/to <status|priority>,
//!   escalate/raise, lower/deprioritize, assign/reassign ... to <name>, unassign
//! - filters: a status word (open, in progress, waiting, closed), a priority
//!   word (low, medium, high, urgent), `unassigned`, `assigned to <name>`,
//!   quoted text or `about <word>`

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::debug;

use super::{
    ChangeProposal, ChangeProposer, InterpreterError, ProposedChange, QueryInterpretation,
    QueryInterpreter,
};
use crate::config::MAX_MATCHES_HARD_CAP;
use crate::pipeline::ImpactAssessment;
use crate::ticket::{
    AssigneeFilter, Priority, Ticket, TicketQuery, TicketStatus, TicketStore, TicketUpdates,
};

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static ABOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:about|mentioning|containing)\s+([\w.-]+)").unwrap());
static ASSIGNED_TO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bassigned\s+to\s+([\w.@-]+)").unwrap());
static STATUS_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:as|to)\s+(in[ -]progress|open|waiting|closed)\b").unwrap()
});
static PRIORITY_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bto\s+(low|medium|high|urgent)(?:[ -]priority)?\b").unwrap()
});
static ASSIGN_TARGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bto\s+([\w.@-]+)\s*$").unwrap());
static IN_PROGRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bin[ -]progress\b").unwrap());
static PRIORITY_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(low|medium|high|urgent)\b").unwrap());

/// What a command asks to do to each matched ticket.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    SetStatus(TicketStatus),
    SetPriority(Priority),
    RaisePriority,
    LowerPriority,
    Assign(String),
    Unassign,
}

impl Action {
    fn describe(&self) -> String {
        match self {
            Action::SetStatus(status) => format!("set status to {}", status),
            Action::SetPriority(priority) => format!("set priority to {}", priority),
            Action::RaisePriority => "raise priority".to_string(),
            Action::LowerPriority => "lower priority".to_string(),
            Action::Assign(name) => format!("assign to {}", name),
            Action::Unassign => "remove the assignee".to_string(),
        }
    }

    /// Updates for `ticket`, or `None` when it already satisfies the action.
    fn updates_for(&self, ticket: &Ticket) -> Option<(TicketUpdates, String)> {
        match self {
            Action::SetStatus(status) if ticket.status != *status => Some((
                TicketUpdates::status(*status),
                format!("Status {} to {}", ticket.status, status),
            )),
            Action::SetPriority(priority) if ticket.priority != *priority => Some((
                TicketUpdates::priority(*priority),
                format!("Priority {} to {}", ticket.priority, priority),
            )),
            Action::RaisePriority => Priority::from_rank(ticket.priority.rank() + 1).map(|p| {
                (
                    TicketUpdates::priority(p),
                    format!("Priority raised from {} to {}", ticket.priority, p),
                )
            }),
            Action::LowerPriority => Priority::from_rank(ticket.priority.rank() - 1).map(|p| {
                (
                    TicketUpdates::priority(p),
                    format!("Priority lowered from {} to {}", ticket.priority, p),
                )
            }),
            Action::Assign(name) if ticket.assignee.as_deref() != Some(name.as_str()) => Some((
                TicketUpdates::assign(name.clone()),
                match &ticket.assignee {
                    Some(previous) => format!("Reassigned from {} to {}", previous, name),
                    None => format!("Assigned to {}", name),
                },
            )),
            Action::Unassign => ticket.assignee.as_ref().map(|previous| {
                (
                    TicketUpdates::unassign(),
                    format!("Unassigned from {}", previous),
                )
            }),
            _ => None,
        }
    }
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

fn parse_status(word: &str) -> Option<TicketStatus> {
    match word {
        "open" => Some(TicketStatus::Open),
        "waiting" => Some(TicketStatus::Waiting),
        "closed" => Some(TicketStatus::Closed),
        w if IN_PROGRESS.is_match(w) => Some(TicketStatus::InProgress),
        _ => None,
    }
}

fn parse_action(text: &str) -> Option<Action> {
    let text = text.to_lowercase();
    let priority_target = PRIORITY_TARGET
        .captures(&text)
        .and_then(|c| c[1].parse::<Priority>().ok());

    match first_word(&text) {
        "close" | "resolve" => Some(Action::SetStatus(TicketStatus::Closed)),
        "reopen" => Some(Action::SetStatus(TicketStatus::Open)),
        "unassign" => Some(Action::Unassign),
        "escalate" | "raise" | "bump" | "increase" => {
            Some(priority_target.map_or(Action::RaisePriority, Action::SetPriority))
        }
        "lower" | "deprioritize" | "decrease" => {
            Some(priority_target.map_or(Action::LowerPriority, Action::SetPriority))
        }
        "assign" | "reassign" => {
            let stripped = ASSIGNED_TO.replace_all(&text, "");
            ASSIGN_TARGET
                .captures(stripped.trim_end_matches(['.', '!']))
                .map(|c| Action::Assign(c[1].to_string()))
        }
        "mark" | "set" | "move" | "put" => {
            if let Some(status) = STATUS_TARGET
                .captures(&text)
                .and_then(|c| parse_status(&c[1]))
            {
                Some(Action::SetStatus(status))
            } else {
                priority_target.map(Action::SetPriority)
            }
        }
        _ => None,
    }
}

/// Extract the ticket filters from a command, ignoring the verb and its target.
fn parse_query(text: &str) -> TicketQuery {
    let mut query = TicketQuery::default();
    let lower = text.to_lowercase();

    let mut rest = lower.clone();
    if let Some(c) = QUOTED.captures(text) {
        query.text = Some(c[1].trim().to_string());
        rest = QUOTED.replace_all(&rest, " ").into_owned();
    } else if let Some(c) = ABOUT.captures(&lower) {
        query.text = Some(c[1].to_string());
        rest = ABOUT.replace_all(&rest, " ").into_owned();
    }

    if let Some(c) = ASSIGNED_TO.captures(&rest) {
        query.assignee = Some(AssigneeFilter::Is(c[1].to_string()));
    }
    rest = ASSIGNED_TO.replace_all(&rest, " ").into_owned();
    if rest.contains("unassigned") {
        query.assignee = Some(AssigneeFilter::Unassigned);
    }

    // Drop the action target so "mark waiting tickets as closed" filters on waiting
    rest = STATUS_TARGET.replace_all(&rest, " ").into_owned();
    rest = PRIORITY_TARGET.replace_all(&rest, " ").into_owned();
    if matches!(first_word(&rest), "assign" | "reassign") {
        rest = ASSIGN_TARGET.replace_all(rest.trim_end(), " ").into_owned();
    }
    let verb = first_word(&rest).to_string();
    let rest = rest.trim_start().trim_start_matches(verb.as_str());

    if IN_PROGRESS.is_match(rest) {
        query.status = Some(TicketStatus::InProgress);
    } else {
        query.status = rest
            .split(|c: char| !c.is_alphanumeric())
            .find_map(parse_status);
    }

    query.priority = PRIORITY_WORD
        .captures(rest)
        .and_then(|c| c[1].parse::<Priority>().ok());

    query
}

fn explain(query: &TicketQuery) -> String {
    let mut parts = Vec::new();
    if let Some(status) = query.status {
        parts.push(format!("status {}", status));
    }
    if let Some(priority) = query.priority {
        parts.push(format!("priority {}", priority));
    }
    match &query.assignee {
        Some(AssigneeFilter::Unassigned) => parts.push("no assignee".to_string()),
        Some(AssigneeFilter::Is(name)) => parts.push(format!("assigned to {}", name)),
        None => {}
    }
    if let Some(text) = &query.text {
        parts.push(format!("mentioning \"{}\"", text));
    }

    if parts.is_empty() {
        "No ticket filters found".to_string()
    } else {
        format!("Tickets with {}", parts.join(", "))
    }
}

/// Keyword query interpreter. With a store attached it also estimates the
/// match count by running the query.
#[derive(Default)]
pub struct KeywordQueryInterpreter {
    store: Option<Arc<dyn TicketStore>>,
}

impl KeywordQueryInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<dyn TicketStore>) -> Self {
        Self { store: Some(store) }
    }
}

#[async_trait]
impl QueryInterpreter for KeywordQueryInterpreter {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn interpret(&self, text: &str) -> Result<QueryInterpretation, InterpreterError> {
        let query = parse_query(text);
        let explanation = explain(&query);

        let estimated_matches = match (&self.store, query.filter_count()) {
            (Some(store), n) if n > 0 => store
                .query(&query, MAX_MATCHES_HARD_CAP + 1)
                .map_err(|e| InterpreterError::Backend(e.to_string()))?
                .len(),
            _ => 0,
        };

        debug!(?query, estimated_matches, "Interpreted command");
        Ok(QueryInterpretation {
            query,
            explanation,
            estimated_matches,
        })
    }
}

/// Keyword change proposer: applies the command's verb to every matched
/// ticket that does not already satisfy it.
#[derive(Debug, Default)]
pub struct KeywordChangeProposer;

impl KeywordChangeProposer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChangeProposer for KeywordChangeProposer {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn propose(
        &self,
        text: &str,
        tickets: &[Ticket],
    ) -> Result<ChangeProposal, InterpreterError> {
        let action = parse_action(text).ok_or_else(|| {
            InterpreterError::Unintelligible(format!("no supported action in \"{}\"", text))
        })?;

        let changes: Vec<ProposedChange> = tickets
            .iter()
            .filter_map(|ticket| {
                action
                    .updates_for(ticket)
                    .map(|(updates, rationale)| ProposedChange {
                        ticket_id: ticket.id.clone(),
                        updates,
                        rationale,
                    })
            })
            .collect();

        let rationale = format!(
            "{} of {} matched ticket(s) need changes to {}",
            changes.len(),
            tickets.len(),
            action.describe()
        );
        let impact = ImpactAssessment::assess(tickets, &changes);

        Ok(ChangeProposal {
            changes,
            rationale,
            impact,
        })
    }
}
