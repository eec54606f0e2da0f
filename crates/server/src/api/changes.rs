//! Bulk apply of admin-approved changes.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use ticketdesk_core::{
    events::TicketsUpdatedPayload,
    ticket::{ApprovedChange, HistoryEntry, Ticket},
    ServerEvent,
};

use super::error::ApiError;
use crate::state::AppState;

/// Request body for applying a change-set
#[derive(Debug, Deserialize)]
pub struct ApplyChangesBody {
    pub changes: Vec<ApprovedChange>,
}

/// Response for a committed change-set
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyChangesResponse {
    pub updated_tickets: Vec<Ticket>,
    pub history: Vec<HistoryEntry>,
}

/// Apply every change in one transaction, then tell connected clients which
/// tickets moved.
pub async fn apply_changes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApplyChangesBody>,
) -> Result<Json<ApplyChangesResponse>, ApiError> {
    let applied = state.executor().apply(&body.changes)?;

    let ticket_ids: Vec<String> = applied
        .updated_tickets
        .iter()
        .map(|t| t.id.clone())
        .collect();
    info!(count = ticket_ids.len(), "Applied change-set");
    state
        .hub()
        .broadcast(&ServerEvent::TicketsUpdated(TicketsUpdatedPayload {
            count: ticket_ids.len(),
            ticket_ids,
        }));

    Ok(Json(ApplyChangesResponse {
        updated_tickets: applied.updated_tickets,
        history: applied.history,
    }))
}
