//! Read-only ticket views.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ticketdesk_core::ticket::{HistoryEntry, Ticket, TicketFilter, TicketStatus};

use crate::state::AppState;

/// Maximum allowed limit for ticket queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for ticket queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing tickets
#[derive(Debug, Deserialize)]
pub struct ListTicketsParams {
    /// Filter by status
    pub status: Option<String>,
    /// Filter by assignee
    pub assignee: Option<String>,
    /// Maximum number of tickets to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for listing tickets
#[derive(Debug, Serialize)]
pub struct ListTicketsResponse {
    pub tickets: Vec<Ticket>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Response for a ticket's audit trail
#[derive(Debug, Serialize)]
pub struct TicketHistoryResponse {
    pub ticket_id: String,
    pub entries: Vec<HistoryEntry>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TicketErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> (StatusCode, Json<TicketErrorResponse>) {
    (
        status,
        Json(TicketErrorResponse {
            error: error.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Get a ticket by ID
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, impl IntoResponse> {
    match state.ticket_store().get(&id) {
        Ok(Some(ticket)) => Ok(Json(ticket)),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Ticket not found: {}", id),
        )),
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// List tickets with optional filters
pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTicketsParams>,
) -> Result<Json<ListTicketsResponse>, impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = TicketFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref status) = params.status {
        match status.parse::<TicketStatus>() {
            Ok(status) => filter = filter.with_status(status),
            Err(_) => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown ticket status: {}", status),
                ));
            }
        }
    }

    if let Some(ref assignee) = params.assignee {
        filter = filter.with_assignee(assignee);
    }

    let tickets = match state.ticket_store().list(&filter) {
        Ok(tickets) => tickets,
        Err(e) => return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    };

    // Get total count (without pagination)
    let count_filter = TicketFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter.clone()
    };

    let total = match state.ticket_store().count(&count_filter) {
        Ok(count) => count,
        Err(e) => return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    };

    Ok(Json(ListTicketsResponse {
        tickets,
        total,
        limit,
        offset,
    }))
}

/// Audit history written by bulk applies, newest first
pub async fn get_ticket_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TicketHistoryResponse>, impl IntoResponse> {
    match state.ticket_store().get(&id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                format!("Ticket not found: {}", id),
            ));
        }
        Err(e) => return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }

    match state.ticket_store().history(&id) {
        Ok(entries) => Ok(Json(TicketHistoryResponse {
            ticket_id: id,
            entries,
        })),
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}
