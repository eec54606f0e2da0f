//! Server-sent event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ticketdesk_core::{
    events::{ClientInfo, EventFrame, HubError},
    CommandError, ErrorKind,
};

use super::error::ApiError;
use crate::state::AppState;

/// Query parameters for opening a stream
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Stable id chosen by the client; a random one is assigned if absent
    pub client_id: Option<String>,
}

/// Response for the connected-clients view
#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    pub clients: Vec<ClientInfo>,
    pub count: usize,
}

fn to_sse(frame: EventFrame) -> Result<Event, Infallible> {
    Ok(Event::default().event(frame.event).data(frame.data))
}

/// Open an event stream. The hub registers the client and greets it with
/// `connected`; dropping the response body deregisters it.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let client_id = params
        .client_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let subscription = state.hub().subscribe(client_id).map_err(|e| match e {
        HubError::DuplicateClient(id) => CommandError::new(
            ErrorKind::InvalidStateTransition,
            format!("Client {} already has an open stream", id),
        )
        .with_details(serde_json::json!({ "client_id": id }))
        .with_suggestion("Close the other stream or connect with a different client_id"),
        other => CommandError::internal(other.to_string()),
    })?;
    debug!(client_id = %subscription.client_id(), "Opened event stream");

    Ok(Sse::new(subscription.map(to_sse)))
}

/// Snapshot of every connected stream.
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<ClientsResponse> {
    let clients = state.hub().clients();
    Json(ClientsResponse {
        count: clients.len(),
        clients,
    })
}
