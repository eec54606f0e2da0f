//! Natural-language command endpoints.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::{error, info};

use ticketdesk_core::{CommandError, CommandOutcome, StageDurations};

use super::error::ApiError;
use crate::state::AppState;

/// Request body for submitting a command
#[derive(Debug, Deserialize)]
pub struct SubmitCommandBody {
    pub text: String,
}

/// Run a command through the pipeline and return its proposed change-set.
///
/// The pipeline runs in its own task so a client that goes away mid-request
/// cannot leave the command without its terminal event.
pub async fn submit_command(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitCommandBody>,
) -> Result<Json<CommandOutcome>, ApiError> {
    let orchestrator = Arc::clone(state.orchestrator());
    let handle = tokio::spawn(async move { orchestrator.execute(&body.text).await });

    match handle.await {
        Ok(Ok(outcome)) => {
            info!(
                command_id = %outcome.command_id,
                matches = outcome.result.match_count,
                changes = outcome.result.suggested_changes.len(),
                "Command ready for review"
            );
            Ok(Json(outcome))
        }
        Ok(Err(e)) => Err(e.into()),
        Err(e) => {
            error!("Command task failed: {}", e);
            Err(CommandError::internal(format!("Command task failed: {}", e)).into())
        }
    }
}

/// Mean stage durations over the history window, falling back to defaults.
pub async fn get_estimates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StageDurations>, ApiError> {
    Ok(Json(state.orchestrator().historical_estimates()?))
}
