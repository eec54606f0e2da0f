//! Error responses for the command, change and ticket endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use ticketdesk_core::{CommandError, ErrorKind};

/// Error body: `{error, message, details, suggestion}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
    pub details: Value,
    pub suggestion: String,
}

/// A [`CommandError`] on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub CommandError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        status_for(self.0.kind)
    }
}

impl From<CommandError> for ApiError {
    fn from(error: CommandError) -> Self {
        Self(error)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidCommand | ErrorKind::AmbiguousCommand | ErrorKind::ValidationError => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::NoMatches => StatusCode::NOT_FOUND,
        ErrorKind::InvalidStateTransition | ErrorKind::InconsistentChanges => StatusCode::CONFLICT,
        ErrorKind::TooManyMatches
        | ErrorKind::HighImpactChanges
        | ErrorKind::InsufficientChanges => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let CommandError {
            kind,
            message,
            details,
            suggestion,
        } = self.0;
        (
            status,
            Json(ErrorResponse {
                error: kind,
                message,
                details,
                suggestion,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidCommand), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::TooManyMatches), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorKind::InconsistentChanges), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_body_shape() {
        let response = ApiError(CommandError::too_many_matches(40, 25)).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
