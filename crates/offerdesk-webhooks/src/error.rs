//! Error types for the webhook surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use offerdesk_sync::SyncError;
use serde::Serialize;

/// Webhook ingestion error variants.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// JSON error response returned by the webhook endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            WebhookError::MissingHeader(_) => (StatusCode::BAD_REQUEST, "missing_header"),
            WebhookError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            WebhookError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            // 503 invites redelivery once the window rolls over.
            WebhookError::Sync(e) if e.is_mass_sync_blocked() => {
                (StatusCode::SERVICE_UNAVAILABLE, "mass_sync_blocked")
            }
            // Any other engine failure is a 5xx so the provider redelivers.
            WebhookError::Sync(_) => (StatusCode::INTERNAL_SERVER_ERROR, "sync_failed"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, WebhookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mass_sync_blocked_maps_to_503() {
        let err = WebhookError::Sync(SyncError::MassSyncBlocked {
            count: 21,
            ceiling: 20,
            window_secs: 300,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_verification_failures_are_4xx() {
        assert_eq!(
            WebhookError::MissingHeader("webhook-id")
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::InvalidSignature.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_engine_failures_are_5xx() {
        let err = WebhookError::Sync(SyncError::RecordVanished);
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
