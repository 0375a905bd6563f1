//! Inbound webhook handler.
//!
//! Verification happens against the raw body before anything is parsed.
//! Dispatch is idempotent end to end: the engine checks current state
//! before every mutation, so a redelivered or out-of-order event resolves
//! to a no-op rather than a duplicate write.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use offerdesk_sync::engine::ProfileUpdate;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::crypto;
use crate::error::{ApiResult, WebhookError};
use crate::payload::{self, AccountData, WebhookEvent};
use crate::router::WebhooksState;

/// Unique delivery id header.
pub const HEADER_MESSAGE_ID: &str = "webhook-id";
/// Delivery timestamp header (seconds since epoch).
pub const HEADER_TIMESTAMP: &str = "webhook-timestamp";
/// Hex HMAC-SHA256 signature header.
pub const HEADER_SIGNATURE: &str = "webhook-signature";

/// POST handler for provider events.
pub async fn receive_event(
    State(state): State<WebhooksState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let message_id = required_header(&headers, HEADER_MESSAGE_ID)?;
    let timestamp = required_header(&headers, HEADER_TIMESTAMP)?;
    let signature = required_header(&headers, HEADER_SIGNATURE)?;

    if !crypto::verify_signature(
        signature,
        state.signing_secret(),
        message_id,
        timestamp,
        &body,
    ) {
        warn!(message_id, "Webhook signature verification failed");
        return Err(WebhookError::InvalidSignature);
    }

    match payload::parse_event(&body)? {
        WebhookEvent::Created(data) => {
            let user_id = state.engine().sync(&data.id).await?;
            info!(message_id, external_id = %data.id, %user_id, "Created event processed");
        }
        WebhookEvent::Updated(data) => {
            let update = profile_update_from(data);
            let user_id = state.engine().handle_updated(&update).await?;
            info!(message_id, external_id = %update.external_id, %user_id, "Updated event processed");
        }
        WebhookEvent::Deleted(data) => {
            let deleted = state.engine().handle_deleted(&data.id).await?;
            info!(message_id, external_id = %data.id, deleted, "Deleted event processed");
        }
        WebhookEvent::Unknown { event_type } => {
            info!(message_id, event_type, "Ignoring unsupported event type");
        }
    }

    Ok(Json(json!({ "received": true })))
}

fn required_header<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingHeader(name))
}

/// Lenient metadata translation: a status string the catalog does not
/// recognize is dropped with a warning instead of bouncing the delivery.
fn profile_update_from(data: AccountData) -> ProfileUpdate {
    let approval_status = data
        .public_metadata
        .approval_status
        .as_deref()
        .and_then(|raw| match raw.parse() {
            Ok(status) => Some(status),
            Err(_) => {
                warn!(external_id = %data.id, raw, "Unrecognized approval status in metadata");
                None
            }
        });

    ProfileUpdate {
        external_id: data.id,
        first_name: data.first_name,
        last_name: data.last_name,
        avatar_url: data.avatar_url,
        approval_status,
    }
}
