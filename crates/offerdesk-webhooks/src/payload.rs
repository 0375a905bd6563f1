//! Tagged webhook payload parsing.
//!
//! The provider delivers a `{type, data}` envelope. Supported types parse
//! into a typed event; anything else lands in the `Unknown` branch, which
//! the handler acknowledges without doing work so new provider event types
//! never bounce deliveries.

use serde::Deserialize;
use serde_json::Value;

use crate::error::WebhookError;

/// Raw envelope shape; `data` stays untyped until the type is known.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// Account fields carried by `user.created` and `user.updated` events.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountData {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub public_metadata: AccountMetadata,
}

/// Provider-side metadata mirror.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountMetadata {
    /// Status string mirrored into provider metadata; parsed leniently by
    /// the handler.
    pub approval_status: Option<String>,
}

/// Only the id survives deletion events.
#[derive(Debug, Clone, Deserialize)]
pub struct DeletedData {
    pub id: String,
}

/// A parsed, dispatchable webhook event.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Created(AccountData),
    Updated(AccountData),
    Deleted(DeletedData),
    Unknown { event_type: String },
}

/// Parse the raw body into a typed event.
///
/// # Errors
///
/// `InvalidPayload` when the envelope is not JSON, or when a supported
/// type's `data` does not match its expected shape. Unknown types are not
/// errors.
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| WebhookError::InvalidPayload(format!("malformed envelope: {e}")))?;

    let event = match envelope.event_type.as_str() {
        "user.created" => WebhookEvent::Created(parse_data(&envelope)?),
        "user.updated" => WebhookEvent::Updated(parse_data(&envelope)?),
        "user.deleted" => WebhookEvent::Deleted(parse_data(&envelope)?),
        _ => WebhookEvent::Unknown {
            event_type: envelope.event_type,
        },
    };
    Ok(event)
}

fn parse_data<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, WebhookError> {
    serde_json::from_value(envelope.data.clone()).map_err(|e| {
        WebhookError::InvalidPayload(format!(
            "invalid data for {}: {e}",
            envelope.event_type
        ))
    })
}
