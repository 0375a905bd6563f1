//! Signed webhook ingestion for identity provider events.
//!
//! Verifies the HMAC signature over (message id, timestamp, raw body),
//! parses the tagged `{type, data}` envelope and dispatches into the sync
//! engine. Verification failures are 4xx (the provider must not retry);
//! handler failures are 5xx so the provider's at-least-once delivery
//! retries against the idempotent engine; unknown event types are
//! acknowledged and ignored.

pub mod crypto;
pub mod error;
pub mod handlers;
pub mod payload;
pub mod router;

pub use error::{ErrorResponse, WebhookError};
pub use payload::WebhookEvent;
pub use router::{webhooks_router, WebhooksState};
