//! Axum router setup for the webhook endpoint.

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use offerdesk_sync::SyncEngine;

use crate::handlers;

/// Shared state for the webhook handler.
#[derive(Clone)]
pub struct WebhooksState {
    engine: Arc<SyncEngine>,
    signing_secret: Arc<str>,
}

impl WebhooksState {
    pub fn new(engine: Arc<SyncEngine>, signing_secret: String) -> Self {
        Self {
            engine,
            signing_secret: signing_secret.into(),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn signing_secret(&self) -> &str {
        &self.signing_secret
    }
}

/// Creates the webhook router.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        .route("/webhooks/identity", post(handlers::receive_event))
        .with_state(state)
}
