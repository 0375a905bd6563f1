//! Webhook endpoint tests for the verification and dispatch boundary.
//!
//! These exercise the paths that never reach the database: missing
//! headers, bad signatures, malformed payloads and unknown event types.
//! The pool is constructed lazily so no Postgres instance is needed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use offerdesk_sync::{
    BreakerConfig, HttpIdentityProvider, MassSyncBreaker, SyncEngine, SyncSettings,
};
use offerdesk_webhooks::handlers::{HEADER_MESSAGE_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use offerdesk_webhooks::{crypto, webhooks_router, WebhooksState};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

const SECRET: &str = "test-signing-secret";

fn test_router() -> axum::Router {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/offerdesk_test")
        .unwrap();
    let provider = HttpIdentityProvider::new(
        "http://127.0.0.1:9".to_string(),
        "token".to_string(),
        Duration::from_millis(100),
    )
    .unwrap();
    let engine = SyncEngine::new(
        pool,
        Arc::new(provider),
        None,
        Arc::new(MassSyncBreaker::new(BreakerConfig::default())),
        SyncSettings::default(),
    );
    webhooks_router(WebhooksState::new(Arc::new(engine), SECRET.to_string()))
}

fn signed_request(body: &str) -> Request<Body> {
    let message_id = "msg_1";
    let timestamp = "1706400000";
    let signature = crypto::compute_signature(SECRET, message_id, timestamp, body.as_bytes());
    Request::builder()
        .method("POST")
        .uri("/webhooks/identity")
        .header("content-type", "application/json")
        .header(HEADER_MESSAGE_ID, message_id)
        .header(HEADER_TIMESTAMP, timestamp)
        .header(HEADER_SIGNATURE, signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_missing_headers_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/identity")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"type":"user.created","data":{"id":"x"}}"#))
        .unwrap();

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_signature_rejected() {
    let body = r#"{"type":"user.created","data":{"id":"x"}}"#;
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/identity")
        .header("content-type", "application/json")
        .header(HEADER_MESSAGE_ID, "msg_1")
        .header(HEADER_TIMESTAMP, "1706400000")
        .header(HEADER_SIGNATURE, "deadbeef")
        .body(Body::from(body))
        .unwrap();

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_body_rejected() {
    let mut request = signed_request(r#"{"type":"user.created","data":{"id":"x"}}"#);
    *request.body_mut() = Body::from(r#"{"type":"user.created","data":{"id":"evil"}}"#);

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_event_type_acknowledged() {
    let request = signed_request(r#"{"type":"organization.created","data":{}}"#);

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_payload_rejected() {
    let request = signed_request("not json at all");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_supported_type_with_bad_data_shape_rejected() {
    let request = signed_request(r#"{"type":"user.deleted","data":{"missing":"id"}}"#);

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
