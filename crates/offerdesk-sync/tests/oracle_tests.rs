//! Auto-approval oracle client tests against a mock HTTP server.
//!
//! The client must fail open to manual review: only a 200 with the
//! confirmation field set approves, and no transport outcome ever
//! surfaces as an error.

use std::time::Duration;

use offerdesk_sync::AutoApprovalClient;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> AutoApprovalClient {
    AutoApprovalClient::new(format!("{}/approval-check", server.uri()), Duration::from_millis(500))
        .unwrap()
}

#[tokio::test]
async fn test_confirmed_response_approves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/approval-check"))
        .and(body_json(serde_json::json!({
            "event": "user.approval_check",
            "data": { "email": "ada@example.com" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "approved": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let decision = client_for(&server).await.evaluate("ada@example.com").await;
    assert!(decision.approved);
    assert!(decision.diagnostic.is_none());
}

#[tokio::test]
async fn test_declined_response_routes_to_manual_review() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "approved": false
        })))
        .mount(&server)
        .await;

    let decision = client_for(&server).await.evaluate("ada@example.com").await;
    assert!(!decision.approved);
    assert!(decision.diagnostic.is_some());
}

#[tokio::test]
async fn test_server_error_does_not_approve() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let decision = client_for(&server).await.evaluate("ada@example.com").await;
    assert!(!decision.approved);
    assert!(decision.diagnostic.unwrap().contains("500"));
}

#[tokio::test]
async fn test_malformed_body_does_not_approve() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let decision = client_for(&server).await.evaluate("ada@example.com").await;
    assert!(!decision.approved);
    assert!(decision.diagnostic.unwrap().contains("JSON"));
}

#[tokio::test]
async fn test_missing_confirmation_field_does_not_approve() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "eligible": true
        })))
        .mount(&server)
        .await;

    let decision = client_for(&server).await.evaluate("ada@example.com").await;
    assert!(!decision.approved);
    assert!(decision.diagnostic.unwrap().contains("missing"));
}

#[tokio::test]
async fn test_timeout_falls_back_to_manual_review() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "approved": true }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    // Client timeout is 500 ms; the delayed 200 must not approve.
    let decision = client_for(&server).await.evaluate("ada@example.com").await;
    assert!(!decision.approved);
    assert!(decision.diagnostic.is_some());
}

#[tokio::test]
async fn test_unreachable_oracle_falls_back_to_manual_review() {
    // Nothing is listening on this port.
    let client =
        AutoApprovalClient::new("http://127.0.0.1:9/approval-check".to_string(), Duration::from_millis(500))
            .unwrap();
    let decision = client.evaluate("ada@example.com").await;
    assert!(!decision.approved);
    assert!(decision.diagnostic.unwrap().contains("request failed"));
}
