//! Identity provider HTTP client tests against a mock server.

use std::time::Duration;

use offerdesk_db::ApprovalStatus;
use offerdesk_sync::{HttpIdentityProvider, IdentityProvider, ProviderError};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_for(server: &MockServer) -> HttpIdentityProvider {
    HttpIdentityProvider::new(
        server.uri(),
        "test-token".to_string(),
        Duration::from_millis(500),
    )
    .unwrap()
}

#[tokio::test]
async fn test_fetch_profile_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/idp_42"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "idp_42",
            "email": "ada@example.com",
            "first_name": "Ada",
            "last_name": null,
            "avatar_url": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let profile = provider_for(&server).fetch_profile("idp_42").await.unwrap();
    assert_eq!(profile.external_id, "idp_42");
    assert_eq!(profile.email, "ada@example.com");
    assert_eq!(profile.first_name.as_deref(), Some("Ada"));
    assert!(profile.last_name.is_none());
}

#[tokio::test]
async fn test_fetch_profile_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = provider_for(&server)
        .fetch_profile("idp_missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(ref id) if id == "idp_missing"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_fetch_profile_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = provider_for(&server).fetch_profile("idp_42").await.unwrap_err();
    assert!(matches!(err, ProviderError::Status { status: 503 }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_fetch_profile_decode_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = provider_for(&server).fetch_profile("idp_42").await.unwrap_err();
    assert!(matches!(err, ProviderError::Decode(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_mirror_status_patches_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/v1/users/idp_42/metadata"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(serde_json::json!({
            "public_metadata": { "approval_status": "approved" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    provider_for(&server)
        .mirror_status("idp_42", ApprovalStatus::Approved)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_mirror_status_failure_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let err = provider_for(&server)
        .mirror_status("idp_42", ApprovalStatus::Rejected)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Status { status: 422 }));
}
