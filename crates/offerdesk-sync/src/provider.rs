//! Identity provider client.
//!
//! Two outbound concerns: fetching the canonical profile for an account id,
//! and best-effort mirroring of the local approval status back into the
//! provider's metadata store. The trait seam exists so the engine can be
//! exercised against a fake provider in tests.

use async_trait::async_trait;
use offerdesk_db::ApprovalStatus;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Profile fields the provider holds for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProfile {
    pub external_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Identity provider call errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure (connect, timeout, TLS, ...).
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("identity provider returned status {status}")]
    Status { status: u16 },

    /// The account does not exist at the provider.
    #[error("account {0} not found at identity provider")]
    NotFound(String),

    /// Response body did not match the expected shape.
    #[error("failed to decode identity provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Timeouts, connection failures and 5xx responses are transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Status { status } => *status >= 500,
            ProviderError::NotFound(_) | ProviderError::Decode(_) => false,
        }
    }
}

/// Outbound port to the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch the profile for `external_id`.
    async fn fetch_profile(&self, external_id: &str) -> Result<IdentityProfile, ProviderError>;

    /// Mirror the local approval status into the provider's metadata store.
    ///
    /// Callers treat failures here as non-fatal.
    async fn mirror_status(
        &self,
        external_id: &str,
        status: ApprovalStatus,
    ) -> Result<(), ProviderError>;
}

/// Wire shape of the provider's user resource.
#[derive(Debug, Deserialize)]
struct ProfilePayload {
    id: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    avatar_url: Option<String>,
}

/// HTTP-backed provider client.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl HttpIdentityProvider {
    /// Create a client with a bounded per-request timeout.
    pub fn new(
        base_url: String,
        api_token: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn fetch_profile(&self, external_id: &str) -> Result<IdentityProfile, ProviderError> {
        let url = format!("{}/v1/users/{external_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(external_id.to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
            });
        }

        let payload: ProfilePayload = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(IdentityProfile {
            external_id: payload.id,
            email: payload.email,
            first_name: payload.first_name,
            last_name: payload.last_name,
            avatar_url: payload.avatar_url,
        })
    }

    async fn mirror_status(
        &self,
        external_id: &str,
        status: ApprovalStatus,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/v1/users/{external_id}/metadata", self.base_url);
        let response = self
            .http
            .patch(&url)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({
                "public_metadata": { "approval_status": status }
            }))
            .send()
            .await?;

        let http_status = response.status();
        if !http_status.is_success() {
            return Err(ProviderError::Status {
                status: http_status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(ProviderError::Status { status: 500 }.is_retryable());
        assert!(ProviderError::Status { status: 503 }.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!ProviderError::Status { status: 400 }.is_retryable());
        assert!(!ProviderError::NotFound("idp_1".into()).is_retryable());
        assert!(!ProviderError::Decode("bad json".into()).is_retryable());
    }
}
