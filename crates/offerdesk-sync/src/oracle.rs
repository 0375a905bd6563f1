//! Auto-approval oracle client.
//!
//! Consults an external decision service with a candidate email. The client
//! fails open to manual review: HTTP 200 with the confirmation field set is
//! the only outcome that approves; every other outcome (non-200, timeout,
//! network error, malformed body, missing field) resolves to "do not
//! approve" with a diagnostic, never to an error. An unreachable oracle
//! must not block or corrupt account creation.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Field the oracle must set truthy in its response body to approve.
const CONFIRMATION_FIELD: &str = "approved";

/// Outcome of an oracle consultation. Always a normal value, never an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleDecision {
    pub approved: bool,
    /// Why the decision fell back to manual review, when it did.
    pub diagnostic: Option<String>,
}

impl OracleDecision {
    #[must_use]
    pub fn approve() -> Self {
        Self {
            approved: true,
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn not_approved(diagnostic: impl Into<String>) -> Self {
        Self {
            approved: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// HTTP client for the auto-approval oracle.
#[derive(Debug, Clone)]
pub struct AutoApprovalClient {
    http: reqwest::Client,
    endpoint: String,
}

impl AutoApprovalClient {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a client for the configured endpoint.
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }

    /// Ask the oracle whether `email` should be auto-approved.
    pub async fn evaluate(&self, email: &str) -> OracleDecision {
        let envelope = serde_json::json!({
            "event": "user.approval_check",
            "data": { "email": email }
        });

        let response = match self.http.post(&self.endpoint).json(&envelope).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "Oracle request failed; falling back to manual review");
                return OracleDecision::not_approved(format!("oracle request failed: {e}"));
            }
        };

        let status = response.status().as_u16();
        let body = response.bytes().await.ok();
        interpret(status, body.as_deref())
    }
}

/// Interpretation rule, pulled out of the transport for testability:
/// HTTP 200 AND the confirmation field truthy in a JSON body ⇒ approve;
/// anything else ⇒ not approved, with a diagnostic.
fn interpret(status: u16, body: Option<&[u8]>) -> OracleDecision {
    if status != 200 {
        return OracleDecision::not_approved(format!("oracle returned status {status}"));
    }

    let Some(bytes) = body else {
        return OracleDecision::not_approved("oracle response body was unreadable");
    };

    let json: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => {
            return OracleDecision::not_approved(format!("oracle response was not valid JSON: {e}"))
        }
    };

    match json.get(CONFIRMATION_FIELD) {
        Some(Value::Bool(true)) => OracleDecision::approve(),
        Some(_) => OracleDecision::not_approved("oracle declined approval"),
        None => OracleDecision::not_approved(format!(
            "confirmation field '{CONFIRMATION_FIELD}' missing from oracle response"
        )),
    }
}
