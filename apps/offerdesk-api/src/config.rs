//! Application configuration loaded from environment variables.
//!
//! Fail-fast loading: required variables must be present and valid or the
//! process exits with a clear error before anything is wired up.

use offerdesk_db::ApprovalStatus;
use offerdesk_sync::AutoApprovalClient;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Maximum connections held by the pool.
    pub db_max_connections: u32,
    /// Socket address the HTTP server binds to.
    pub bind_addr: String,
    /// Log filter directive, e.g. "info,offerdesk=debug".
    pub log_filter: String,

    /// Shared secret for inbound webhook signatures.
    pub webhook_signing_secret: String,

    /// Identity provider API base URL.
    pub provider_base_url: String,
    /// Identity provider API token.
    pub provider_api_token: String,
    /// Per-request timeout for provider calls.
    pub provider_timeout: Duration,

    /// When true, new accounts require approval and the oracle is consulted.
    pub approval_required: bool,
    /// Status for new accounts when approval is not required.
    pub default_status: ApprovalStatus,
    /// Auto-approval oracle endpoint; None disables consultation.
    pub oracle_url: Option<String>,
    /// Per-request timeout for oracle calls.
    pub oracle_timeout: Duration,
    /// Credits granted on first approval.
    pub credit_grant_amount: i64,

    /// Mass-sync breaker rolling window.
    pub breaker_window: Duration,
    /// Mutations allowed inside one window.
    pub breaker_ceiling: usize,
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is absent or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 10)?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            log_filter: env::var("LOG_FILTER").unwrap_or_else(|_| "info".to_string()),

            webhook_signing_secret: require("WEBHOOK_SIGNING_SECRET")?,

            provider_base_url: require("IDENTITY_PROVIDER_URL")?,
            provider_api_token: require("IDENTITY_PROVIDER_TOKEN")?,
            provider_timeout: Duration::from_secs(parse_or("IDENTITY_PROVIDER_TIMEOUT_SECS", 10)?),

            approval_required: parse_or("APPROVAL_REQUIRED", true)?,
            default_status: parse_status_or("DEFAULT_APPROVAL_STATUS", ApprovalStatus::Approved)?,
            oracle_url: env::var("AUTO_APPROVAL_ORACLE_URL").ok(),
            oracle_timeout: Duration::from_secs(parse_or(
                "AUTO_APPROVAL_ORACLE_TIMEOUT_SECS",
                AutoApprovalClient::DEFAULT_TIMEOUT.as_secs(),
            )?),
            credit_grant_amount: parse_or("CREDIT_GRANT_AMOUNT", 100)?,

            breaker_window: Duration::from_secs(parse_or("MASS_SYNC_WINDOW_SECS", 300)?),
            breaker_ceiling: parse_or("MASS_SYNC_CEILING", 20)?,
        })
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.to_string(),
            message: e.to_string(),
        }),
    }
}

fn parse_status_or(name: &str, default: ApprovalStatus) -> Result<ApprovalStatus, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|e: String| ConfigError::InvalidValue {
            var: name.to_string(),
            message: e,
        }),
    }
}
