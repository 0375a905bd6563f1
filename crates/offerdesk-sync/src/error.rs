//! Error types for the synchronization engine.

use offerdesk_db::ApprovalStatus;
use thiserror::Error;

use crate::provider::ProviderError;

/// Synchronization engine errors.
///
/// The webhook surface maps these onto HTTP statuses: `MassSyncBlocked`
/// becomes a retry-later response, everything else that escapes the engine
/// is a server error the provider will redeliver against.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The mass-sync circuit breaker is tripped; no mutation was made.
    #[error("mass sync blocked: {count} mutations in the last {window_secs}s (ceiling {ceiling})")]
    MassSyncBlocked {
        count: usize,
        ceiling: usize,
        window_secs: u64,
    },

    /// The row disappeared between read and conditioned write.
    #[error("user record vanished during sync")]
    RecordVanished,

    /// A version-conditioned write kept conflicting after the single
    /// recovery retry.
    #[error("optimistic write conflict not resolved for {0}")]
    Conflict(String),

    /// The requested status transition is not permitted for this actor.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },

    /// No catalog entry matched the target plan, even via fallback search.
    #[error("plan catalog entry not found: {0}")]
    PlanNotFound(String),

    /// Identity provider call failed after retries.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SyncError {
    /// Check if this is the distinguished circuit-breaker error.
    #[must_use]
    pub fn is_mass_sync_blocked(&self) -> bool {
        matches!(self, SyncError::MassSyncBlocked { .. })
    }

    /// Check if this is the distinguished vanished-row error.
    #[must_use]
    pub fn is_record_vanished(&self) -> bool {
        matches!(self, SyncError::RecordVanished)
    }
}
