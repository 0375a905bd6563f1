//! Identity synchronization and approval-lifecycle engine.
//!
//! Reconciles the identity provider's account state with the local user
//! record under concurrent, at-least-once, possibly out-of-order webhook
//! delivery. Correctness rests on three pieces:
//!
//! - every user-record write is version-conditioned ([`occ`]),
//! - every transition checks current state before mutating ([`approval`]),
//! - transient infrastructure failures are retried with bounded backoff
//!   ([`retry`]) while the auto-approval oracle fails open ([`oracle`]).
//!
//! The [`engine::SyncEngine`] is the single entry point webhook handlers
//! dispatch into.

pub mod approval;
pub mod breaker;
pub mod engine;
pub mod error;
pub mod occ;
pub mod oracle;
pub mod plans;
pub mod provider;
pub mod retry;

pub use approval::{ApprovalStateMachine, TransitionActor, TransitionOutcome};
pub use breaker::{BreakerConfig, MassSyncBreaker};
pub use engine::{ProfileUpdate, SyncEngine, SyncSettings};
pub use error::SyncError;
pub use oracle::{AutoApprovalClient, OracleDecision};
pub use plans::{PlanResolver, UserRole};
pub use provider::{HttpIdentityProvider, IdentityProfile, IdentityProvider, ProviderError};
pub use retry::RetryPolicy;
