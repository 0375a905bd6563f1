//! Storage layer for the OfferDesk identity sync service.
//!
//! Exposes the persistent models the synchronization engine operates on
//! (user records, moderation log, credit ledger, plan catalog) together
//! with the crate-level [`DbError`] type and migration runner.
//!
//! All mutating writes on [`models::UserRecord`] are version-stamped:
//! they condition on the current `version` column and increment it as
//! part of the same statement, so cross-request correctness is enforced
//! at the storage boundary rather than with locks.

pub mod error;
pub mod migrations;
pub mod models;

pub use error::DbError;
pub use migrations::run_migrations;
pub use models::{
    ApprovalStatus, CreateModerationLogEntry, CreateUserRecord, CreditTransaction,
    ModerationLogEntry, Plan, UserPlan, UserRecord, TX_FORFEITURE, TX_INITIAL_GRANT,
    TX_MANUAL_ADJUSTMENT,
};
