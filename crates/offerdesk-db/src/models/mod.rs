//! Database models for the identity sync service.

pub mod credit_transaction;
pub mod moderation_log;
pub mod plan;
pub mod user;
pub mod user_plan;

pub use credit_transaction::{
    CreditTransaction, TX_FORFEITURE, TX_INITIAL_GRANT, TX_MANUAL_ADJUSTMENT,
};
pub use moderation_log::{CreateModerationLogEntry, ModerationLogEntry};
pub use plan::Plan;
pub use user::{ApprovalStatus, CreateUserRecord, UserRecord};
pub use user_plan::UserPlan;
