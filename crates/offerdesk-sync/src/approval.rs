//! Approval lifecycle state machine.
//!
//! Owns the transition rules (who may move an account where), the
//! version-conditioned status write, and the side effects hanging off a
//! transition: the initial credit grant on approval, forfeiture on
//! rejection or suspension, the moderation log entry, and plan
//! re-resolution. The status write is the only fatal step; side effects
//! are logged and swallowed so a partial failure never rolls back an
//! already-committed transition.

use offerdesk_db::{
    ApprovalStatus, CreateModerationLogEntry, CreditTransaction, ModerationLogEntry, UserRecord,
    TX_FORFEITURE, TX_INITIAL_GRANT,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::occ::{self, Committed};
use crate::plans::{PlanResolver, UserRole};
use crate::retry::RetryPolicy;

/// Who is requesting a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionActor {
    /// Automated paths: sync engine, provider events, oracle outcomes.
    System,
    /// A human administrator, identified for the audit trail.
    Admin(String),
}

impl TransitionActor {
    /// Name recorded in actor columns and log entries.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            TransitionActor::System => "system",
            TransitionActor::Admin(who) => who,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, TransitionActor::Admin(_))
    }
}

/// Result of a transition request.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The row after the transition (or as found, for a no-op).
    pub user: UserRecord,
    /// False when the account already held the target status.
    pub changed: bool,
}

/// Transition rules. Administrators may perform any move, including
/// releasing locked accounts; automated actors may only promote pending
/// accounts or lock unlocked ones.
pub fn validate_transition(
    from: ApprovalStatus,
    to: ApprovalStatus,
    admin: bool,
) -> Result<(), SyncError> {
    if admin {
        return Ok(());
    }
    let allowed = match (from, to) {
        (ApprovalStatus::Pending, ApprovalStatus::Approved) => true,
        (
            ApprovalStatus::Pending | ApprovalStatus::Approved,
            ApprovalStatus::Rejected | ApprovalStatus::Suspended,
        ) => true,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition { from, to })
    }
}

/// Drives approval transitions and their side effects.
#[derive(Debug, Clone)]
pub struct ApprovalStateMachine {
    pool: PgPool,
    resolver: Arc<PlanResolver>,
    /// Credits granted on the first approval of an account.
    grant_amount: i64,
    db_retry: RetryPolicy<sqlx::Error>,
}

impl ApprovalStateMachine {
    #[must_use]
    pub fn new(pool: PgPool, grant_amount: i64, resolver: Arc<PlanResolver>) -> Self {
        Self {
            pool,
            resolver,
            grant_amount,
            db_retry: RetryPolicy::database(),
        }
    }

    /// Move `user` to `target`, performing side effects when this call
    /// wins the write.
    ///
    /// Requesting the status the account already holds is an idempotent
    /// no-op, not an error; the same applies when a concurrent writer
    /// lands the identical transition first. Side effects run only on the
    /// winning call, so double-delivered events cannot double-grant.
    pub async fn transition(
        &self,
        user: &UserRecord,
        target: ApprovalStatus,
        actor: &TransitionActor,
        reason: Option<&str>,
        role: UserRole,
    ) -> Result<TransitionOutcome, SyncError> {
        if user.approval_status == target {
            debug!(user_id = %user.id, status = %target, "Account already in target status");
            return Ok(TransitionOutcome {
                user: user.clone(),
                changed: false,
            });
        }

        validate_transition(user.approval_status, target, actor.is_admin())?;
        let previous = user.approval_status;

        let committed = self.commit_status(user.clone(), target, actor).await?;
        let changed = committed.was_applied();
        let updated = committed.into_inner();

        if !changed {
            // The concurrent winner owns the side effects.
            return Ok(TransitionOutcome {
                user: updated,
                changed: false,
            });
        }

        info!(
            user_id = %updated.id,
            from = %previous,
            to = %target,
            actor = actor.name(),
            "Approval status changed"
        );

        match target {
            ApprovalStatus::Approved => {
                if let Err(e) = self
                    .db_retry
                    .execute("grant_initial_credit", || {
                        self.grant_initial_credit(updated.id)
                    })
                    .await
                {
                    warn!(user_id = %updated.id, error = %e, "Initial credit grant failed after status change");
                }
            }
            ApprovalStatus::Rejected | ApprovalStatus::Suspended => {
                if let Err(e) = self
                    .db_retry
                    .execute("forfeit_credit", || self.forfeit_credit(updated.id))
                    .await
                {
                    warn!(user_id = %updated.id, error = %e, "Credit forfeiture failed after status change");
                }
            }
            ApprovalStatus::Pending => {}
        }

        let entry = CreateModerationLogEntry {
            user_id: updated.id,
            action: "status_change".to_string(),
            previous_status: Some(previous),
            new_status: Some(target),
            actor: actor.name().to_string(),
            reason: reason.map(str::to_string),
            metadata: serde_json::json!({}),
        };
        if let Err(e) = self
            .db_retry
            .execute("moderation_log", || {
                ModerationLogEntry::create(&self.pool, &entry)
            })
            .await
        {
            warn!(user_id = %updated.id, error = %e, "Failed to append moderation log entry");
        }

        if let Err(e) = self.resolver.assign(updated.id, target, role).await {
            warn!(user_id = %updated.id, error = %e, "Plan re-resolution failed after status change");
        }

        Ok(TransitionOutcome {
            user: updated,
            changed: true,
        })
    }

    async fn commit_status(
        &self,
        user: UserRecord,
        target: ApprovalStatus,
        actor: &TransitionActor,
    ) -> Result<Committed<UserRecord>, SyncError> {
        let id = user.id;
        let attempt_pool = self.pool.clone();
        let refetch_pool = self.pool.clone();
        let actor_name = actor.name().to_string();

        occ::commit_versioned(
            "status_change",
            user,
            move |row: UserRecord| {
                let pool = attempt_pool.clone();
                let actor = actor_name.clone();
                async move {
                    UserRecord::update_status(&pool, row.id, row.version, target, &actor).await
                }
            },
            move || {
                let pool = refetch_pool.clone();
                async move { UserRecord::find_by_id(&pool, id).await }
            },
            move |row| row.approval_status == target,
        )
        .await
    }

    /// Set the balance to the grant amount and co-write the ledger entry
    /// in one transaction. The zero-balance guard in the update makes a
    /// replayed approval a silent no-op.
    async fn grant_initial_credit(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        if self.grant_amount <= 0 {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        if UserRecord::grant_credit_in_tx(&mut tx, user_id, self.grant_amount).await? {
            CreditTransaction::create_in_tx(
                &mut tx,
                user_id,
                self.grant_amount,
                TX_INITIAL_GRANT,
                Some("initial approval grant"),
            )
            .await?;
        } else {
            debug!(%user_id, "Credit balance already non-zero; grant skipped");
        }
        tx.commit().await
    }

    /// Zero the balance and record the forfeited amount as a negative
    /// ledger entry, in one transaction.
    async fn forfeit_credit(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let forfeited = UserRecord::zero_credit_in_tx(&mut tx, user_id).await?;
        if forfeited > 0 {
            CreditTransaction::create_in_tx(
                &mut tx,
                user_id,
                -forfeited,
                TX_FORFEITURE,
                Some("balance cleared on account lock"),
            )
            .await?;
        }
        tx.commit().await
    }
}
