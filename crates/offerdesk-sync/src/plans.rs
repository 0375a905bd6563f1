//! Plan assignment resolution.
//!
//! Maps (approval status, role) to a target catalog plan and keeps the
//! user's active assignment in line with it. Assignment is idempotent and
//! upgrades are atomic: a crash never leaves a user with zero or two
//! active plans.

use offerdesk_db::{ApprovalStatus, Plan, UserPlan};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SyncError;
use crate::retry::RetryPolicy;

/// Catalog name of the admin plan.
pub const PLAN_UNLIMITED: &str = "Unlimited";
/// Catalog name of the plan approved members get.
pub const PLAN_BASIC: &str = "Basic";
/// Placeholder plan for accounts without resource access.
pub const PLAN_NO_ACCESS: &str = "No Access";

/// Coarse role classification used by the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Member,
    Admin,
}

/// Policy table: which plan a user in this (status, role) should hold.
#[must_use]
pub fn target_plan_name(status: ApprovalStatus, role: UserRole) -> &'static str {
    match (role, status) {
        (UserRole::Admin, _) => PLAN_UNLIMITED,
        (UserRole::Member, ApprovalStatus::Approved) => PLAN_BASIC,
        (UserRole::Member, _) => PLAN_NO_ACCESS,
    }
}

/// Fragment used for the fallback search when the exact catalog name is
/// gone (renamed entry). Deliberately loose so "Basic Plan" or
/// "No-Access (legacy)" still match.
fn fallback_fragment(name: &str) -> &'static str {
    match name {
        PLAN_UNLIMITED => "unlimited",
        PLAN_BASIC => "basic",
        _ => "access",
    }
}

/// Resolves and applies plan assignments.
#[derive(Debug, Clone)]
pub struct PlanResolver {
    pool: PgPool,
    db_retry: RetryPolicy<sqlx::Error>,
}

impl PlanResolver {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            db_retry: RetryPolicy::database(),
        }
    }

    /// Resolve the catalog entry for (status, role).
    ///
    /// Exact-name lookup first; when the entry is absent, a
    /// case-insensitive substring search ordered by display priority
    /// (descending for the top tier, ascending otherwise) so catalog
    /// renames don't silently break assignment.
    pub async fn resolve(&self, status: ApprovalStatus, role: UserRole) -> Result<Plan, SyncError> {
        let name = target_plan_name(status, role);

        if let Some(plan) = self
            .db_retry
            .execute("plan_lookup", || Plan::find_by_name(&self.pool, name))
            .await?
        {
            return Ok(plan);
        }

        let fragment = fallback_fragment(name);
        let descending = name == PLAN_UNLIMITED;
        debug!(name, fragment, "Exact plan name missing; using fallback search");

        self.db_retry
            .execute("plan_fallback_search", || {
                Plan::search_by_fragment(&self.pool, fragment, descending)
            })
            .await?
            .ok_or_else(|| SyncError::PlanNotFound(name.to_string()))
    }

    /// Ensure the user's active assignment matches the policy target.
    ///
    /// Idempotent: an already-correct active assignment is returned
    /// unchanged, never duplicated. Otherwise the old assignment is
    /// deactivated (with a cancellation reason) and the new one created in
    /// a single transaction.
    pub async fn assign(
        &self,
        user_id: Uuid,
        status: ApprovalStatus,
        role: UserRole,
    ) -> Result<UserPlan, SyncError> {
        let plan = self.resolve(status, role).await?;

        if let Some(active) = self
            .db_retry
            .execute("find_active_plan", || {
                UserPlan::find_active(&self.pool, user_id)
            })
            .await?
        {
            if active.plan_id == plan.id {
                debug!(%user_id, plan = %plan.name, "Active plan already matches target");
                return Ok(active);
            }
        }

        let reason = format!("replaced by {}", plan.name);
        let assigned = self
            .db_retry
            .execute("replace_active_plan", || {
                UserPlan::replace_active(&self.pool, user_id, &plan, &reason)
            })
            .await?;

        info!(%user_id, plan = %plan.name, "Plan assignment updated");
        Ok(assigned)
    }
}
