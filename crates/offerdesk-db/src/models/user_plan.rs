//! User plan assignment model.
//!
//! Invariant: at most one active assignment per user at any committed
//! instant, enforced both here (single-transaction replacement) and by a
//! partial unique index on the table.

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::plan::Plan;

/// Links a user to a plan for a period of time.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserPlan {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserPlan {
    /// Find the active assignment for a user, if any.
    pub async fn find_active(
        pool: &sqlx::PgPool,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM user_plans WHERE user_id = $1 AND is_active")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Count all assignments (active or not) for a user.
    pub async fn count_for_user(pool: &sqlx::PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_plans WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
        Ok(count.0)
    }

    /// Replace the user's active assignment with `plan` atomically.
    ///
    /// Deactivates whatever is currently active (recording the cancellation
    /// reason and time) and inserts the new assignment in the same
    /// transaction, so a crash never leaves a user with zero or two active
    /// plans.
    pub async fn replace_active(
        pool: &sqlx::PgPool,
        user_id: Uuid,
        plan: &Plan,
        cancellation_reason: &str,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        let ends_at = if plan.duration_months > 0 {
            now.checked_add_months(Months::new(plan.duration_months as u32))
        } else {
            None
        };

        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
            UPDATE user_plans
            SET is_active = FALSE,
                cancelled_at = NOW(),
                cancellation_reason = $2
            WHERE user_id = $1 AND is_active
            ",
        )
        .bind(user_id)
        .bind(cancellation_reason)
        .execute(&mut *tx)
        .await?;

        let created: Self = sqlx::query_as(
            r"
            INSERT INTO user_plans (user_id, plan_id, starts_at, ends_at, is_active)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING *
            ",
        )
        .bind(user_id)
        .bind(plan.id)
        .bind(now)
        .bind(ends_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }
}
