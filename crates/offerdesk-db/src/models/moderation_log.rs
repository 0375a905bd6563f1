//! Moderation log model.
//!
//! Append-only audit trail of approval-lifecycle transitions. Entries are
//! created, never updated or deleted; one entry per transition.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use super::user::ApprovalStatus;

/// An immutable moderation log entry.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModerationLogEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    /// What happened, e.g. `status_change` or `auto_approval`.
    pub action: String,
    pub previous_status: Option<ApprovalStatus>,
    pub new_status: Option<ApprovalStatus>,
    /// Acting moderator, or `system` for automated transitions.
    pub actor: String,
    pub reason: Option<String>,
    /// Free-form context (oracle diagnostics, event ids, ...).
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a moderation log entry.
#[derive(Debug, Clone)]
pub struct CreateModerationLogEntry {
    pub user_id: Uuid,
    pub action: String,
    pub previous_status: Option<ApprovalStatus>,
    pub new_status: Option<ApprovalStatus>,
    pub actor: String,
    pub reason: Option<String>,
    pub metadata: JsonValue,
}

impl ModerationLogEntry {
    /// Append a new entry.
    pub async fn create(
        pool: &sqlx::PgPool,
        input: &CreateModerationLogEntry,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO moderation_log (
                user_id, action, previous_status, new_status, actor, reason, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            ",
        )
        .bind(input.user_id)
        .bind(&input.action)
        .bind(input.previous_status)
        .bind(input.new_status)
        .bind(&input.actor)
        .bind(&input.reason)
        .bind(&input.metadata)
        .fetch_one(pool)
        .await
    }

    /// List entries for a user, newest first.
    pub async fn list_for_user(
        pool: &sqlx::PgPool,
        user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM moderation_log
            WHERE user_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Count entries for a user.
    pub async fn count_for_user(pool: &sqlx::PgPool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM moderation_log WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(pool)
                .await?;
        Ok(count.0)
    }
}
