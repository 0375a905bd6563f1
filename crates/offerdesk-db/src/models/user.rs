//! User record model.
//!
//! The user row is the single local source of identity state: it carries the
//! external identity-provider id (nullable, unique once set), the globally
//! unique email, the approval lifecycle status and the denormalized credit
//! balance. Every mutating write goes through a version-stamped statement
//! (`WHERE id = $1 AND version = $2`, `version = version + 1`) so concurrent
//! webhook deliveries cannot silently clobber each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Approval lifecycle status gating resource and credit access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "approval_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Suspended,
}

impl ApprovalStatus {
    /// Statuses that lock the account until an administrator intervenes.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, ApprovalStatus::Rejected | ApprovalStatus::Suspended)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Suspended => "suspended",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "suspended" => Ok(ApprovalStatus::Suspended),
            other => Err(format!("Invalid approval status: {other}")),
        }
    }
}

/// A user account synchronized from the identity provider.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRecord {
    /// Unique identifier for the user.
    pub id: Uuid,

    /// Identity-provider id. Nullable until the account is linked;
    /// unique across all rows once set.
    pub external_id: Option<String>,

    /// User's email address (globally unique).
    pub email: String,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,

    /// Current approval lifecycle status.
    pub approval_status: ApprovalStatus,

    /// When the account was approved (None if never approved).
    pub approved_at: Option<DateTime<Utc>>,
    /// Who approved the account ("system" for auto-approval).
    pub approved_by: Option<String>,
    /// When the account was rejected or suspended.
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,

    /// Denormalized credit balance. The credit ledger is authoritative;
    /// every balance mutation co-writes a ledger entry in the same
    /// transaction.
    pub credit_balance: i64,

    /// Monotonically increasing version counter for optimistic writes.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new user record.
#[derive(Debug, Clone)]
pub struct CreateUserRecord {
    pub external_id: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub approval_status: ApprovalStatus,
    /// Actor recorded on `approved_by` when created already approved.
    pub approved_by: Option<String>,
}

impl UserRecord {
    /// Find a user by ID.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a user by identity-provider id.
    pub async fn find_by_external_id(
        pool: &sqlx::PgPool,
        external_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(pool)
            .await
    }

    /// Find a user by email.
    pub async fn find_by_email(
        pool: &sqlx::PgPool,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    /// Create a user record inside an existing transaction.
    ///
    /// Approval timestamps are stamped when the record is born approved
    /// (auto-approval path). The credit balance starts at zero; grants go
    /// through [`UserRecord::grant_credit_in_tx`] so the ledger entry is
    /// co-written in the same transaction.
    pub async fn create_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        input: &CreateUserRecord,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO users (
                external_id, email, first_name, last_name, avatar_url,
                approval_status, approved_at, approved_by
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                CASE WHEN $6 = 'approved'::approval_status THEN NOW() END,
                CASE WHEN $6 = 'approved'::approval_status THEN $7 END
            )
            RETURNING *
            ",
        )
        .bind(&input.external_id)
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.avatar_url)
        .bind(input.approval_status)
        .bind(&input.approved_by)
        .fetch_one(&mut **tx)
        .await
    }

    /// Link the identity-provider id onto an existing row, conditioned on
    /// the version read earlier. Returns `None` when the condition did not
    /// match (conflict or vanished row); the caller decides which.
    ///
    /// Profile fields are refreshed opportunistically; owned child rows are
    /// untouched, so relinking never loses history.
    pub async fn link_external_id(
        pool: &sqlx::PgPool,
        id: Uuid,
        version: i64,
        external_id: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE users
            SET external_id = $3,
                first_name = COALESCE($4, first_name),
                last_name = COALESCE($5, last_name),
                avatar_url = COALESCE($6, avatar_url),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(version)
        .bind(external_id)
        .bind(first_name)
        .bind(last_name)
        .bind(avatar_url)
        .fetch_optional(pool)
        .await
    }

    /// Change the approval status, conditioned on `version`.
    ///
    /// Approval/rejection timestamps and actor columns are stamped inside
    /// the same statement. Returns `None` on version mismatch.
    pub async fn update_status(
        pool: &sqlx::PgPool,
        id: Uuid,
        version: i64,
        status: ApprovalStatus,
        actor: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE users
            SET approval_status = $3,
                approved_at = CASE WHEN $3 = 'approved'::approval_status
                                   THEN NOW() ELSE approved_at END,
                approved_by = CASE WHEN $3 = 'approved'::approval_status
                                   THEN $4 ELSE approved_by END,
                rejected_at = CASE WHEN $3 IN ('rejected'::approval_status,
                                               'suspended'::approval_status)
                                   THEN NOW() ELSE rejected_at END,
                rejected_by = CASE WHEN $3 IN ('rejected'::approval_status,
                                               'suspended'::approval_status)
                                   THEN $4 ELSE rejected_by END,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(version)
        .bind(status)
        .bind(actor)
        .fetch_optional(pool)
        .await
    }

    /// Refresh profile fields from a freshly fetched provider profile,
    /// conditioned on `version`.
    pub async fn update_profile(
        pool: &sqlx::PgPool,
        id: Uuid,
        version: i64,
        first_name: Option<&str>,
        last_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE users
            SET first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                avatar_url = COALESCE($5, avatar_url),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(version)
        .bind(first_name)
        .bind(last_name)
        .bind(avatar_url)
        .fetch_optional(pool)
        .await
    }

    /// Set the credit balance from zero to `amount` inside a transaction.
    ///
    /// The `credit_balance = 0` guard makes the grant replay-safe: a second
    /// delivery of the same approval event matches zero rows. Returns `true`
    /// when the grant was applied.
    pub async fn grant_credit_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        amount: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE users
            SET credit_balance = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND credit_balance = 0
            ",
        )
        .bind(id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Zero the credit balance inside a transaction, returning the balance
    /// that was forfeited (0 when there was nothing to zero).
    pub async fn zero_credit_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let previous: Option<(i64,)> =
            sqlx::query_as("SELECT credit_balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;

        let Some((balance,)) = previous else {
            return Ok(0);
        };
        if balance == 0 {
            return Ok(0);
        }

        sqlx::query(
            r"
            UPDATE users
            SET credit_balance = 0,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(balance)
    }

    /// Hard-delete a user row. Dependents cascade via foreign keys.
    pub async fn delete(pool: &sqlx::PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
