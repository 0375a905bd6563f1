//! Credit ledger model.
//!
//! The ledger is authoritative for credit state: every mutation of the
//! denormalized `users.credit_balance` column co-writes a ledger entry in
//! the same transaction, and `balance_from_ledger` reconciles the two.
//! Entries are created, never updated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Transaction type for the one-time allotment granted on approval.
pub const TX_INITIAL_GRANT: &str = "INITIAL_GRANT";
/// Transaction type for balances zeroed on rejection or suspension.
pub const TX_FORFEITURE: &str = "FORFEITURE";
/// Transaction type for administrator-entered corrections.
pub const TX_MANUAL_ADJUSTMENT: &str = "MANUAL_ADJUSTMENT";

/// A signed credit ledger event.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Signed amount; positive for grants, negative for forfeitures.
    pub amount: i64,
    pub tx_type: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Append a ledger entry inside an existing transaction.
    pub async fn create_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        amount: i64,
        tx_type: &str,
        description: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO credit_transactions (user_id, amount, tx_type, description)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(user_id)
        .bind(amount)
        .bind(tx_type)
        .bind(description)
        .fetch_one(&mut **tx)
        .await
    }

    /// List ledger entries for a user, newest first.
    pub async fn list_for_user(
        pool: &sqlx::PgPool,
        user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Sum the ledger for a user. Should always equal the denormalized
    /// balance column; a mismatch means a co-write was lost.
    pub async fn balance_from_ledger(
        pool: &sqlx::PgPool,
        user_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let sum: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0) FROM credit_transactions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(sum.0)
    }

    /// Count entries of a given type for a user.
    pub async fn count_by_type(
        pool: &sqlx::PgPool,
        user_id: Uuid,
        tx_type: &str,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM credit_transactions WHERE user_id = $1 AND tx_type = $2",
        )
        .bind(user_id)
        .bind(tx_type)
        .fetch_one(pool)
        .await?;
        Ok(count.0)
    }
}
