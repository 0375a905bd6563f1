//! Plan catalog model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A subscription plan catalog entry.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    /// Assignment duration; `ends_at` on the user plan is start + this.
    pub duration_months: i32,
    /// Ordering key for the substring fallback search.
    pub display_priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Exact-name lookup among active plans.
    pub async fn find_by_name(
        pool: &sqlx::PgPool,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM plans WHERE name = $1 AND is_active")
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    /// Case-insensitive substring fallback, ordered by display priority.
    ///
    /// Used when a catalog entry has been renamed: ascending priority picks
    /// the cheapest match for lower tiers, descending picks the richest for
    /// the top tier.
    pub async fn search_by_fragment(
        pool: &sqlx::PgPool,
        fragment: &str,
        descending: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = if descending {
            r"
            SELECT * FROM plans
            WHERE name ILIKE '%' || $1 || '%' AND is_active
            ORDER BY display_priority DESC
            LIMIT 1
            "
        } else {
            r"
            SELECT * FROM plans
            WHERE name ILIKE '%' || $1 || '%' AND is_active
            ORDER BY display_priority ASC
            LIMIT 1
            "
        };
        sqlx::query_as(query).bind(fragment).fetch_optional(pool).await
    }
}
