//! Optimistic concurrency conflict recovery.
//!
//! Every mutating user-record write is a version-conditioned statement that
//! returns the updated row, or nothing when the condition did not match.
//! This module owns the recovery choreography so call sites don't
//! re-implement it: refetch on conflict, treat an already-applied target
//! value as success, retry exactly once against the fresh row, and turn a
//! vanished row into the distinguished [`SyncError::RecordVanished`].

use std::future::Future;
use tracing::debug;

use crate::error::SyncError;

/// How a versioned commit concluded.
#[derive(Debug, Clone)]
pub enum Committed<T> {
    /// This call performed the write.
    Applied(T),
    /// A concurrent writer already did the same logical work; the fresh
    /// row is returned as-is.
    AlreadyApplied(T),
}

impl<T> Committed<T> {
    /// Unwrap to the resulting row either way.
    pub fn into_inner(self) -> T {
        match self {
            Committed::Applied(row) | Committed::AlreadyApplied(row) => row,
        }
    }

    /// True when this call performed the write itself.
    #[must_use]
    pub fn was_applied(&self) -> bool {
        matches!(self, Committed::Applied(_))
    }
}

/// Run a version-conditioned write with single-retry conflict recovery.
///
/// `attempt` issues the conditioned write against the given row snapshot
/// and resolves to `None` when no row matched the condition. `refetch`
/// re-reads the row by id, resolving to `None` when it no longer exists.
/// `already_applied` decides whether a concurrently updated row already
/// holds the desired target value.
///
/// # Errors
///
/// - [`SyncError::RecordVanished`] when the row disappears between read
///   and write.
/// - [`SyncError::Conflict`] when the single recovery retry also loses.
pub async fn commit_versioned<T, A, AF, R, RF, P>(
    operation: &str,
    initial: T,
    mut attempt: A,
    mut refetch: R,
    already_applied: P,
) -> Result<Committed<T>, SyncError>
where
    A: FnMut(T) -> AF,
    AF: Future<Output = Result<Option<T>, sqlx::Error>>,
    R: FnMut() -> RF,
    RF: Future<Output = Result<Option<T>, sqlx::Error>>,
    P: Fn(&T) -> bool,
{
    if let Some(row) = attempt(initial).await? {
        return Ok(Committed::Applied(row));
    }

    // Conflict: someone committed between our read and write.
    let Some(fresh) = refetch().await? else {
        return Err(SyncError::RecordVanished);
    };

    if already_applied(&fresh) {
        debug!(operation, "Conflicting writer already applied the target value");
        return Ok(Committed::AlreadyApplied(fresh));
    }

    // One retry against the freshly read row.
    if let Some(row) = attempt(fresh).await? {
        return Ok(Committed::Applied(row));
    }

    match refetch().await? {
        None => Err(SyncError::RecordVanished),
        Some(_) => Err(SyncError::Conflict(operation.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory stand-in for a versioned row.
    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        version: i64,
        value: &'static str,
    }

    type Store = Arc<Mutex<Option<Row>>>;

    fn store_with(row: Row) -> Store {
        Arc::new(Mutex::new(Some(row)))
    }

    /// Conditioned write: succeeds only when the stored version matches the
    /// snapshot's version.
    fn cas_write(store: &Store, snapshot: Row, value: &'static str) -> Option<Row> {
        let mut guard = store.lock().unwrap();
        match guard.as_mut() {
            Some(row) if row.version == snapshot.version => {
                row.version += 1;
                row.value = value;
                Some(row.clone())
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_clean_commit() {
        let store = store_with(Row { version: 1, value: "old" });
        let snapshot = store.lock().unwrap().clone().unwrap();

        let result = commit_versioned(
            "test",
            snapshot,
            |row| {
                let store = Arc::clone(&store);
                async move { Ok(cas_write(&store, row, "new")) }
            },
            || {
                let store = Arc::clone(&store);
                async move { Ok(store.lock().unwrap().clone()) }
            },
            |row| row.value == "new",
        )
        .await
        .unwrap();

        assert!(result.was_applied());
        assert_eq!(result.into_inner().version, 2);
    }

    #[tokio::test]
    async fn test_conflict_with_already_applied_value_is_success() {
        // Stored row has moved on to version 5 and already holds the target.
        let store = store_with(Row { version: 5, value: "new" });
        let stale = Row { version: 1, value: "old" };

        let result = commit_versioned(
            "test",
            stale,
            |row| {
                let store = Arc::clone(&store);
                async move { Ok(cas_write(&store, row, "new")) }
            },
            || {
                let store = Arc::clone(&store);
                async move { Ok(store.lock().unwrap().clone()) }
            },
            |row| row.value == "new",
        )
        .await
        .unwrap();

        assert!(!result.was_applied());
        // Version untouched by us.
        assert_eq!(result.into_inner().version, 5);
    }

    #[tokio::test]
    async fn test_conflict_retries_once_against_fresh_row() {
        let store = store_with(Row { version: 3, value: "other" });
        let stale = Row { version: 1, value: "old" };

        let result = commit_versioned(
            "test",
            stale,
            |row| {
                let store = Arc::clone(&store);
                async move { Ok(cas_write(&store, row, "new")) }
            },
            || {
                let store = Arc::clone(&store);
                async move { Ok(store.lock().unwrap().clone()) }
            },
            |row| row.value == "new",
        )
        .await
        .unwrap();

        assert!(result.was_applied());
        let row = result.into_inner();
        assert_eq!(row.version, 4);
        assert_eq!(row.value, "new");
    }

    #[tokio::test]
    async fn test_vanished_row_is_distinguished() {
        let store: Store = Arc::new(Mutex::new(None));
        let stale = Row { version: 1, value: "old" };

        let result = commit_versioned(
            "test",
            stale,
            |row| {
                let store = Arc::clone(&store);
                async move { Ok(cas_write(&store, row, "new")) }
            },
            || {
                let store = Arc::clone(&store);
                async move { Ok(store.lock().unwrap().clone()) }
            },
            |row| row.value == "new",
        )
        .await;

        assert!(matches!(result, Err(SyncError::RecordVanished)));
    }

    #[tokio::test]
    async fn test_persistent_conflict_after_single_retry() {
        // The store bumps its version on every read, so the retry loses too.
        let store = store_with(Row { version: 10, value: "other" });
        let stale = Row { version: 1, value: "old" };

        let result = commit_versioned(
            "test",
            stale,
            |row| {
                let store = Arc::clone(&store);
                // Sabotage: bump the stored version before each attempt.
                async move {
                    if let Some(r) = store.lock().unwrap().as_mut() {
                        r.version += 1;
                    }
                    Ok(cas_write(&store, row, "new"))
                }
            },
            || {
                let store = Arc::clone(&store);
                async move { Ok(store.lock().unwrap().clone()) }
            },
            |row| row.value == "new",
        )
        .await;

        assert!(matches!(result, Err(SyncError::Conflict(_))));
    }
}
