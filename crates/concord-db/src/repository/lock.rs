//! # Lock Repository
//!
//! Pessimistic lock rows, one per protected item.
//!
//! ## Acquisition
//! ```text
//! INSERT ... ON CONFLICT DO UPDATE ... WHERE <row is idle>
//!
//!   no row                      → inserted          (1 row changed)
//!   released / expired row      → taken over        (1 row changed)
//!   live row, same token        → renewed           (1 row changed)
//!   live row, other token       → untouched         (0 rows changed)
//! ```
//!
//! The whole decision is one statement, so two concurrent acquirers of an
//! idle lock cannot both see 1 row changed.

use concord_core::{CommonDataId, LockRecord, LockStatus, Millis};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    resource_name: String,
    resource_item_id: String,
    token: String,
    limit_of_time: i64,
    status: LockStatus,
}

impl From<LockRow> for LockRecord {
    fn from(row: LockRow) -> Self {
        LockRecord {
            id: CommonDataId::new(row.resource_name, row.resource_item_id),
            token: row.token,
            limit_of_time: row.limit_of_time,
            status: row.status,
        }
    }
}

/// Repository for lock rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockRepository;

impl LockRepository {
    pub fn new() -> Self {
        LockRepository
    }

    /// Tries to take the lock for `lock.token`.
    ///
    /// Returns `true` if the lock is now held by that token.
    pub async fn acquire(&self, conn: &mut SqliteConnection, lock: &LockRecord, now: Millis) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_locks (resource_name, resource_item_id, token, limit_of_time, status)
            VALUES (?1, ?2, ?3, ?4, 'locked')
            ON CONFLICT (resource_name, resource_item_id) DO UPDATE SET
                token = excluded.token,
                limit_of_time = excluded.limit_of_time,
                status = 'locked'
            WHERE sync_locks.status = 'released'
               OR sync_locks.limit_of_time <= ?5
               OR sync_locks.token = excluded.token
            "#,
        )
        .bind(&lock.id.resource_name)
        .bind(&lock.id.resource_item_id)
        .bind(&lock.token)
        .bind(lock.limit_of_time)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        let acquired = result.rows_affected() == 1;
        debug!(id = %lock.id, acquired = acquired, "Lock acquisition");
        Ok(acquired)
    }

    /// Marks the lock released if `token` holds it.
    ///
    /// Returns `true` if a row was released.
    pub async fn release(&self, conn: &mut SqliteConnection, id: &CommonDataId, token: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_locks SET status = 'released'
            WHERE resource_name = ?1 AND resource_item_id = ?2 AND token = ?3
              AND status = 'locked'
            "#,
        )
        .bind(&id.resource_name)
        .bind(&id.resource_item_id)
        .bind(token)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Reads the lock row for an item, whatever its state.
    pub async fn find(&self, conn: &mut SqliteConnection, id: &CommonDataId) -> DbResult<Option<LockRecord>> {
        let row = sqlx::query_as::<_, LockRow>(
            r#"
            SELECT resource_name, resource_item_id, token, limit_of_time, status
            FROM sync_locks
            WHERE resource_name = ?1 AND resource_item_id = ?2
            "#,
        )
        .bind(&id.resource_name)
        .bind(&id.resource_item_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(LockRecord::from))
    }

    /// Deletes released and expired rows. Returns how many were removed.
    pub async fn purge_expired(&self, conn: &mut SqliteConnection, now: Millis) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_locks
            WHERE status = 'released' OR limit_of_time <= ?1
            "#,
        )
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn lock(token: &str, limit: Millis) -> LockRecord {
        LockRecord {
            id: CommonDataId::new("schedule", "S1"),
            token: token.to_string(),
            limit_of_time: limit,
            status: LockStatus::Locked,
        }
    }

    #[tokio::test]
    async fn test_only_one_live_holder() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let locks = db.locks();
        let mut conn = db.acquire().await.unwrap();

        assert!(locks.acquire(&mut conn, &lock("a", 1_000), 0).await.unwrap());
        assert!(!locks.acquire(&mut conn, &lock("b", 1_500), 500).await.unwrap());

        // Same token renews
        assert!(locks.acquire(&mut conn, &lock("a", 2_000), 500).await.unwrap());

        let held = locks.find(&mut conn, &lock("a", 0).id).await.unwrap().unwrap();
        assert_eq!(held.token, "a");
        assert_eq!(held.limit_of_time, 2_000);
    }

    #[tokio::test]
    async fn test_expired_and_released_locks_can_be_taken() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let locks = db.locks();
        let mut conn = db.acquire().await.unwrap();
        let id = CommonDataId::new("schedule", "S1");

        assert!(locks.acquire(&mut conn, &lock("a", 1_000), 0).await.unwrap());
        // Expired at 1_000
        assert!(locks.acquire(&mut conn, &lock("b", 3_000), 1_000).await.unwrap());

        assert!(!locks.release(&mut conn, &id, "a").await.unwrap());
        assert!(locks.release(&mut conn, &id, "b").await.unwrap());
        assert_eq!(
            locks.find(&mut conn, &id).await.unwrap().unwrap().status,
            LockStatus::Released
        );

        assert!(locks.acquire(&mut conn, &lock("c", 4_000), 1_500).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let locks = db.locks();
        let mut conn = db.acquire().await.unwrap();

        let mut other = lock("b", 10_000);
        other.id = CommonDataId::new("schedule", "S2");

        locks.acquire(&mut conn, &lock("a", 1_000), 0).await.unwrap();
        locks.acquire(&mut conn, &other, 0).await.unwrap();

        assert_eq!(locks.purge_expired(&mut conn, 5_000).await.unwrap(), 1);
        assert!(locks.find(&mut conn, &lock("a", 0).id).await.unwrap().is_none());
        assert!(locks.find(&mut conn, &other.id).await.unwrap().is_some());
    }
}
