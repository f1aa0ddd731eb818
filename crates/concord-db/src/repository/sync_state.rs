//! # Client Sync State Repository
//!
//! One row per storage id: when the client was first and last seen, the
//! watermark of its last download, and the last upload batch that committed.
//!
//! ## Retransmission Guard
//! ```text
//! upload(storage_id, last_upload_time = T)
//!      │
//!      ▼
//! row.last_upload_time == T ?
//!      ├── yes → return (storage_id, row.last_upload_sync_time), no mutation
//!      └── no  → run the batch; on commit record (T, sync_time)
//!               in the same transaction
//! ```

use concord_core::Millis;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};

const ENTITY: &str = "ClientSyncState";

/// A client's sync cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClientSyncState {
    pub storage_id: String,
    pub created_at: Millis,
    pub last_seen: Millis,
    pub last_download_time: Option<Millis>,
    pub last_upload_time: Option<Millis>,
    pub last_upload_sync_time: Option<Millis>,
}

impl ClientSyncState {
    /// Returns the recorded sync time if `last_upload_time` matches the last
    /// committed upload batch.
    pub fn replayed_sync_time(&self, last_upload_time: Millis) -> Option<Millis> {
        match (self.last_upload_time, self.last_upload_sync_time) {
            (Some(recorded), Some(sync_time)) if recorded == last_upload_time => Some(sync_time),
            _ => None,
        }
    }
}

/// Repository for client sync state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncStateRepository;

impl SyncStateRepository {
    pub fn new() -> Self {
        SyncStateRepository
    }

    /// Issues a fresh storage id for a client on first contact.
    pub async fn issue(&self, conn: &mut SqliteConnection, now: Millis) -> DbResult<String> {
        let storage_id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO client_sync_states (storage_id, created_at, last_seen)
            VALUES (?1, ?2, ?2)
            "#,
        )
        .bind(&storage_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        info!(storage_id = %storage_id, "Issued storage id");
        Ok(storage_id)
    }

    /// Registers `storage_id` if unknown and records that the client was
    /// seen.
    ///
    /// This is a write, so inside a transaction it takes SQLite's write lock.
    pub async fn ensure(&self, conn: &mut SqliteConnection, storage_id: &str, now: Millis) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO client_sync_states (storage_id, created_at, last_seen)
            VALUES (?1, ?2, ?2)
            ON CONFLICT (storage_id) DO UPDATE SET
                last_seen = MAX(client_sync_states.last_seen, excluded.last_seen)
            "#,
        )
        .bind(storage_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn find(&self, conn: &mut SqliteConnection, storage_id: &str) -> DbResult<Option<ClientSyncState>> {
        let state = sqlx::query_as::<_, ClientSyncState>(
            r#"
            SELECT storage_id, created_at, last_seen,
                   last_download_time, last_upload_time, last_upload_sync_time
            FROM client_sync_states
            WHERE storage_id = ?1
            "#,
        )
        .bind(storage_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(state)
    }

    pub async fn get(&self, conn: &mut SqliteConnection, storage_id: &str) -> DbResult<ClientSyncState> {
        self.find(conn, storage_id)
            .await?
            .ok_or_else(|| DbError::not_found(ENTITY, storage_id))
    }

    /// Records the watermark handed to the client by a download.
    pub async fn record_download(
        &self,
        conn: &mut SqliteConnection,
        storage_id: &str,
        watermark: Millis,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE client_sync_states SET last_download_time = ?2
            WHERE storage_id = ?1
            "#,
        )
        .bind(storage_id)
        .bind(watermark)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, storage_id));
        }

        debug!(storage_id = %storage_id, watermark = watermark, "Recorded download watermark");
        Ok(())
    }

    /// Records a committed upload batch. Run this in the batch's transaction.
    pub async fn record_upload(
        &self,
        conn: &mut SqliteConnection,
        storage_id: &str,
        last_upload_time: Millis,
        sync_time: Millis,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE client_sync_states SET
                last_upload_time = ?2,
                last_upload_sync_time = ?3
            WHERE storage_id = ?1
            "#,
        )
        .bind(storage_id)
        .bind(last_upload_time)
        .bind(sync_time)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, storage_id));
        }

        debug!(
            storage_id = %storage_id,
            last_upload_time = last_upload_time,
            sync_time = sync_time,
            "Recorded upload"
        );
        Ok(())
    }
}
