//! # Lock Manager
//!
//! Hands out and takes back pessimistic lock tokens.
//!
//! ```text
//! client                         LockManager                    sync_locks
//!   │  lock(schedule/S1)              │                              │
//!   │ ───────────────────────────────►│  upsert if idle ────────────►│
//!   │ ◄─── LockRecord{token, limit} ──│                              │
//!   │                                 │                              │
//!   │  upload PUT S1, lockToken=token │                              │
//!   │ ───────────────────────────────►│  (pessimistic policy checks) │
//!   │                                 │  released after the write    │
//!   │                                 │  unless keepLock             │
//! ```
//!
//! Locks are taken on their own pooled connection and commit immediately.
//! They outlive requests and stop blocking once `limit_of_time` passes,
//! whether or not anyone unlocks them.

use async_trait::async_trait;
use concord_core::{CommonDataId, LockRecord, LockStatus, Millis, SyncError, SyncResult};
use concord_db::{Database, LockRepository};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::resource::Lockable;

/// Pool-backed [`Lockable`] implementation.
#[derive(Debug, Clone)]
pub struct LockManager {
    db: Database,
    repo: LockRepository,
    clock: Arc<dyn Clock>,
    default_ttl: Millis,
}

impl LockManager {
    pub fn new(db: Database, clock: Arc<dyn Clock>, default_ttl: Millis) -> Self {
        LockManager {
            db,
            repo: LockRepository::new(),
            clock,
            default_ttl,
        }
    }

    /// Deletes released and expired lock rows.
    pub async fn purge_expired(&self) -> SyncResult<u64> {
        let now = self.clock.now_millis();
        let mut conn = self.db.acquire().await?;
        let purged = self.repo.purge_expired(&mut conn, now).await?;

        if purged > 0 {
            info!(purged = purged, "Purged expired locks");
        }
        Ok(purged)
    }
}

#[async_trait]
impl Lockable for LockManager {
    async fn lock(&self, id: &CommonDataId, ttl: Option<Millis>) -> SyncResult<LockRecord> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl <= 0 {
            return Err(SyncError::BadRequest(format!("Lock ttl must be positive, got {}", ttl)));
        }

        let now = self.clock.now_millis();
        let record = LockRecord {
            id: id.clone(),
            token: Uuid::new_v4().to_string(),
            limit_of_time: now.saturating_add(ttl),
            status: LockStatus::Locked,
        };

        let mut conn = self.db.acquire().await?;
        if !self.repo.acquire(&mut conn, &record, now).await? {
            debug!(id = %id, "Lock is held by another client");
            return Err(SyncError::locked(id.clone()));
        }

        info!(
            resource = %id.resource_name,
            item_id = %id.resource_item_id,
            limit_of_time = record.limit_of_time,
            "Lock acquired"
        );
        Ok(record)
    }

    async fn unlock(&self, id: &CommonDataId, token: &str) -> SyncResult<()> {
        let now = self.clock.now_millis();
        let mut conn = self.db.acquire().await?;

        if self.repo.release(&mut conn, id, token).await? {
            info!(resource = %id.resource_name, item_id = %id.resource_item_id, "Lock released");
            return Ok(());
        }

        match self.repo.find(&mut conn, id).await? {
            Some(lock) if lock.blocks(Some(token), now) => Err(SyncError::locked(id.clone())),
            _ => Ok(()),
        }
    }
}
