//! # Concurrency Policies
//!
//! Decide whether a read or write on one item may proceed.
//!
//! ## Variants
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    can_read     can_write (POST)   can_update (PUT/DEL) │
//! │                    ────────     ────────────────   ──────────────────── │
//! │  Optimistic        Allow        Allow              declared version     │
//! │                                                    vs server version    │
//! │                                                                         │
//! │  Pessimistic       lock check   lock check         lock check, then     │
//! │                                                    version check        │
//! │                                                                         │
//! │  after_write       -            release the requester's lock unless    │
//! │  (pessimistic)                  keep_lock is set                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Policies run on the caller's connection so lock lookups and releases are
//! part of the batch transaction. The time a lock is judged against is the
//! header's `request_time`, which the Synchronizer stamps with server time.

use async_trait::async_trait;
use concord_core::concurrency::{check_lock, check_version, Verdict};
use concord_core::{CommonData, CommonDataId, SyncRequestHeader, SyncResult};
use concord_db::{LockRepository, SqliteConnection};
use std::fmt::Debug;
use tracing::debug;

/// Read/write admission for one item.
#[async_trait]
pub trait ConcurrencyPolicy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// May the requester read this item?
    async fn can_read(
        &self,
        conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        data: &CommonData,
    ) -> SyncResult<Verdict>;

    /// May the requester create this id?
    async fn can_write(
        &self,
        conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        id: &CommonDataId,
    ) -> SyncResult<Verdict>;

    /// May the requester modify or delete this existing item?
    async fn can_update(
        &self,
        conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        data: &CommonData,
    ) -> SyncResult<Verdict>;

    /// Runs after a successful write, inside the same transaction.
    async fn after_write(
        &self,
        _conn: &mut SqliteConnection,
        _header: &SyncRequestHeader,
        _data: &CommonData,
    ) -> SyncResult<()> {
        Ok(())
    }
}

// =============================================================================
// Optimistic
// =============================================================================

/// Version comparison only. Never blocks reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticPolicy;

#[async_trait]
impl ConcurrencyPolicy for OptimisticPolicy {
    fn name(&self) -> &'static str {
        "optimistic"
    }

    async fn can_read(
        &self,
        _conn: &mut SqliteConnection,
        _header: &SyncRequestHeader,
        _data: &CommonData,
    ) -> SyncResult<Verdict> {
        Ok(Verdict::Allow)
    }

    async fn can_write(
        &self,
        _conn: &mut SqliteConnection,
        _header: &SyncRequestHeader,
        _id: &CommonDataId,
    ) -> SyncResult<Verdict> {
        Ok(Verdict::Allow)
    }

    async fn can_update(
        &self,
        _conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        data: &CommonData,
    ) -> SyncResult<Verdict> {
        let declared = header.declared_version()?;
        let verdict = check_version(declared, data.last_modified);

        debug!(
            id = %data.id,
            declared = declared,
            server = data.last_modified,
            verdict = ?verdict,
            "Optimistic version check"
        );

        Ok(verdict)
    }
}

// =============================================================================
// Pessimistic
// =============================================================================

/// Token locks on top of version comparison.
///
/// Only a live lock held by a different token blocks. Expired and released
/// rows are ignored whether or not they were ever cleaned up.
#[derive(Debug, Clone, Copy, Default)]
pub struct PessimisticPolicy {
    locks: LockRepository,
}

impl PessimisticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_verdict(
        &self,
        conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        id: &CommonDataId,
    ) -> SyncResult<Verdict> {
        let lock = self.locks.find(conn, id).await?;
        let verdict = check_lock(lock.as_ref(), header.lock_token.as_deref(), header.request_time);

        if !verdict.is_allowed() {
            debug!(id = %id, "Blocked by a lock held by another client");
        }

        Ok(verdict)
    }
}

#[async_trait]
impl ConcurrencyPolicy for PessimisticPolicy {
    fn name(&self) -> &'static str {
        "pessimistic"
    }

    async fn can_read(
        &self,
        conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        data: &CommonData,
    ) -> SyncResult<Verdict> {
        self.lock_verdict(conn, header, &data.id).await
    }

    async fn can_write(
        &self,
        conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        id: &CommonDataId,
    ) -> SyncResult<Verdict> {
        self.lock_verdict(conn, header, id).await
    }

    async fn can_update(
        &self,
        conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        data: &CommonData,
    ) -> SyncResult<Verdict> {
        let verdict = self.lock_verdict(conn, header, &data.id).await?;
        if !verdict.is_allowed() {
            return Ok(verdict);
        }

        Ok(check_version(header.declared_version()?, data.last_modified))
    }

    async fn after_write(
        &self,
        conn: &mut SqliteConnection,
        header: &SyncRequestHeader,
        data: &CommonData,
    ) -> SyncResult<()> {
        if data.keep_lock {
            return Ok(());
        }

        if let Some(token) = header.lock_token.as_deref() {
            if self.locks.release(conn, &data.id, token).await? {
                debug!(id = %data.id, "Released lock after write");
            }
        }

        Ok(())
    }
}
