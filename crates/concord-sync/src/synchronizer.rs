//! # Synchronizer
//!
//! Applies a client's download or upload batch against the registered
//! resources.
//!
//! ## Upload Batch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                 │
//! │    ensure(storageId)              ← first statement takes the write    │
//! │    lastUploadTime already seen?  ── yes ─► COMMIT, replay old syncTime │
//! │                                                                         │
//! │    for message in submission order:                                    │
//! │      OK        → keep the response while resultType is still OK        │
//! │      conflict  → rollback-only; first one clears the OK responses and  │
//! │                  sets UPDATED; the server state joins the result       │
//! │      duplicate → DUPLICATEDID, stop here                               │
//! │      failure   → abort the request (transaction dropped)               │
//! │                                                                         │
//! │  rollback-only ? ROLLBACK : record_upload + COMMIT                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Download Batch
//! ```text
//! since     = lastSyncTime ?? recorded watermark ?? 0
//! watermark = now − result_time_delay
//! items     = ∪ getModifiedSince(since) over the queries   (one read tx)
//! record watermark, return { storageId, syncTime = watermark, items }
//! ```
//!
//! The watermark trails the clock so an upload committing while the download
//! runs is picked up by the next download. The price is that items changed
//! inside the delay window are delivered twice.

use concord_core::{
    CommonDataId, ConflictType, LockRecord, Millis, ResultType, SyncError, SyncMethod, SyncRequestHeader,
    SyncResponse, SyncResult, SyncResultSet,
};
use concord_db::{Database, DbError, LockRepository, SqliteConnection, SyncStateRepository};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::protocol::{DownloadRequest, DownloadResult, UploadMessage, UploadRequest, UploadResult};
use crate::registry::ResourceRegistry;
use crate::resource::{Lockable, SyncResourceAdapter};

/// Batch orchestrator.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    db: Database,
    registry: Arc<ResourceRegistry>,
    ctx: SyncContext,
    states: SyncStateRepository,
}

impl Synchronizer {
    pub fn new(db: Database, registry: ResourceRegistry, ctx: SyncContext) -> Self {
        info!(resources = registry.len(), "Synchronizer ready");
        Synchronizer {
            db,
            registry: Arc::new(registry),
            ctx,
            states: SyncStateRepository::new(),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the client's storage id, issuing one on first contact.
    async fn resolve_client(
        &self,
        conn: &mut SqliteConnection,
        storage_id: Option<String>,
        now: Millis,
    ) -> SyncResult<String> {
        match storage_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                self.states.ensure(conn, &id, now).await?;
                Ok(id)
            }
            None => Ok(self.states.issue(conn, now).await?),
        }
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Returns everything changed since the client's watermark.
    ///
    /// Always `OK`: reads never conflict. Items the concurrency policy
    /// refuses are left out.
    pub async fn download(&self, request: DownloadRequest) -> SyncResult<DownloadResult> {
        let now = self.ctx.clock.now_millis();
        let watermark = now - self.ctx.config.result_time_delay();

        let (storage_id, since) = {
            let mut conn = self.db.acquire().await?;
            let storage_id = self.resolve_client(&mut conn, request.storage_id, now).await?;
            let recorded = self.states.get(&mut conn, &storage_id).await?.last_download_time;
            (storage_id, request.last_sync_time.or(recorded).unwrap_or(0))
        };

        info!(
            storage_id = %storage_id,
            since = since,
            sync_time = watermark,
            queries = request.queries.len(),
            "Download batch started"
        );

        let mut items = SyncResultSet::new();
        let mut tx = self.db.begin().await?;

        for query in &request.queries {
            let adapter = self.registry.get(&query.resource_name)?;

            let mut header = SyncRequestHeader::new(&query.resource_name, SyncMethod::Get, now)
                .with_last_modified(since)
                .with_storage_id(&storage_id);
            header.lock_token = request.lock_token.clone();

            let changed = adapter
                .get_modified_since(&mut tx, &self.ctx, &header, query.item_ids.as_deref())
                .await?;

            debug!(resource = %query.resource_name, count = changed.len(), "Collected changes");
            items.extend(changed);
        }

        tx.commit().await.map_err(DbError::from)?;

        {
            let mut conn = self.db.acquire().await?;
            self.states.record_download(&mut conn, &storage_id, watermark).await?;
        }

        info!(
            storage_id = %storage_id,
            sync_time = watermark,
            items = items.len(),
            "Download batch complete"
        );

        Ok(DownloadResult {
            storage_id,
            sync_time: watermark,
            items,
        })
    }

    /// Reads a single item outside any batch.
    ///
    /// Lock expiry is judged against server time, not the client's
    /// `requestTime`.
    pub async fn get(&self, header: &SyncRequestHeader) -> SyncResult<SyncResponse<Value>> {
        let adapter = self.registry.get(&header.data_model_name)?;

        let mut header = header.clone();
        header.request_time = self.ctx.clock.now_millis();

        let mut conn = self.db.acquire().await?;
        adapter.get(&mut conn, &self.ctx, &header).await
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Applies an upload batch in submission order, all or nothing.
    ///
    /// Conflicts come back in the result. Only malformed messages, unknown
    /// resources, missing items, invariant violations and storage failures
    /// are errors; any of them aborts the batch with nothing applied.
    pub async fn upload(&self, request: UploadRequest) -> SyncResult<UploadResult> {
        let now = self.ctx.clock.now_millis();

        let storage_id = match request.storage_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => {
                let mut conn = self.db.acquire().await?;
                self.states.issue(&mut conn, now).await?
            }
        };

        let mut tx = self.db.begin().await?;
        self.states.ensure(&mut tx, &storage_id, now).await?;

        if let Some(last_upload_time) = request.last_upload_time {
            let state = self.states.get(&mut tx, &storage_id).await?;
            if let Some(sync_time) = state.replayed_sync_time(last_upload_time) {
                tx.commit().await.map_err(DbError::from)?;
                info!(
                    storage_id = %storage_id,
                    last_upload_time = last_upload_time,
                    sync_time = sync_time,
                    "Upload batch already applied, replaying outcome"
                );
                return Ok(UploadResult {
                    storage_id,
                    sync_time,
                    result_type: ResultType::Ok,
                    items: SyncResultSet::new(),
                    replayed: true,
                });
            }
        }

        let sync_time = self.ctx.clock.now_millis();
        info!(
            storage_id = %storage_id,
            messages = request.messages.len(),
            sync_time = sync_time,
            "Upload batch started"
        );

        let mut result_type = ResultType::Ok;
        let mut items = SyncResultSet::new();
        let mut rollback_only = false;

        for (index, message) in request.messages.into_iter().enumerate() {
            let outcome = self.apply(&mut tx, &storage_id, sync_time, message).await;

            let err = match outcome {
                Ok(response) => {
                    if result_type.is_ok() {
                        items.insert(response);
                    }
                    continue;
                }
                Err(err) => err,
            };

            let (kind, server) = match err.into_conflict() {
                Ok(conflict) => conflict,
                Err(failure) => {
                    error!(
                        storage_id = %storage_id,
                        message = index,
                        error = %failure,
                        "Upload batch aborted"
                    );
                    return Err(failure);
                }
            };

            warn!(
                storage_id = %storage_id,
                resource = %server.header.data_model_name,
                item_id = %server.header.sync_data_id,
                kind = ?kind,
                "Conflict in upload batch"
            );

            rollback_only = true;
            if result_type.is_ok() {
                items.clear();
                result_type = ResultType::Updated;
            }
            items.insert(server);

            if kind == ConflictType::Duplicate {
                result_type = ResultType::DuplicatedId;
                debug!(message = index, "Duplicate id ends the batch");
                break;
            }
        }

        if rollback_only {
            tx.rollback().await.map_err(DbError::from)?;
        } else {
            if let Some(last_upload_time) = request.last_upload_time {
                self.states
                    .record_upload(&mut tx, &storage_id, last_upload_time, sync_time)
                    .await?;
            }
            tx.commit().await.map_err(DbError::from)?;
        }

        info!(
            storage_id = %storage_id,
            result_type = %result_type,
            sync_time = sync_time,
            items = items.len(),
            "Upload batch complete"
        );

        Ok(UploadResult {
            storage_id,
            sync_time,
            result_type,
            items,
            replayed: false,
        })
    }

    /// Runs one upload message. Every write in a batch is stamped with the
    /// batch's sync time.
    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        storage_id: &str,
        sync_time: Millis,
        message: UploadMessage,
    ) -> SyncResult<SyncResponse<Value>> {
        let UploadMessage { mut header, element } = message;
        header.request_time = sync_time;
        header.storage_id = Some(storage_id.to_string());
        header.validate()?;

        let adapter: &Arc<dyn SyncResourceAdapter> = self.registry.get(&header.data_model_name)?;

        match header.sync_method {
            SyncMethod::Put => {
                let element = require_element(&header, element)?;
                adapter.put(conn, &self.ctx, &header, element).await
            }
            SyncMethod::Post => {
                let element = require_element(&header, element)?;
                adapter.post(conn, &self.ctx, &header, element).await
            }
            SyncMethod::Delete => adapter.delete(conn, &self.ctx, &header).await,
            SyncMethod::Get => Err(SyncError::BadRequest(format!(
                "GET on '{}' is not allowed in an upload batch",
                header.data_model_name
            ))),
        }
    }

    // =========================================================================
    // Locks
    // =========================================================================

    fn lockable(&self, resource_name: &str) -> SyncResult<&dyn Lockable> {
        self.registry.get(resource_name)?.lockable().ok_or_else(|| {
            SyncError::BadRequest(format!("Resource '{}' does not support locking", resource_name))
        })
    }

    /// Takes a pessimistic lock on an item.
    pub async fn lock(&self, id: &CommonDataId, ttl: Option<Millis>) -> SyncResult<LockRecord> {
        self.lockable(&id.resource_name)?.lock(id, ttl).await
    }

    pub async fn unlock(&self, id: &CommonDataId, token: &str) -> SyncResult<()> {
        self.lockable(&id.resource_name)?.unlock(id, token).await
    }

    /// Deletes lock rows that no longer block anyone.
    pub async fn purge_expired_locks(&self) -> SyncResult<u64> {
        let now = self.ctx.clock.now_millis();
        let mut conn = self.db.acquire().await?;
        Ok(LockRepository::new().purge_expired(&mut conn, now).await?)
    }
}

fn require_element(header: &SyncRequestHeader, element: Option<Value>) -> SyncResult<Value> {
    element.ok_or_else(|| {
        SyncError::BadRequest(format!(
            "{} on '{}' requires an element",
            header.sync_method, header.data_model_name
        ))
    })
}
