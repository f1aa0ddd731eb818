//! # Adapter Skeleton
//!
//! [`SyncResource`] turns a `Readable + Writable` store into a full
//! [`SyncResourceAdapter`]: it keeps the common data records, consults the
//! concurrency policy and falls back to the conflict strategy.
//!
//! ## PUT / DELETE Precondition Path
//! ```text
//! get_for_update(id) ──► absent ──────────────────────────► NotFound
//!        │
//!        ▼
//! policy.can_update ──► Allow ─────────────────────────────► apply
//!        │
//!        └─► Stale / Locked
//!               │
//!               ▼
//!        strategy.resolve_conflict(kind, header, proposed, server)
//!               ├── Conflict(server) ──► UpdateConflict / LockConflict
//!               ├── Proceed ───────────► apply as submitted
//!               └── Apply(element) ────► PUT with that element
//!                                        (a DELETE is upgraded to PUT)
//! ```
//!
//! ## POST
//! ```text
//! explicit id, live record      ──► DuplicateConflict(existing item)
//! explicit id, tombstone        ──► RecreatePolicy::Revive  → revive
//!                                   RecreatePolicy::Reject  → UpdateConflict(tombstone)
//! explicit id in the server's
//! generated namespace, no record──► BadRequest
//! no record                     ──► insert + save_new
//!                                   save_new loses a race   → DuplicateConflict
//! ```

use async_trait::async_trait;
use concord_core::concurrency::Verdict;
use concord_core::{
    CommonData, CommonDataId, ConflictType, Resolution, SyncAction, SyncError, SyncRequestHeader,
    SyncResponse, SyncResult,
};
use concord_db::{DbError, SqliteConnection};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Lockable, Readable, RecreatePolicy, SyncResourceAdapter, Writable};
use crate::context::SyncContext;
use crate::lock::LockManager;

/// Generic sync adapter over a domain store.
#[derive(Debug)]
pub struct SyncResource<S> {
    store: S,
    locks: Option<LockManager>,
}

impl<S> SyncResource<S> {
    pub fn new(store: S) -> Self {
        SyncResource { store, locks: None }
    }

    /// Offers pessimistic locking on this resource.
    pub fn with_locks(mut self, locks: LockManager) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Builds the error a rejected write turns into.
fn conflict_error(kind: ConflictType, server: SyncResponse<Value>) -> SyncError {
    match kind {
        ConflictType::Update => SyncError::update_conflict(server),
        ConflictType::Lock => SyncError::locked_with_state(server),
        ConflictType::Duplicate => SyncError::duplicate_conflict(server),
    }
}

fn parse_element<E: serde::de::DeserializeOwned>(resource: &str, element: Value) -> SyncResult<E> {
    serde_json::from_value(element)
        .map_err(|e| SyncError::BadRequest(format!("Invalid {} element: {}", resource, e)))
}

// =============================================================================
// Read Path
// =============================================================================

impl<S: Readable> SyncResource<S> {
    /// Pairs a record with its element. Tombstones carry no element.
    async fn respond(&self, conn: &mut SqliteConnection, data: &CommonData) -> SyncResult<SyncResponse<Value>> {
        if data.is_tombstone() {
            return Ok(SyncResponse::new(data, None));
        }

        let element = self
            .store
            .fetch(conn, &data.target_item_id)
            .await?
            .ok_or_else(|| {
                SyncError::Invariant(format!(
                    "{} has a live sync record but no stored element '{}'",
                    data.id, data.target_item_id
                ))
            })?;

        SyncResponse::new(data, Some(element)).into_json()
    }

    async fn load(&self, conn: &mut SqliteConnection, ctx: &SyncContext, id: &CommonDataId) -> SyncResult<CommonData> {
        ctx.store
            .get_for_update(conn, id)
            .await?
            .ok_or_else(|| SyncError::NotFound(id.clone()))
    }
}

// =============================================================================
// Write Path
// =============================================================================

impl<S: Writable> SyncResource<S> {
    /// Runs the precondition check and, on rejection, the strategy.
    ///
    /// Returns `None` to carry out the operation as submitted, or the
    /// element a strategy chose to apply instead.
    async fn admit(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        data: &mut CommonData,
        proposed: Option<&Value>,
    ) -> SyncResult<Option<Value>> {
        let verdict = ctx.policy.can_update(conn, header, data).await?;
        let kind = match verdict.conflict_type() {
            None => return Ok(None),
            Some(kind) => kind,
        };
        data.conflict_type = Some(kind);

        let server = self.respond(conn, data).await?;
        match ctx.strategy.resolve_conflict(kind, header, proposed, &server) {
            Resolution::Conflict(server) => {
                warn!(
                    resource = %data.id.resource_name,
                    item_id = %data.id.resource_item_id,
                    kind = ?kind,
                    server_version = server.header.last_modified,
                    "Write rejected"
                );
                Err(conflict_error(kind, server))
            }
            Resolution::Proceed => {
                debug!(id = %data.id, kind = ?kind, strategy = ctx.strategy.name(), "Conflict overridden");
                Ok(None)
            }
            Resolution::Apply(resolved) => {
                debug!(id = %data.id, kind = ?kind, strategy = ctx.strategy.name(), "Conflict resolved");
                Ok(Some(resolved))
            }
        }
    }

    /// Applies an update to an admitted record.
    async fn write_update(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        mut data: CommonData,
        element: Value,
    ) -> SyncResult<SyncResponse<Value>> {
        if data.is_tombstone() {
            return Err(SyncError::NotFound(data.id));
        }

        let element: S::Element = parse_element(self.store.resource_name(), element)?;
        self.store.replace(conn, &data.target_item_id, &element).await?;

        data.touch(SyncAction::Update, header.request_time);
        let mut saved = ctx.store.save_updated(conn, &data).await?;
        saved.keep_lock = data.keep_lock;
        ctx.policy.after_write(conn, header, &saved).await?;

        debug!(id = %saved.id, version = saved.last_modified, "Updated");
        SyncResponse::new(&saved, Some(element)).into_json()
    }

    /// Builds the DuplicateConflict for a create that hit an existing item.
    async fn duplicate(&self, conn: &mut SqliteConnection, existing: &CommonData) -> SyncError {
        match self.respond(conn, existing).await {
            Ok(server) => {
                warn!(
                    resource = %existing.id.resource_name,
                    item_id = %existing.id.resource_item_id,
                    "Create collided with an existing item"
                );
                SyncError::duplicate_conflict(server)
            }
            Err(err) => err,
        }
    }

    async fn revive(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        tombstone: CommonData,
        element: S::Element,
    ) -> SyncResult<SyncResponse<Value>> {
        match self.store.recreate_policy() {
            RecreatePolicy::Reject => {
                let server = self.respond(conn, &tombstone).await?;
                warn!(id = %tombstone.id, "Re-create of a deleted item rejected");
                Err(SyncError::update_conflict(server))
            }
            RecreatePolicy::Revive => {
                let target = self.store.insert(conn, &element).await?;
                let revived = CommonData::created(tombstone.id, target, header.request_time);
                let mut saved = ctx.store.revive(conn, &revived).await?;
                saved.keep_lock = header.keep_lock;
                ctx.policy.after_write(conn, header, &saved).await?;

                debug!(id = %saved.id, "Re-created deleted item");
                SyncResponse::new(&saved, Some(element)).into_json()
            }
        }
    }
}

// =============================================================================
// Adapter Contract
// =============================================================================

#[async_trait]
impl<S: Writable> SyncResourceAdapter for SyncResource<S> {
    fn resource_name(&self) -> &str {
        self.store.resource_name()
    }

    async fn get(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
    ) -> SyncResult<SyncResponse<Value>> {
        let id = header.common_data_id()?;
        let data = ctx
            .store
            .find(conn, &id)
            .await?
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;

        if ctx.policy.can_read(conn, header, &data).await? == Verdict::Locked {
            warn!(resource = %id.resource_name, item_id = %id.resource_item_id, "Read refused: locked");
            return Err(SyncError::locked(id));
        }

        self.respond(conn, &data).await
    }

    async fn get_modified_since(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        item_ids: Option<&[String]>,
    ) -> SyncResult<Vec<SyncResponse<Value>>> {
        let since = header.last_modified.unwrap_or(0);
        let changed = ctx
            .store
            .find_modified_since(conn, self.store.resource_name(), since, item_ids)
            .await?;

        let mut responses = Vec::with_capacity(changed.len());
        for data in changed {
            if !ctx.policy.can_read(conn, header, &data).await?.is_allowed() {
                debug!(id = %data.id, "Omitted from batch read");
                continue;
            }
            responses.push(self.respond(conn, &data).await?);
        }

        Ok(responses)
    }

    async fn put(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        element: Value,
    ) -> SyncResult<SyncResponse<Value>> {
        let id = header.common_data_id()?;
        let mut data = self.load(conn, ctx, &id).await?;
        data.keep_lock = header.keep_lock;

        let element = match self.admit(conn, ctx, header, &mut data, Some(&element)).await? {
            Some(resolved) => resolved,
            None => element,
        };

        self.write_update(conn, ctx, header, data, element).await
    }

    async fn post(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        element: Value,
    ) -> SyncResult<SyncResponse<Value>> {
        let name = self.store.resource_name().to_string();
        let element: S::Element = parse_element(&name, element)?;

        let requested = match header.sync_data_id.as_deref() {
            Some(item_id) => {
                let id = CommonDataId::new(&name, item_id);

                if ctx.policy.can_write(conn, header, &id).await? == Verdict::Locked {
                    return Err(SyncError::locked(id));
                }

                match ctx.store.get_for_update(conn, &id).await? {
                    Some(existing) if existing.is_tombstone() => {
                        return self.revive(conn, ctx, header, existing, element).await;
                    }
                    Some(existing) => return Err(self.duplicate(conn, &existing).await),
                    None if self.store.id_codec().resolve(item_id).is_some() => {
                        // Reserved for ids the server allocates
                        return Err(SyncError::BadRequest(format!(
                            "'{}' uses the '{}' prefix reserved for server-allocated ids",
                            item_id,
                            self.store.id_codec().prefix()
                        )));
                    }
                    None => Some(id),
                }
            }
            None => None,
        };

        let target = self.store.insert(conn, &element).await?;
        let id = requested.unwrap_or_else(|| CommonDataId::new(&name, self.store.id_codec().generate(&target)));
        let data = CommonData::created(id, target, header.request_time);

        let mut saved = match ctx.store.save_new(conn, &data).await {
            Ok(saved) => saved,
            Err(DbError::UniqueViolation { .. }) => {
                // Another writer created the id after our check
                let existing = ctx.store.get(conn, &data.id).await?;
                return Err(self.duplicate(conn, &existing).await);
            }
            Err(err) => return Err(err.into()),
        };
        saved.keep_lock = header.keep_lock;
        ctx.policy.after_write(conn, header, &saved).await?;

        debug!(id = %saved.id, target = %saved.target_item_id, "Created");
        SyncResponse::new(&saved, Some(element)).into_json()
    }

    async fn delete(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
    ) -> SyncResult<SyncResponse<Value>> {
        let id = header.common_data_id()?;
        let mut data = self.load(conn, ctx, &id).await?;
        data.keep_lock = header.keep_lock;

        if let Some(resolved) = self.admit(conn, ctx, header, &mut data, None).await? {
            debug!(id = %id, "Delete upgraded to update by conflict resolution");
            return self.write_update(conn, ctx, header, data, resolved).await;
        }

        if data.is_tombstone() {
            debug!(id = %id, "Already deleted");
            return Ok(SyncResponse::new(&data, None));
        }

        self.store.remove(conn, &data.target_item_id).await?;

        data.touch(SyncAction::Delete, header.request_time);
        let mut saved = ctx.store.save_updated(conn, &data).await?;
        saved.keep_lock = data.keep_lock;
        ctx.policy.after_write(conn, header, &saved).await?;

        debug!(id = %saved.id, version = saved.last_modified, "Deleted");
        Ok(SyncResponse::new(&saved, None))
    }

    fn lockable(&self) -> Option<&dyn Lockable> {
        self.locks.as_ref().map(|locks| locks as &dyn Lockable)
    }
}
