//! # Resource Adapters
//!
//! How a concrete resource plugs into the engine.
//!
//! ## Capabilities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  An adapter implements the capabilities it has. There is no base       │
//! │  class to inherit from.                                                │
//! │                                                                         │
//! │  Readable   fetch(target_item_id) → element                            │
//! │  Writable   insert / replace / remove, id codec, recreate policy       │
//! │  Lockable   lock / unlock (LockManager provides it)                    │
//! │                                                                         │
//! │           ScheduleStore: Readable + Writable                           │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │   SyncResource<ScheduleStore>  (+ optional LockManager)                │
//! │                  │  bookkeeping, policy checks, conflict resolution    │
//! │                  ▼                                                      │
//! │   dyn SyncResourceAdapter  ← what the registry stores                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every method takes the connection of the batch transaction. Domain writes
//! made through it commit or roll back with the batch.

use async_trait::async_trait;
use concord_core::{CommonDataId, ItemIdCodec, LockRecord, Millis, SyncRequestHeader, SyncResponse, SyncResult};
use concord_db::SqliteConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

use crate::context::SyncContext;

pub mod schedule;
pub mod skeleton;

pub use schedule::{Schedule, ScheduleStore};
pub use skeleton::SyncResource;

// =============================================================================
// Recreate Policy
// =============================================================================

/// What a POST onto a tombstoned id does.
///
/// A POST onto a live id is always a `DuplicateConflict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreatePolicy {
    /// Create the item again under the same id. The record goes from
    /// DELETE back to CREATE.
    Revive,

    /// Refuse with an `UpdateConflict` carrying the tombstone, so the client
    /// learns the item was deleted.
    Reject,
}

// =============================================================================
// Capabilities
// =============================================================================

/// Read access to a resource's domain elements.
#[async_trait]
pub trait Readable: Send + Sync + Debug {
    type Element: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;

    /// Name clients use for this resource.
    fn resource_name(&self) -> &str;

    /// Loads the element stored under the adapter's own key.
    async fn fetch(&self, conn: &mut SqliteConnection, target_item_id: &str) -> SyncResult<Option<Self::Element>>;
}

/// Write access to a resource's domain elements.
#[async_trait]
pub trait Writable: Readable {
    /// Maps storage keys to the ids clients see.
    fn id_codec(&self) -> &ItemIdCodec;

    /// How a POST onto a tombstone is handled. Every writable resource must
    /// choose.
    fn recreate_policy(&self) -> RecreatePolicy;

    /// Stores a new element and returns its storage key.
    async fn insert(&self, conn: &mut SqliteConnection, element: &Self::Element) -> SyncResult<String>;

    /// Overwrites the element under `target_item_id`.
    async fn replace(
        &self,
        conn: &mut SqliteConnection,
        target_item_id: &str,
        element: &Self::Element,
    ) -> SyncResult<()>;

    /// Removes the element. The sync record stays behind as a tombstone.
    async fn remove(&self, conn: &mut SqliteConnection, target_item_id: &str) -> SyncResult<()>;
}

/// Pessimistic locking of items.
///
/// Locks live outside any batch transaction.
#[async_trait]
pub trait Lockable: Send + Sync + Debug {
    /// Takes the lock with a fresh token. `ttl` defaults to the configured
    /// lock lifetime.
    async fn lock(&self, id: &CommonDataId, ttl: Option<Millis>) -> SyncResult<LockRecord>;

    /// Releases the lock held by `token`.
    ///
    /// Releasing a lock that is already released, expired or gone succeeds.
    /// Fails `LockConflict` if a different live token holds it.
    async fn unlock(&self, id: &CommonDataId, token: &str) -> SyncResult<()>;
}

// =============================================================================
// Adapter Contract
// =============================================================================

/// The protocol the Synchronizer drives, with elements as JSON.
#[async_trait]
pub trait SyncResourceAdapter: Send + Sync + Debug {
    fn resource_name(&self) -> &str;

    /// Reads one item. A lock held by another client is a hard failure.
    async fn get(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
    ) -> SyncResult<SyncResponse<Value>>;

    /// Reads every item changed after `header.last_modified`, tombstones
    /// included. Items the policy refuses are left out.
    ///
    /// The caller still advances the client's watermark past a left-out
    /// item, so that client only sees it after its next change or with an
    /// explicit earlier `lastSyncTime`.
    async fn get_modified_since(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        item_ids: Option<&[String]>,
    ) -> SyncResult<Vec<SyncResponse<Value>>>;

    /// Updates an existing item.
    async fn put(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        element: Value,
    ) -> SyncResult<SyncResponse<Value>>;

    /// Creates an item, under `header.sync_data_id` if given.
    ///
    /// A client-chosen id that falls in the id codec's generated namespace
    /// and has no record is a `BadRequest`.
    async fn post(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
        element: Value,
    ) -> SyncResult<SyncResponse<Value>>;

    /// Deletes an item, leaving a tombstone.
    async fn delete(
        &self,
        conn: &mut SqliteConnection,
        ctx: &SyncContext,
        header: &SyncRequestHeader,
    ) -> SyncResult<SyncResponse<Value>>;

    /// Locking, if this resource offers it.
    fn lockable(&self) -> Option<&dyn Lockable> {
        None
    }
}
