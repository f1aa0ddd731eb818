//! # Domain Types
//!
//! Per-item sync bookkeeping, kept separate from the domain entity it tracks.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Bookkeeping                                │
//! │                                                                         │
//! │  ┌──────────────────────┐     ┌──────────────────────┐                 │
//! │  │     CommonData       │     │     LockRecord       │                 │
//! │  │  ──────────────────  │     │  ──────────────────  │                 │
//! │  │  id ─────────────────┼──┐  │  id                  │                 │
//! │  │  target_item_id      │  │  │  token               │                 │
//! │  │  action              │  │  │  limit_of_time       │                 │
//! │  │  last_modified       │  │  │  status              │                 │
//! │  └──────────────────────┘  │  └──────────────────────┘                 │
//! │                            ▼                                            │
//! │                ┌──────────────────────┐                                 │
//! │                │    CommonDataId      │  ordered by resource_name,     │
//! │                │  resource_name       │  then resource_item_id         │
//! │                │  resource_item_id    │                                 │
//! │                └──────────────────────┘                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! - `resource_item_id`: the identifier clients see and sync on
//! - `target_item_id`: the adapter's own storage key, never sent to clients

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch. All sync versions use this unit.
pub type Millis = i64;

// =============================================================================
// Common Data Id
// =============================================================================

/// Composite key of a synced item.
///
/// The derived ordering compares `resource_name` first, then
/// `resource_item_id`, which makes it usable as a deterministic merge key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonDataId {
    pub resource_name: String,
    pub resource_item_id: String,
}

impl CommonDataId {
    pub fn new(resource_name: impl Into<String>, resource_item_id: impl Into<String>) -> Self {
        CommonDataId {
            resource_name: resource_name.into(),
            resource_item_id: resource_item_id.into(),
        }
    }
}

impl fmt::Display for CommonDataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_name, self.resource_item_id)
    }
}

// =============================================================================
// Sync Action
// =============================================================================

/// The most recent mutation recorded for an item.
///
/// Only the latest action is kept; there is no history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    #[default]
    None,
    Create,
    Update,
    /// Tombstone: the domain element is gone but the row stays so other
    /// clients learn of the deletion.
    Delete,
    Duplicate,
    Conflict,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncAction::None => "NONE",
            SyncAction::Create => "CREATE",
            SyncAction::Update => "UPDATE",
            SyncAction::Delete => "DELETE",
            SyncAction::Duplicate => "DUPLICATE",
            SyncAction::Conflict => "CONFLICT",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Conflict Type
// =============================================================================

/// Why a precondition failed. Transient, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Server version is newer than the version the client declared.
    Update,
    /// Another unexpired token holds the item's lock.
    Lock,
    /// A create collided with an existing live item.
    Duplicate,
}

// =============================================================================
// Common Data
// =============================================================================

/// Sync bookkeeping record for one `(resource_name, resource_item_id)`.
///
/// ## Invariants
/// - exactly one row per id
/// - `last_modified` never decreases
/// - `action` reflects only the latest mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonData {
    pub id: CommonDataId,

    /// The adapter's own storage key.
    pub target_item_id: String,

    pub action: SyncAction,

    pub last_modified: Millis,

    /// Set while resolving a rejected operation; not stored or sent.
    #[serde(skip)]
    pub conflict_type: Option<ConflictType>,

    /// Row was read with write intent in the current request.
    #[serde(skip)]
    pub for_update: bool,

    /// Keep the pessimistic lock after a successful write.
    #[serde(skip)]
    pub keep_lock: bool,
}

impl CommonData {
    /// Builds the record written on the first successful create.
    pub fn created(id: CommonDataId, target_item_id: impl Into<String>, at: Millis) -> Self {
        CommonData {
            id,
            target_item_id: target_item_id.into(),
            action: SyncAction::Create,
            last_modified: at,
            conflict_type: None,
            for_update: false,
            keep_lock: false,
        }
    }

    /// Returns true if this row is a tombstone.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.action == SyncAction::Delete
    }

    /// Records a mutation.
    ///
    /// `last_modified` is clamped so it never moves backwards, even if the
    /// caller's clock does.
    pub fn touch(&mut self, action: SyncAction, at: Millis) {
        self.action = action;
        self.last_modified = self.last_modified.max(at);
    }
}

// =============================================================================
// Lock Record
// =============================================================================

/// Status of a pessimistic lock row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    #[default]
    Locked,
    Released,
}

/// A pessimistic lock on one item.
///
/// Lock rows live outside any storage transaction: they persist across
/// requests and become inert once `limit_of_time` passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub id: CommonDataId,
    pub token: String,
    /// Absolute expiry.
    pub limit_of_time: Millis,
    pub status: LockStatus,
}

impl LockRecord {
    /// Returns true while the lock is held and not expired.
    pub fn is_live(&self, now: Millis) -> bool {
        self.status == LockStatus::Locked && self.limit_of_time > now
    }

    /// Returns true if this lock stops `requester` from proceeding.
    ///
    /// Expired, released and self-held locks never block.
    pub fn blocks(&self, requester: Option<&str>, now: Millis) -> bool {
        self.is_live(now) && requester != Some(self.token.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
