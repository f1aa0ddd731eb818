//! # Error Types
//!
//! Error kinds for the synchronization engine.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  CONFLICTS (data, not failures)       HARD FAILURES                    │
//! │  ──────────────────────────────       ─────────────                    │
//! │  UpdateConflict    → UPDATED          NotFound                         │
//! │  LockConflict*     → UPDATED          UnknownResource                  │
//! │  DuplicateConflict → DUPLICATEDID     BadRequest                       │
//! │                                       Invariant (SyncException)        │
//! │  Each carries the server's current    Database / Serialization         │
//! │  state for the client to refetch.     Config*                          │
//! │                                                                         │
//! │  * LockConflict is a conflict only when raised on a write and it       │
//! │    carries server state. A read-time LockConflict is a hard failure.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Conflicts are returned as values carrying a payload rather than as a
//! hierarchy of exception types; the Synchronizer folds them into the
//! batch result.

use serde_json::Value;
use thiserror::Error;

use crate::header::SyncResponse;
use crate::types::{CommonDataId, ConflictType};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Every way a sync operation can end other than success.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Conflicts
    // =========================================================================
    /// The server holds a newer version than the client declared.
    #[error("Update conflict on {}: server version {}", .0.id(), .0.header.last_modified)]
    UpdateConflict(Box<SyncResponse<Value>>),

    /// A create collided with an existing live item.
    #[error("Duplicate id {}", .0.id())]
    DuplicateConflict(Box<SyncResponse<Value>>),

    /// Another unexpired token holds the lock.
    ///
    /// `server` is present when the conflict came from a write and was
    /// routed through the conflict strategy.
    #[error("{id} is locked by another client")]
    LockConflict {
        id: CommonDataId,
        server: Option<Box<SyncResponse<Value>>>,
    },

    // =========================================================================
    // Request Errors
    // =========================================================================
    /// The item or its common data does not exist.
    #[error("{0} not found")]
    NotFound(CommonDataId),

    /// No adapter is registered under this resource name.
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Sync bookkeeping is inconsistent with what the operation expects.
    #[error("Sync invariant violated: {0}")]
    Invariant(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

// =============================================================================
// Constructors
// =============================================================================

impl SyncError {
    pub fn update_conflict(server: SyncResponse<Value>) -> Self {
        SyncError::UpdateConflict(Box::new(server))
    }

    pub fn duplicate_conflict(server: SyncResponse<Value>) -> Self {
        SyncError::DuplicateConflict(Box::new(server))
    }

    /// Lock conflict on a read; no server state is disclosed.
    pub fn locked(id: CommonDataId) -> Self {
        SyncError::LockConflict { id, server: None }
    }

    /// Lock conflict on a write, carrying the server's current state.
    pub fn locked_with_state(server: SyncResponse<Value>) -> Self {
        SyncError::LockConflict {
            id: server.id(),
            server: Some(Box::new(server)),
        }
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns the conflict kind if this error is recoverable into a batch
    /// result.
    pub fn conflict_type(&self) -> Option<ConflictType> {
        match self {
            SyncError::UpdateConflict(_) => Some(ConflictType::Update),
            SyncError::DuplicateConflict(_) => Some(ConflictType::Duplicate),
            SyncError::LockConflict { server: Some(_), .. } => Some(ConflictType::Lock),
            _ => None,
        }
    }

    /// Returns true if this error is a conflict, i.e. data for the batch
    /// result rather than a failure.
    pub fn is_conflict(&self) -> bool {
        self.conflict_type().is_some()
    }

    /// Returns true if this error aborts the request.
    pub fn is_hard_failure(&self) -> bool {
        !self.is_conflict()
    }

    /// Splits a conflict into its kind and the server's state.
    ///
    /// Non-conflicts are handed back unchanged in `Err`.
    pub fn into_conflict(self) -> Result<(ConflictType, SyncResponse<Value>), SyncError> {
        match self {
            SyncError::UpdateConflict(server) => Ok((ConflictType::Update, *server)),
            SyncError::DuplicateConflict(server) => Ok((ConflictType::Duplicate, *server)),
            SyncError::LockConflict {
                server: Some(server),
                ..
            } => Ok((ConflictType::Lock, *server)),
            other => Err(other),
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_) | SyncError::ConfigSaveFailed(_)
        )
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommonData;

    fn server_state() -> SyncResponse<Value> {
        let data = CommonData::created(CommonDataId::new("schedule", "S1"), "1", 150);
        SyncResponse::new(&data, Some(serde_json::json!({"title": "standup"})))
    }

    #[test]
    fn test_conflicts_are_not_hard_failures() {
        assert!(SyncError::update_conflict(server_state()).is_conflict());
        assert!(SyncError::duplicate_conflict(server_state()).is_conflict());
        assert!(SyncError::locked_with_state(server_state()).is_conflict());

        assert!(SyncError::locked(CommonDataId::new("schedule", "S1")).is_hard_failure());
        assert!(SyncError::NotFound(CommonDataId::new("schedule", "S1")).is_hard_failure());
        assert!(SyncError::BadRequest("x".into()).is_hard_failure());
        assert!(SyncError::Invariant("x".into()).is_hard_failure());
    }

    #[test]
    fn test_into_conflict_returns_server_state() {
        let (kind, server) = SyncError::update_conflict(server_state())
            .into_conflict()
            .unwrap();
        assert_eq!(kind, ConflictType::Update);
        assert_eq!(server.header.last_modified, 150);

        let err = SyncError::UnknownResource("person".into());
        assert!(matches!(err.into_conflict(), Err(SyncError::UnknownResource(_))));
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::update_conflict(server_state());
        assert_eq!(err.to_string(), "Update conflict on schedule/S1: server version 150");

        let err = SyncError::NotFound(CommonDataId::new("schedule", "S9"));
        assert_eq!(err.to_string(), "schedule/S9 not found");
    }
}
