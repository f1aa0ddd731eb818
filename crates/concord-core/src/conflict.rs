//! # Conflict Resolution
//!
//! Decides what happens when a concurrency policy rejects a write.
//!
//! ## Resolution Outcomes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Rejected PUT / DELETE                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  strategy.resolve_conflict(kind, header, proposed, server)             │
//! │       │                                                                 │
//! │       ├── Conflict(server) → caller gets the server's current state    │
//! │       ├── Proceed          → the original operation goes ahead         │
//! │       └── Apply(element)   → write this element instead                │
//! │                              (a DELETE becomes a PUT)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Strategies are plain values behind a trait object, so a different one
//! can be configured without touching the Synchronizer.

use serde_json::Value;
use std::fmt::Debug;

use crate::header::{SyncRequestHeader, SyncResponse};
use crate::types::ConflictType;

/// What a strategy decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Signal the conflict, carrying the server's authoritative state.
    Conflict(SyncResponse<Value>),
    /// Carry out the client's operation as submitted.
    Proceed,
    /// Write this element in place of the client's.
    Apply(Value),
}

/// Pluggable decision on rejected writes.
pub trait ConflictResolutionStrategy: Send + Sync + Debug {
    /// Short name used in configuration and logs.
    fn name(&self) -> &'static str;

    /// Resolves a rejected write.
    ///
    /// `proposed` is `None` for DELETE.
    fn resolve_conflict(
        &self,
        kind: ConflictType,
        header: &SyncRequestHeader,
        proposed: Option<&Value>,
        server: &SyncResponse<Value>,
    ) -> Resolution;
}

// =============================================================================
// Client Resolving (default)
// =============================================================================

/// Never resolves on the server: the client receives the server's state and
/// decides what to resubmit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientResolving;

impl ConflictResolutionStrategy for ClientResolving {
    fn name(&self) -> &'static str {
        "client_resolving"
    }

    fn resolve_conflict(
        &self,
        _kind: ConflictType,
        _header: &SyncRequestHeader,
        _proposed: Option<&Value>,
        server: &SyncResponse<Value>,
    ) -> Resolution {
        Resolution::Conflict(server.clone())
    }
}

// =============================================================================
// Client Wins
// =============================================================================

/// Lets a stale write overwrite the server's state.
///
/// Only version conflicts are overridden. A lock held by another client is
/// still reported as a conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientWins;

impl ConflictResolutionStrategy for ClientWins {
    fn name(&self) -> &'static str {
        "client_wins"
    }

    fn resolve_conflict(
        &self,
        kind: ConflictType,
        _header: &SyncRequestHeader,
        _proposed: Option<&Value>,
        server: &SyncResponse<Value>,
    ) -> Resolution {
        match kind {
            ConflictType::Update => Resolution::Proceed,
            ConflictType::Lock | ConflictType::Duplicate => Resolution::Conflict(server.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::SyncMethod;
    use crate::types::{CommonData, CommonDataId};
    use serde_json::json;

    fn server() -> SyncResponse<Value> {
        let data = CommonData::created(CommonDataId::new("schedule", "S1"), "1", 150);
        SyncResponse::new(&data, Some(json!({"title": "server"})))
    }

    fn header() -> SyncRequestHeader {
        SyncRequestHeader::new("schedule", SyncMethod::Put, 200)
            .with_item("S1")
            .with_last_modified(100)
    }

    #[test]
    fn test_client_resolving_always_signals_server_state() {
        let proposed = json!({"title": "client"});
        let outcome = ClientResolving.resolve_conflict(
            ConflictType::Update,
            &header(),
            Some(&proposed),
            &server(),
        );

        assert_eq!(outcome, Resolution::Conflict(server()));
    }

    #[test]
    fn test_client_wins_overrides_only_version_conflicts() {
        let proposed = json!({"title": "client"});

        let outcome = ClientWins.resolve_conflict(ConflictType::Update, &header(), Some(&proposed), &server());
        assert_eq!(outcome, Resolution::Proceed);

        let outcome = ClientWins.resolve_conflict(ConflictType::Lock, &header(), Some(&proposed), &server());
        assert_eq!(outcome, Resolution::Conflict(server()));
    }
}
