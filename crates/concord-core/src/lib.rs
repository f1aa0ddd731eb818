//! # concord-core: Sync Data Model for Concord
//!
//! This crate holds everything the synchronization engine decides without
//! touching storage: the per-item bookkeeping record, request/response
//! headers, error kinds, version comparison and conflict resolution.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Concord Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Boundary layer (HTTP, JSON, status codes)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ DownloadRequest / UploadRequest        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            concord-sync (Synchronizer, adapters, policies)      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ concord-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌──────────┐   │   │
//! │  │   │   types   │  │  header   │  │ concurrency│  │ conflict │   │   │
//! │  │   │CommonData │  │ Request / │  │  Verdict   │  │ Strategy │   │   │
//! │  │   │LockRecord │  │ Response  │  │            │  │          │   │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └──────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    concord-db (Database Layer)                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - CommonData, CommonDataId, LockRecord, actions
//! - [`header`] - Sync request/response headers and parsing
//! - [`result`] - Deduplicating result sets and batch result types
//! - [`concurrency`] - Pure version and lock verdicts
//! - [`conflict`] - Conflict resolution strategies
//! - [`ids`] - Resource-item identifier codec
//! - [`error`] - Sync error kinds
//!
//! ## Example Usage
//!
//! ```rust
//! use concord_core::concurrency::{check_version, Verdict};
//!
//! // Client last saw version 100, server is at 150: the write is stale.
//! assert_eq!(check_version(100, 150), Verdict::Stale);
//! assert_eq!(check_version(150, 150), Verdict::Allow);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod concurrency;
pub mod conflict;
pub mod error;
pub mod header;
pub mod ids;
pub mod result;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{ClientResolving, ClientWins, ConflictResolutionStrategy, Resolution};
pub use error::{SyncError, SyncResult};
pub use header::{RawSyncRequestHeader, SyncMethod, SyncRequestHeader, SyncResponse, SyncResponseHeader};
pub use ids::ItemIdCodec;
pub use result::{ResultType, SyncResultSet};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// How far a download watermark is shifted back from the current time.
///
/// An upload racing with a download may commit after the download read its
/// snapshot but with a `lastModified` earlier than the download's completion.
/// Recording `now - RESULT_TIME_DELAY_MS` as the watermark makes the next
/// download pick such items up, at the cost of re-delivering anything
/// modified inside the window.
pub const RESULT_TIME_DELAY_MS: Millis = 120_000;

/// Default lifetime of a pessimistic lock, in seconds.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;
