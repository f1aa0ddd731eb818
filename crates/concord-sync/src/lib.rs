//! # concord-sync: Synchronization Engine for Concord
//!
//! Applies the download and upload batches of disconnected clients against a
//! shared SQLite store.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Engine Architecture                        │
//! │                                                                         │
//! │  boundary layer (not part of this crate)                                │
//! │        │ DownloadRequest / UploadRequest                                │
//! │        ▼                                                                │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   Synchronizer (batch orchestrator)              │  │
//! │  │  storage ids, watermarks, ordering, rollback, idempotent replay  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ ResourceRegistry lookup                 │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │        SyncResource<S>  (dyn SyncResourceAdapter)                │  │
//! │  │                                                                  │  │
//! │  │  CommonDataStore ──► ConcurrencyPolicy ──► ConflictStrategy      │  │
//! │  │  (versions)          (optimistic /          (client resolving /  │  │
//! │  │                       pessimistic)           client wins)        │  │
//! │  │                               │                                  │  │
//! │  │                               ▼                                  │  │
//! │  │                 S: Readable + Writable  (e.g. ScheduleStore)     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  LockManager (Lockable)   lock tokens outside any batch transaction    │
//! │  SyncConfig + Clock       loaded once, shared through SyncContext      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`synchronizer`] - Download and upload batches
//! - [`protocol`] - Batch request and result types
//! - [`registry`] - Resource name to adapter map
//! - [`resource`] - Adapter capabilities, the generic skeleton and the
//!   reference `schedule` resource
//! - [`policy`] - Optimistic and pessimistic concurrency policies
//! - [`lock`] - Pessimistic lock tokens
//! - [`context`] - Collaborators shared by every adapter call
//! - [`config`] - TOML + environment configuration
//! - [`clock`] - Time source
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concord_sync::{
//!     DownloadQuery, DownloadRequest, ResourceRegistry, ScheduleStore, SyncConfig,
//!     SyncContext, SyncResource, Synchronizer, SystemClock,
//! };
//!
//! let config = Arc::new(SyncConfig::load_or_default(None));
//! let db = Database::new(config.db_config()).await?;
//! let ctx = SyncContext::new(config.clone(), Arc::new(SystemClock));
//!
//! let registry = ResourceRegistry::builder()
//!     .register(SyncResource::new(ScheduleStore::new()))?
//!     .build();
//!
//! let sync = Synchronizer::new(db, registry, ctx);
//! let result = sync
//!     .download(DownloadRequest::new(vec![DownloadQuery::all("schedule")]))
//!     .await?;
//! println!("{} changes, next watermark {}", result.items.len(), result.sync_time);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod context;
pub mod lock;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod resource;
pub mod synchronizer;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConcurrencyMode, ConflictStrategyKind, DatabaseSettings, SyncConfig, SyncSettings};
pub use context::SyncContext;
pub use lock::LockManager;
pub use policy::{ConcurrencyPolicy, OptimisticPolicy, PessimisticPolicy};
pub use protocol::{DownloadQuery, DownloadRequest, DownloadResult, UploadMessage, UploadRequest, UploadResult};
pub use registry::{ResourceRegistry, ResourceRegistryBuilder};
pub use resource::{
    Lockable, Readable, RecreatePolicy, Schedule, ScheduleStore, SyncResource, SyncResourceAdapter, Writable,
};
pub use synchronizer::Synchronizer;

pub use concord_core::{ResultType, SyncError, SyncResult};
