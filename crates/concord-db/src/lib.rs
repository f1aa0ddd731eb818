//! # concord-db: Database Layer for Concord
//!
//! SQLite persistence for the synchronization engine's bookkeeping.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Concord Data Flow                                │
//! │                                                                         │
//! │  Synchronizer (concord-sync)                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    concord-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ CommonDataStore│    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ LockRepository │    │ 001..004     │  │   │
//! │  │   │ Transactions  │    │ SyncStateRepo  │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Common data, locks, client sync state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concord_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("concord.db")).await?;
//!
//! let mut conn = db.acquire().await?;
//! let changed = db
//!     .common_data()
//!     .find_modified_since(&mut conn, "schedule", watermark, None)
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::common_data::CommonDataStore;
pub use repository::lock::LockRepository;
pub use repository::sync_state::{ClientSyncState, SyncStateRepository};

// Adapters write their domain rows on the same connection type
pub use sqlx::SqliteConnection;
