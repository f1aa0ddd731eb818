//! # Repository Module
//!
//! SQL access for the synchronization engine's own tables.
//!
//! ## Connection Passing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Synchronizer                                                          │
//! │       │  let mut tx = db.begin().await?                                │
//! │       │                                                                 │
//! │       ├── db.sync_states().ensure(&mut tx, ..)    ← takes write lock   │
//! │       ├── db.common_data().get_for_update(&mut tx, ..)                 │
//! │       ├── adapter writes domain rows on &mut tx                        │
//! │       ├── db.common_data().save_updated(&mut tx, ..)                   │
//! │       │                                                                 │
//! │       └── tx.commit() or rollback                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Repositories hold no connection. Every method takes a
//! `&mut SqliteConnection`, either a pooled connection or a transaction.
//!
//! ## Available Repositories
//!
//! - [`CommonDataStore`](common_data::CommonDataStore) - Per-item version records
//! - [`LockRepository`](lock::LockRepository) - Pessimistic lock rows
//! - [`SyncStateRepository`](sync_state::SyncStateRepository) - Client cursors

pub mod common_data;
pub mod lock;
pub mod sync_state;
