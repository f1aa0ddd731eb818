//! # Database Migrations
//!
//! Embedded SQL migrations for Concord.
//!
//! ## Schema
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  001_common_data.sql         one row per (resource, item), tombstones  │
//! │  002_sync_locks.sql          pessimistic lock rows                     │
//! │  003_client_sync_states.sql  storage ids, watermarks, last upload      │
//! │  004_schedules.sql           reference `schedule` resource             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// Idempotent: already-applied migrations are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(total_migrations, applied_migrations)`.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;

    Ok((total, applied as usize))
}
