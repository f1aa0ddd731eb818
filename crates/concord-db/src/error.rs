//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ├── UniqueViolation on common_data → caught by the adapter       │
//! │       │   skeleton and turned into a DuplicateConflict                 │
//! │       ▼                                                                 │
//! │  SyncError::Database / SyncError::Invariant                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Synchronizer aborts the batch (hard failure)                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use concord_core::SyncError;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Row not found.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - An update that requires an existing row touched nothing
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two first-creators race on the same common data id
    /// - A storage id collides (practically never, they are UUIDs)
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// A row exists but is in a state the statement does not accept.
    ///
    /// ## When This Occurs
    /// - Reviving a common data row that is not a tombstone
    #[error("Invalid state for {entity} {id}: {message}")]
    InvalidState {
        entity: String,
        id: String,
        message: String,
    },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Another connection held the write lock for longer than the busy
    /// timeout.
    #[error("Database is busy")]
    Busy,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl ToString) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.to_string(),
        }
    }

    pub fn invalid_state(entity: impl Into<String>, id: impl ToString, message: impl Into<String>) -> Self {
        DbError::InvalidState {
            entity: entity.into(),
            id: id.to_string(),
            message: message.into(),
        }
    }

    /// Returns true for a UNIQUE constraint failure.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>, ..."
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("database is locked") || msg.contains("database is busy") {
                    DbError::Busy
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Storage failures surface to the engine as hard failures.
///
/// ```text
/// DbError::InvalidState   → SyncError::Invariant
/// everything else         → SyncError::Database
/// ```
///
/// Missing rows and unique violations that mean something to the sync
/// protocol are intercepted before this conversion runs.
impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidState { .. } => SyncError::Invariant(err.to_string()),
            other => SyncError::Database(other.to_string()),
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
