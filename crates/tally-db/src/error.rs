//! Database error types.
//!
//! Everything here is an infrastructure failure from the sync engine's point
//! of view, except `NotFound`, which tally-sync turns into an entity failure.

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// No row for the requested id (local record or tenant settings).
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the write. `columns` is SQLite's
    /// `table.column` list.
    #[error("Duplicate row in {columns}")]
    Duplicate { columns: String },

    /// A row references a parent that does not exist
    /// (order → customer, refund → payment).
    #[error("Missing referenced row: {0}")]
    ForeignKey(String),

    /// A CHECK constraint or trigger rejected the write, e.g. `paid` on a
    /// customer mapping or an UPDATE against the sync log.
    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    /// A stored value could not be decoded (bad JSON, unknown enum, range).
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// The database stayed locked past the busy timeout, or no pooled
    /// connection became free in time.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    Query(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

/// Classifies sqlx errors by SQLite's message text.
///
/// ```text
/// UNIQUE constraint failed: t.c     → Duplicate { columns: "t.c" }
/// FOREIGN KEY constraint failed     → ForeignKey
/// CHECK constraint failed / RAISE   → ConstraintViolation
/// database is locked, PoolTimedOut  → Busy
/// ColumnDecode / Decode             → InvalidData
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if let Some(columns) = msg.strip_prefix("UNIQUE constraint failed: ") {
                    DbError::Duplicate {
                        columns: columns.to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKey(msg.to_string())
                } else if msg.contains("CHECK constraint failed") || msg.contains("append-only") {
                    DbError::ConstraintViolation(msg.to_string())
                } else if msg.contains("database is locked") {
                    DbError::Busy(msg.to_string())
                } else {
                    DbError::Query(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::Busy("no free connection".to_string()),

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),

            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::InvalidData(err.to_string())
            }

            other => DbError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::InvalidData(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
