//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ENTITY FAILURES (caught per entity in bulk mode, mapping → failed)    │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  NotFound       │  │ PreconditionFail│  │  RemoteApi              │ │
//! │  │  local record   │  │ dependency not  │  │  transport, 4xx, 5xx,   │ │
//! │  │  missing        │  │ synced yet      │  │  timeout                │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │  ┌─────────────────┐                                                   │
//! │  │  Validation     │                                                   │
//! │  │  malformed data │                                                   │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! │  RUN FAILURES (abort the run, surfaced to the caller)                  │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Tenant state  │  │     Infrastructure      │ │
//! │  │  InvalidConfig  │  │  RunInProgress  │  │  Database               │ │
//! │  │  ConfigLoad     │  │  Integration    │  │  Serialization          │ │
//! │  │                 │  │  Disabled       │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tally_core::CoreError;
use tally_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Entity Failures
    // =========================================================================
    /// Local record missing.
    ///
    /// ## When This Occurs
    /// - Manual trigger with an id that does not exist for the tenant
    /// - Payment references an order that was removed
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A dependency has not been pushed yet.
    ///
    /// ## When This Occurs
    /// - Invoice sync before the order's customer is synced
    /// - Payment or refund sync before the order's invoice is synced
    #[error("{0}")]
    PreconditionFailed(String),

    /// The accounting system rejected the call or could not be reached.
    ///
    /// `status` is `None` for transport failures (timeout, connection refused).
    #[error("Accounting API error{}: {message}", http_status(.status))]
    RemoteApi {
        status: Option<u16>,
        message: String,
    },

    /// Local data the accounting system would reject.
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration or tenant settings.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Tenant State
    // =========================================================================
    /// Another run holds the tenant lock.
    #[error("A sync run is already in progress for tenant {tenant_id}")]
    RunInProgress { tenant_id: String },

    /// The tenant has not enabled the integration.
    #[error("Accounting integration is disabled for tenant {tenant_id}")]
    IntegrationDisabled { tenant_id: String },

    // =========================================================================
    // Infrastructure
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Failed to encode or decode a payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl SyncError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a transport-level RemoteApi error (no HTTP status).
    pub fn transport(message: impl Into<String>) -> Self {
        SyncError::RemoteApi {
            status: None,
            message: message.into(),
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => SyncError::NotFound { entity, id },
            other => SyncError::Database(other.to_string()),
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTimezone(_) => SyncError::InvalidConfig(err.to_string()),
            other => SyncError::Validation(other.to_string()),
        }
    }
}

impl From<tally_core::ValidationError> for SyncError {
    fn from(err: tally_core::ValidationError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else if err.is_decode() {
            format!("unreadable response: {}", err)
        } else {
            err.to_string()
        };
        SyncError::RemoteApi {
            status: err.status().map(|s| s.as_u16()),
            message,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidConfig(format!("invalid URL: {}", err))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if retrying later can succeed without changing local data.
    ///
    /// ## Retryable Errors
    /// - Remote API failures (network issues, 5xx, timeouts)
    /// - Preconditions (once the dependency syncs)
    /// - A concurrent run holding the lock
    ///
    /// Retries are admin-triggered; nothing here schedules one.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteApi { .. }
                | SyncError::PreconditionFailed(_)
                | SyncError::RunInProgress { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::IntegrationDisabled { .. }
        )
    }

    /// Returns true if the failure belongs to one entity and a batch may continue.
    pub fn is_entity_failure(&self) -> bool {
        matches!(
            self,
            SyncError::NotFound { .. }
                | SyncError::PreconditionFailed(_)
                | SyncError::RemoteApi { .. }
                | SyncError::Validation(_)
        )
    }
}
