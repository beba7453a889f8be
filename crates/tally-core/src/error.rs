//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Local data unfit for export                    │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tally-sync errors (separate crate)                                    │
//! │  └── SyncError        - NotFound / PreconditionFailed / RemoteApi /    │
//! │                         Validation + infrastructure                    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → Sync Log entry        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::{InvoiceStatus, MappingKind, MappingStatus};

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The translator refused an invoice status edge.
    ///
    /// ## When This Occurs
    /// - Paid → Invoiced (payments are never "un-registered")
    /// - Anything → Draft or Cancelled from the sync engine
    ///
    /// ## User Workflow
    /// ```text
    /// transition_invoice_status(order, Invoiced)
    ///      │
    ///      ▼
    /// mapping.status = paid
    ///      │
    ///      ▼
    /// InvalidStatusTransition { from: Paid, to: Invoiced }
    /// ```
    #[error("Invoice status cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// A mapping status that does not exist for this entity kind.
    #[error("Mapping status '{status}' is not valid for {kind} mappings")]
    StatusNotAllowed {
        kind: MappingKind,
        status: MappingStatus,
    },

    /// An order with no line items cannot become an invoice.
    #[error("Order {order_id} has no line items")]
    EmptyOrder { order_id: String },

    /// Tenant timezone is not a known IANA zone.
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Local data that cannot be exported as-is.
///
/// A validation failure marks the entity's mapping `failed` and is not
/// retried automatically; someone has to fix the record first.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., malformed email, unknown enum value).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Creates a Required error for the given field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
