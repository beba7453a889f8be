//! # tally-core: Pure Accounting Logic
//!
//! Everything the sync engine decides without touching the network or the
//! database: money and VAT arithmetic, payload translation, mapping status
//! rules and the schedule policy.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Tally Sync Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             tally-worker (scheduler loop, admin CLI)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │         tally-sync (HTTP client, push operations, runs)         │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 │                              │                        │
//! │  ┌──────────────▼──────────────┐  ┌────────────▼────────────────────┐  │
//! │  │  ★ tally-core (THIS CRATE)  │  │  tally-db (SQLite repositories) │  │
//! │  │                             │  │                                 │  │
//! │  │  money      translator      │  │  mappings, sync log, settings,  │  │
//! │  │  types      schedule        │  │  local records                  │  │
//! │  │  address    validation      │  │                                 │  │
//! │  │                             │  └─────────────────────────────────┘  │
//! │  │  NO I/O • NO DATABASE       │                                       │
//! │  └─────────────────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Integer øre with a decimal serde boundary
//! - [`types`] - Inbound records, mappings, sync log, settings
//! - [`translator`] - Local records → remote payloads, VAT totals, status edges
//! - [`schedule`] - When a tenant's automatic sync is due
//! - [`address`] - Free-text address splitting
//! - [`validation`] - Export-readiness checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::money::Money;
//!
//! let lines = [Money::from_cents(45000), Money::from_cents(12000).multiply_quantity(2)];
//! let total: Money = lines.into_iter().sum();
//! assert_eq!(total.to_decimal_string(), "690.00");
//! assert!(total.within(Money::from_cents(69001), Money::from_cents(1)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod address;
pub mod error;
pub mod money;
pub mod schedule;
pub mod translator;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use schedule::{SyncFrequency, SyncSchedule};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Operating currency used when a tenant has not configured one.
pub const DEFAULT_CURRENCY: &str = "NOK";

/// Timezone used when a tenant has not configured one.
pub const DEFAULT_TIMEZONE: &str = "Europe/Oslo";
