//! # tally-db: Persistence for Tally Sync
//!
//! SQLite storage for the accounting sync engine, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Sync Data Flow                             │
//! │                                                                         │
//! │  Sync operation (tally-sync)                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ MappingRepo    │    │ 001_local    │  │   │
//! │  │   │ SqlitePool    │◄───│ SyncLogRepo    │    │ 002_sync     │  │   │
//! │  │   │               │    │ SettingsRepo   │    │              │  │   │
//! │  │   │               │    │ records::*     │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("tally.db")).await?;
//! let mapping = db.mappings().get("tenant-1", MappingKind::Customer, "c1").await?;
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

pub use repository::mapping::MappingRepository;
pub use repository::records::{
    CatalogRepository, CustomerRepository, OrderRepository, PaymentRepository, RefundRepository,
};
pub use repository::settings::{default_settings, SettingsRepository};
pub use repository::sync_log::SyncLogRepository;
