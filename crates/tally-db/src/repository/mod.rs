//! # Repository Module
//!
//! Database repositories for the accounting sync engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Sync operation                                                        │
//! │       │                                                                 │
//! │       │  db.mappings().get(tenant, MappingKind::Invoice, order_id)     │
//! │       ▼                                                                 │
//! │  MappingRepository ──► SQL ──► SQLite                                  │
//! │                                                                         │
//! │  Every read goes to storage. Nothing is cached between calls, so a     │
//! │  mapping written by one run is visible to the next immediately.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`MappingRepository`](mapping::MappingRepository) - Local ↔ remote correlation
//! - [`SyncLogRepository`](sync_log::SyncLogRepository) - Append-only audit trail
//! - [`SettingsRepository`](settings::SettingsRepository) - Tenant settings and run lock
//! - [`records`] - Customers, catalog, orders, payments, refunds

pub mod mapping;
pub mod records;
pub mod settings;
pub mod sync_log;
