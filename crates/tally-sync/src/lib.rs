//! # tally-sync: Accounting Sync Engine
//!
//! Pushes a tenant's local customers, catalog items, orders, payments and
//! refunds into its external accounting system, one entity at a time or in
//! fail-soft batches, manually or on the tenant's schedule.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌────────────────────────┐          ┌────────────────────────┐        │
//! │  │       Scheduler        │          │     ManualTrigger      │        │
//! │  │                        │          │                        │        │
//! │  │ Ticks, finds due       │          │ Admin/API requests for │        │
//! │  │ tenants, runs the full │          │ chosen ids (retries)   │        │
//! │  │ chain per tenant       │          │                        │        │
//! │  └───────────┬────────────┘          └───────────┬────────────┘        │
//! │              │        TenantRunLock (one run per tenant)               │
//! │              └──────────────────┬─────────────────┘                    │
//! │                                 ▼                                       │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncEngine                               │  │
//! │  │                                                                  │  │
//! │  │  sync_many ─► push(kind, id) ─► mapping ─► translator ─► API     │  │
//! │  │      │                                                  │        │  │
//! │  │      └───────── one Sync Log entry per batch ◄──────────┘        │  │
//! │  └──────────────────────────────┬───────────────────────────────────┘  │
//! │                                 ▼                                       │
//! │  ┌────────────────────────┐  ┌────────────────────────────────────┐    │
//! │  │ TenantAccountingContext│  │ AccountingApi                      │    │
//! │  │ tenant, currency, tz,  │─►│ HttpAccountingClient (reqwest,     │    │
//! │  │ schedule, API client   │  │ OAuth2 client credentials)         │    │
//! │  └────────────────────────┘  └────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`client`] - `AccountingApi` seam and its HTTP implementation
//! - [`config`] - Process configuration (API endpoints, scheduler, database)
//! - [`context`] - Per-tenant context resolved from settings
//! - [`error`] - Sync error types and their classification
//! - [`lock`] - Per-tenant run lock
//! - [`operations`] - Single-entity pushes, batches, status transitions
//! - [`scheduler`] - Periodic runs for due tenants
//! - [`status`] - Admin read model
//! - [`trigger`] - Manual sync requests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_core::EntityKind;
//! use tally_sync::{HttpApiFactory, ManualSyncRequest, ManualTrigger, Scheduler, SyncConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let factory = Arc::new(HttpApiFactory::new(config.api.clone())?);
//! let scheduler = Scheduler::new(db.clone(), factory.clone(), config.scheduler.clone());
//!
//! let trigger = ManualTrigger::new(db, factory, scheduler.lock().clone());
//! let response = trigger
//!     .trigger(ManualSyncRequest::new("salon-1", EntityKind::Customer, vec!["c1".into()]))
//!     .await?;
//!
//! scheduler.run(shutdown_signal()).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod operations;
pub mod scheduler;
pub mod status;
pub mod trigger;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{AccountingApi, ApiFactory, HttpAccountingClient, HttpApiFactory};
pub use config::{ApiSettings, DatabaseSettings, SchedulerSettings, SyncConfig};
pub use context::TenantAccountingContext;
pub use error::{SyncError, SyncResult};
pub use lock::{RunLease, TenantRunLock};
pub use operations::{BatchSummary, PushAction, PushOutcome, SyncEngine};
pub use scheduler::{RunReport, Scheduler};
pub use status::{tenant_status, TenantSyncStatus};
pub use trigger::{ManualSyncRequest, ManualSyncResponse, ManualTrigger};
