//! # Sync Scheduler
//!
//! Periodically finds tenants whose schedule slot has passed and runs a full
//! sync for each of them.
//!
//! ## Tick
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  every tick_interval_secs                                               │
//! │                                                                         │
//! │  list_scheduled()  ──► is_due_in(tz, now, last_sync_at) ──► due tenants │
//! │                                                                         │
//! │  due tenants run in parallel (≤ max_parallel_tenants):                  │
//! │                                                                         │
//! │   ┌──────────┐  ┌──────────┐  ┌─────────┐  ┌─────────┐  ┌────────┐     │
//! │   │ customer │─►│ product  │─►│ invoice │─►│ payment │─►│ refund │     │
//! │   └──────────┘  └──────────┘  └─────────┘  └─────────┘  └────────┘     │
//! │        one batch (one Sync Log entry) per kind with work                │
//! │                                                                         │
//! │  record_run: last_sync_at = run start, status = combined batches,       │
//! │              next_sync_at = next slot                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Within a tenant, kinds run strictly in order: each selection happens
//! after the previous batch, so invoices synced this run make their
//! payments eligible in the same run.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use tally_core::schedule::parse_timezone;
use tally_core::{AccountingSettings, EntityKind, SyncLogStatus, TriggerSource};
use tally_db::Database;

use crate::client::ApiFactory;
use crate::config::SchedulerSettings;
use crate::context::TenantAccountingContext;
use crate::error::{SyncError, SyncResult};
use crate::lock::TenantRunLock;
use crate::operations::{BatchSummary, SyncEngine};

/// Failing entities kept on the settings row after a run.
const MAX_RECORDED_ERRORS: usize = 20;

/// Outcome of one tenant's scheduled run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SyncLogStatus,
    pub batches: Vec<BatchSummary>,
    pub errors: Vec<String>,
    pub next_sync_at: Option<DateTime<Utc>>,
}

/// Drives scheduled runs.
#[derive(Clone)]
pub struct Scheduler {
    engine: SyncEngine,
    factory: Arc<dyn ApiFactory>,
    lock: TenantRunLock,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(db: Database, factory: Arc<dyn ApiFactory>, settings: SchedulerSettings) -> Self {
        let lock = TenantRunLock::new(db.clone(), settings.stale_run_after());
        Scheduler {
            engine: SyncEngine::new(db),
            factory,
            lock,
            settings,
        }
    }

    /// The run lock, for sharing with manual triggers.
    pub fn lock(&self) -> &TenantRunLock {
        &self.lock
    }

    /// Ticks until `shutdown` resolves. A tick in progress is finished first.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            tick_secs = self.settings.tick_interval_secs,
            max_parallel = self.settings.max_parallel_tenants,
            "Scheduler starting"
        );

        let mut interval = tokio::time::interval(self.settings.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(reports) if !reports.is_empty() => {
                            info!(runs = reports.len(), "Scheduler tick finished");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Scheduler tick failed"),
                    }
                }

                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Runs every tenant that is due at `now`.
    ///
    /// Failed tenant runs are logged and left out of the returned reports.
    pub async fn tick(&self, now: DateTime<Utc>) -> SyncResult<Vec<RunReport>> {
        let tenants = self.engine.db().settings().list_scheduled().await?;
        let due = due_tenants(tenants, now);
        if due.is_empty() {
            debug!("No tenants due");
            return Ok(Vec::new());
        }

        info!(count = due.len(), "Tenants due for sync");

        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_tenants));
        let mut tasks = JoinSet::new();
        for settings in due {
            let scheduler = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                scheduler.run_tenant(&settings.tenant_id, now).await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => warn!(error = %e, "Tenant run did not complete"),
                Err(e) => error!(error = %e, "Tenant run task aborted"),
            }
        }

        reports.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(reports)
    }

    /// Runs a full sync for one tenant, regardless of its schedule.
    pub async fn run_tenant(&self, tenant_id: &str, now: DateTime<Utc>) -> SyncResult<RunReport> {
        let span = tracing::info_span!("tenant_run", tenant_id = %tenant_id);
        self.run_tenant_inner(tenant_id, now).instrument(span).await
    }

    async fn run_tenant_inner(&self, tenant_id: &str, now: DateTime<Utc>) -> SyncResult<RunReport> {
        let settings = self.engine.db().settings().require(tenant_id).await?;
        let next_sync_at = next_slot(&settings, now);

        let ctx = match TenantAccountingContext::resolve(&settings, self.factory.as_ref()) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.record_failed_run(tenant_id, &e, now, next_sync_at).await;
                return Err(e);
            }
        };

        let lease = self.lock.acquire(tenant_id, now).await?;
        let result = self.run_batches(&ctx).await;
        let outcome = match result {
            Ok(batches) => self.finish_run(tenant_id, now, batches, next_sync_at).await,
            Err(e) => {
                self.record_failed_run(tenant_id, &e, now, next_sync_at).await;
                Err(e)
            }
        };
        self.lock.release(lease).await;

        outcome
    }

    async fn run_batches(&self, ctx: &TenantAccountingContext) -> SyncResult<Vec<BatchSummary>> {
        let mut batches = Vec::new();
        for kind in EntityKind::RUN_ORDER {
            let ids = self.select(ctx, kind).await?;
            if ids.is_empty() {
                debug!(kind = %kind, "Nothing to sync");
                continue;
            }
            let summary = self
                .engine
                .sync_many(ctx, kind, &ids, TriggerSource::Scheduled)
                .await?;
            batches.push(summary);
        }
        Ok(batches)
    }

    /// Entities of `kind` a scheduled run picks up. Failed mappings are left
    /// for an admin to retry; payments and refunds are picked up until one
    /// push succeeds.
    async fn select(&self, ctx: &TenantAccountingContext, kind: EntityKind) -> SyncResult<Vec<String>> {
        let db = self.engine.db();
        let tenant_id = ctx.tenant_id.as_str();
        let limit = self.settings.batch_limit;

        let ids = match kind {
            EntityKind::Customer => db.customers().unsynced_ids(tenant_id, limit).await?,
            EntityKind::Product => db.catalog().unsynced_ids(tenant_id, limit).await?,
            EntityKind::Invoice => db.orders().uninvoiced_ids(tenant_id, limit).await?,
            EntityKind::Payment => db.payments().unsynced_ids(tenant_id, limit).await?,
            EntityKind::Refund => db.refunds().unsynced_ids(tenant_id, limit).await?,
        };
        Ok(ids)
    }

    async fn finish_run(
        &self,
        tenant_id: &str,
        started_at: DateTime<Utc>,
        batches: Vec<BatchSummary>,
        next_sync_at: Option<DateTime<Utc>>,
    ) -> SyncResult<RunReport> {
        let statuses: Vec<SyncLogStatus> = batches.iter().map(|b| b.status).collect();
        let status = SyncLogStatus::combine(&statuses);
        let errors: Vec<String> = batches
            .iter()
            .flat_map(|b| {
                b.errors
                    .iter()
                    .map(move |e| format!("{} {}: {}", b.kind, e.local_id, e.message))
            })
            .take(MAX_RECORDED_ERRORS)
            .collect();

        self.engine
            .db()
            .settings()
            .record_run(tenant_id, status, &errors, started_at, next_sync_at)
            .await?;

        info!(
            status = %status,
            batches = batches.len(),
            failed = batches.iter().map(|b| b.failed).sum::<u32>(),
            next_sync_at = ?next_sync_at,
            "Tenant run finished"
        );

        Ok(RunReport {
            tenant_id: tenant_id.to_string(),
            started_at,
            status,
            batches,
            errors,
            next_sync_at,
        })
    }

    /// Records a run that could not complete, so the tenant waits for its
    /// next slot instead of being retried every tick.
    async fn record_failed_run(
        &self,
        tenant_id: &str,
        err: &SyncError,
        started_at: DateTime<Utc>,
        next_sync_at: Option<DateTime<Utc>>,
    ) {
        error!(error = %err, "Tenant run failed");
        if let Err(e) = self
            .engine
            .db()
            .settings()
            .record_run(
                tenant_id,
                SyncLogStatus::Failed,
                &[err.to_string()],
                started_at,
                next_sync_at,
            )
            .await
        {
            error!(error = %e, "Failed to record failed run");
        }
    }
}

/// Tenants whose schedule slot has passed since their last run.
pub fn due_tenants(tenants: Vec<AccountingSettings>, now: DateTime<Utc>) -> Vec<AccountingSettings> {
    tenants
        .into_iter()
        .filter(|settings| match parse_timezone(&settings.timezone) {
            Ok(tz) => settings.schedule.is_due_in(tz, now, settings.last_sync_at),
            Err(e) => {
                warn!(tenant_id = %settings.tenant_id, error = %e, "Skipping tenant with bad timezone");
                false
            }
        })
        .collect()
}

fn next_slot(settings: &AccountingSettings, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz = parse_timezone(&settings.timezone).ok()?;
    settings.schedule.next_run_in(tz, after)
}
