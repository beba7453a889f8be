//! # Sync Operations
//!
//! One push per entity kind, plus the single-entity and bulk drivers that
//! wrap them with Sync Log bookkeeping.
//!
//! ## Push Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Load local record             missing → NotFound (no mapping write) │
//! │  2. Check preconditions           customer/invoice mapping settled?     │
//! │  3. Translate                     tally_core::translator                │
//! │  4. Mapping has remote id?        yes → PUT        no → POST            │
//! │  5. Write mapping                 ok → synced      err → failed         │
//! │                                   (remote id kept on failure)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Precondition Chain
//! ```text
//!   Customer ──► Invoice ──► Payment
//!                   │
//!                   └──────► Refund (via payment → order)
//!   Product (independent)
//! ```
//!
//! ## Logging
//! - `sync_one`: one Sync Log entry, error surfaced to the caller
//! - `sync_many`: one Sync Log entry for the whole batch, fail-soft
//!
//! Database errors are never swallowed: they abort the batch.

use std::time::Instant;
use tracing::{debug, info, warn};

use tally_core::translator::{
    self, authorize_transition, settles_in_full, InvoiceDraft, RemoteInvoiceStatus,
};
use tally_core::{
    CatalogItem, Customer, EntityKind, EntityMapping, InvoiceStatus, ItemError, MappingKind,
    MappingStatus, MappingUpdate, NewSyncLogEntry, Order, RemoteRef, SyncDetails, SyncLogEntry,
    SyncLogStatus, SyncOperation, TriggerSource,
};
use tally_db::Database;

use crate::context::TenantAccountingContext;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Outcomes
// =============================================================================

/// What a successful push did remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    /// A new remote record was created.
    Created,
    /// An existing remote record was updated.
    Updated,
    /// Nothing to send (invoice already paid).
    Unchanged,
}

/// Result of one successful push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub local_id: String,
    pub remote_id: i64,
    pub action: PushAction,
}

/// Result of a bulk run over one entity kind.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub kind: EntityKind,
    pub status: SyncLogStatus,
    pub processed: u32,
    pub failed: u32,
    pub errors: Vec<ItemError>,
    /// The Sync Log entry written for this batch.
    pub log_id: String,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Runs push operations against one database.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    db: Database,
}

impl SyncEngine {
    pub fn new(db: Database) -> Self {
        SyncEngine { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Single-Entity Operations
    // =========================================================================

    pub async fn sync_customer(
        &self,
        ctx: &TenantAccountingContext,
        customer_id: &str,
        triggered_by: TriggerSource,
    ) -> SyncResult<PushOutcome> {
        self.sync_one(ctx, EntityKind::Customer, customer_id, triggered_by)
            .await
    }

    pub async fn sync_product(
        &self,
        ctx: &TenantAccountingContext,
        item_id: &str,
        triggered_by: TriggerSource,
    ) -> SyncResult<PushOutcome> {
        self.sync_one(ctx, EntityKind::Product, item_id, triggered_by)
            .await
    }

    pub async fn sync_invoice(
        &self,
        ctx: &TenantAccountingContext,
        order_id: &str,
        triggered_by: TriggerSource,
    ) -> SyncResult<PushOutcome> {
        self.sync_one(ctx, EntityKind::Invoice, order_id, triggered_by)
            .await
    }

    pub async fn sync_payment(
        &self,
        ctx: &TenantAccountingContext,
        payment_id: &str,
        triggered_by: TriggerSource,
    ) -> SyncResult<PushOutcome> {
        self.sync_one(ctx, EntityKind::Payment, payment_id, triggered_by)
            .await
    }

    pub async fn sync_refund(
        &self,
        ctx: &TenantAccountingContext,
        refund_id: &str,
        triggered_by: TriggerSource,
    ) -> SyncResult<PushOutcome> {
        self.sync_one(ctx, EntityKind::Refund, refund_id, triggered_by)
            .await
    }

    /// Pushes one entity and logs exactly one entry.
    ///
    /// Entity failures are logged and then returned to the caller.
    pub async fn sync_one(
        &self,
        ctx: &TenantAccountingContext,
        kind: EntityKind,
        local_id: &str,
        triggered_by: TriggerSource,
    ) -> SyncResult<PushOutcome> {
        let started = Instant::now();
        let result = self.push(ctx, kind, local_id).await;

        let errors = match &result {
            Ok(_) => Vec::new(),
            Err(e) if e.is_entity_failure() => vec![ItemError {
                local_id: local_id.to_string(),
                message: e.to_string(),
            }],
            Err(_) => return result,
        };

        let (processed, failed) = if errors.is_empty() { (1, 0) } else { (0, 1) };
        self.append_log(
            ctx,
            kind.operation(),
            processed,
            failed,
            SyncDetails::for_batch(kind, vec![local_id.to_string()], errors),
            started,
            triggered_by,
        )
        .await?;

        result
    }

    // =========================================================================
    // Bulk Driver
    // =========================================================================

    /// Pushes `ids` one after another and logs one entry for the batch.
    ///
    /// A failing entity never stops the batch. Counts decide the status:
    /// no failures → success, some → partial, nothing processed → failed.
    pub async fn sync_many(
        &self,
        ctx: &TenantAccountingContext,
        kind: EntityKind,
        ids: &[String],
        triggered_by: TriggerSource,
    ) -> SyncResult<BatchSummary> {
        let started = Instant::now();
        let mut processed = 0u32;
        let mut errors = Vec::new();

        info!(tenant_id = %ctx.tenant_id, kind = %kind, count = ids.len(), "Starting batch");

        for id in ids {
            match self.push(ctx, kind, id).await {
                Ok(_) => processed += 1,
                Err(e) if e.is_entity_failure() => errors.push(ItemError {
                    local_id: id.clone(),
                    message: e.to_string(),
                }),
                Err(e) => return Err(e),
            }
        }

        let failed = errors.len() as u32;
        let entry = self
            .append_log(
                ctx,
                kind.operation(),
                processed,
                failed,
                SyncDetails::for_batch(kind, ids.to_vec(), errors.clone()),
                started,
                triggered_by,
            )
            .await?;

        info!(
            tenant_id = %ctx.tenant_id,
            kind = %kind,
            processed,
            failed,
            status = %entry.status,
            "Batch finished"
        );

        Ok(BatchSummary {
            kind,
            status: entry.status,
            processed,
            failed,
            errors,
            log_id: entry.id,
        })
    }

    // =========================================================================
    // Invoice Status & Connection
    // =========================================================================

    /// Moves a synced invoice to `to` in the accounting system.
    ///
    /// The mapping's status stands for the remote status (`synced` is
    /// Invoiced, `paid` is Paid). Only edges the translator authorizes are
    /// sent; staying in place sends nothing.
    pub async fn transition_invoice_status(
        &self,
        ctx: &TenantAccountingContext,
        order_id: &str,
        to: InvoiceStatus,
        triggered_by: TriggerSource,
    ) -> SyncResult<()> {
        let started = Instant::now();
        let result = self.apply_invoice_status(ctx, order_id, to).await;

        let errors = match &result {
            Ok(()) => Vec::new(),
            Err(e) if e.is_entity_failure() => vec![ItemError {
                local_id: order_id.to_string(),
                message: e.to_string(),
            }],
            Err(_) => return result,
        };
        let (processed, failed) = if errors.is_empty() { (1, 0) } else { (0, 1) };

        self.append_log(
            ctx,
            SyncOperation::InvoiceSync,
            processed,
            failed,
            SyncDetails::for_batch(EntityKind::Invoice, vec![order_id.to_string()], errors),
            started,
            triggered_by,
        )
        .await?;

        result
    }

    async fn apply_invoice_status(
        &self,
        ctx: &TenantAccountingContext,
        order_id: &str,
        to: InvoiceStatus,
    ) -> SyncResult<()> {
        let mapping = self
            .settled_mapping(ctx, MappingKind::Invoice, order_id)
            .await?
            .ok_or_else(|| {
                SyncError::PreconditionFailed(
                    "Order must be synced before its status can change".into(),
                )
            })?;
        let (remote_id, from) = invoice_state(&mapping)?;

        authorize_transition(from, to)?;
        if from == to {
            debug!(tenant_id = %ctx.tenant_id, order_id = %order_id, status = %to, "Invoice already in status");
            return Ok(());
        }

        ctx.api()
            .update_invoice_status(remote_id, &RemoteInvoiceStatus { status: to })
            .await?;

        if to == InvoiceStatus::Paid {
            self.db
                .mappings()
                .upsert(&ctx.tenant_id, MappingKind::Invoice, order_id, &MappingUpdate::paid())
                .await?;
        }

        info!(tenant_id = %ctx.tenant_id, order_id = %order_id, from = %from, to = %to, "Invoice status changed");
        Ok(())
    }

    /// Calls the accounting API once and logs a `test_connection` entry.
    pub async fn test_connection(
        &self,
        ctx: &TenantAccountingContext,
        triggered_by: TriggerSource,
    ) -> SyncResult<()> {
        let started = Instant::now();
        let result = ctx.api().test_connection().await;
        let reachable = result.is_ok();

        let entry = NewSyncLogEntry {
            tenant_id: ctx.tenant_id.clone(),
            operation: SyncOperation::TestConnection,
            status: if reachable {
                SyncLogStatus::Success
            } else {
                SyncLogStatus::Failed
            },
            items_processed: u32::from(reachable),
            items_failed: u32::from(!reachable),
            error_message: result.as_ref().err().map(|e| e.to_string()),
            details: SyncDetails::Connection { reachable },
            duration_ms: elapsed_ms(started),
            triggered_by,
        };
        self.db.sync_log().append(entry).await?;

        match &result {
            Ok(()) => info!(tenant_id = %ctx.tenant_id, "Accounting API reachable"),
            Err(e) => warn!(tenant_id = %ctx.tenant_id, error = %e, "Accounting API unreachable"),
        }
        result
    }

    // =========================================================================
    // Push Operations
    // =========================================================================

    /// Pushes one entity without logging.
    pub async fn push(
        &self,
        ctx: &TenantAccountingContext,
        kind: EntityKind,
        local_id: &str,
    ) -> SyncResult<PushOutcome> {
        let result = match kind {
            EntityKind::Customer => self.push_customer(ctx, local_id).await,
            EntityKind::Product => self.push_product(ctx, local_id).await,
            EntityKind::Invoice => self.push_invoice(ctx, local_id).await,
            EntityKind::Payment => self.push_payment(ctx, local_id).await,
            EntityKind::Refund => self.push_refund(ctx, local_id).await,
        };

        match &result {
            Ok(outcome) => debug!(
                tenant_id = %ctx.tenant_id,
                kind = %kind,
                local_id = %local_id,
                remote_id = outcome.remote_id,
                action = ?outcome.action,
                "Pushed entity"
            ),
            Err(e) => warn!(
                tenant_id = %ctx.tenant_id,
                kind = %kind,
                local_id = %local_id,
                error = %e,
                "Push failed"
            ),
        }
        result
    }

    async fn push_customer(
        &self,
        ctx: &TenantAccountingContext,
        customer_id: &str,
    ) -> SyncResult<PushOutcome> {
        let customer = self
            .db
            .customers()
            .get(&ctx.tenant_id, customer_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Customer", customer_id))?;

        let result = self.upsert_customer(ctx, &customer).await;

        self.record_failure(ctx, MappingKind::Customer, customer_id, result)
            .await
    }

    async fn push_product(
        &self,
        ctx: &TenantAccountingContext,
        item_id: &str,
    ) -> SyncResult<PushOutcome> {
        let item = self
            .db
            .catalog()
            .get(&ctx.tenant_id, item_id)
            .await?
            .ok_or_else(|| SyncError::not_found("CatalogItem", item_id))?;

        let result = self.upsert_product(ctx, &item).await;

        self.record_failure(ctx, MappingKind::Product, item_id, result)
            .await
    }

    async fn push_invoice(
        &self,
        ctx: &TenantAccountingContext,
        order_id: &str,
    ) -> SyncResult<PushOutcome> {
        let order = self
            .db
            .orders()
            .get(&ctx.tenant_id, order_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Order", order_id))?;

        let existing = self
            .db
            .mappings()
            .get(&ctx.tenant_id, MappingKind::Invoice, order_id)
            .await?;

        // Paid invoices are final
        if let Some(mapping) = existing.as_ref().filter(|m| m.status == MappingStatus::Paid) {
            if let Some(remote_id) = mapping.remote_id {
                return Ok(PushOutcome {
                    local_id: order_id.to_string(),
                    remote_id,
                    action: PushAction::Unchanged,
                });
            }
        }

        let result = self.upsert_invoice(ctx, &order, existing.as_ref()).await;

        self.record_failure(ctx, MappingKind::Invoice, order_id, result)
            .await
    }

    async fn upsert_customer(
        &self,
        ctx: &TenantAccountingContext,
        customer: &Customer,
    ) -> SyncResult<PushOutcome> {
        let existing = self
            .db
            .mappings()
            .get(&ctx.tenant_id, MappingKind::Customer, &customer.id)
            .await?;
        let payload = translator::translate_customer(customer)?;

        match existing.and_then(|m| m.remote_id) {
            Some(remote_id) => {
                ctx.api().update_customer(remote_id, &payload).await?;
                self.mark_synced(ctx, MappingKind::Customer, &customer.id, None, remote_id)
                    .await
            }
            None => {
                let remote = ctx.api().create_customer(&payload).await?;
                let remote_id = remote.id;
                self.mark_synced(ctx, MappingKind::Customer, &customer.id, Some(remote), remote_id)
                    .await
            }
        }
    }

    async fn upsert_product(
        &self,
        ctx: &TenantAccountingContext,
        item: &CatalogItem,
    ) -> SyncResult<PushOutcome> {
        let existing = self
            .db
            .mappings()
            .get(&ctx.tenant_id, MappingKind::Product, &item.id)
            .await?;
        let payload = translator::translate_catalog_item(item)?;

        match existing.and_then(|m| m.remote_id) {
            Some(remote_id) => {
                ctx.api().update_product(remote_id, &payload).await?;
                self.mark_synced(ctx, MappingKind::Product, &item.id, None, remote_id)
                    .await
            }
            None => {
                let remote = ctx.api().create_product(&payload).await?;
                let remote_id = remote.id;
                self.mark_synced(ctx, MappingKind::Product, &item.id, Some(remote), remote_id)
                    .await
            }
        }
    }

    async fn upsert_invoice(
        &self,
        ctx: &TenantAccountingContext,
        order: &Order,
        existing: Option<&EntityMapping>,
    ) -> SyncResult<PushOutcome> {
        let remote_customer_id = self
            .settled_mapping(ctx, MappingKind::Customer, &order.customer_id)
            .await?
            .and_then(|m| m.remote_id)
            .ok_or_else(|| {
                SyncError::PreconditionFailed("Customer must be synced before invoice".into())
            })?;

        let items = self.db.orders().items(&order.id).await?;
        let payments = self.db.payments().for_order(&ctx.tenant_id, &order.id).await?;
        let invoice = translator::translate_invoice(&InvoiceDraft {
            order,
            items: &items,
            remote_customer_id,
            invoice_date: ctx.local_date(order.created_at),
            currency: &ctx.currency,
            payments: &payments,
        })?;

        match existing.and_then(|m| m.remote_id) {
            Some(remote_id) => {
                authorize_transition(InvoiceStatus::Invoiced, invoice.status)?;
                let status = RemoteInvoiceStatus {
                    status: invoice.status,
                };
                ctx.api().update_invoice_status(remote_id, &status).await?;
                self.mark_synced(ctx, MappingKind::Invoice, &order.id, None, remote_id)
                    .await
            }
            None => {
                let remote = ctx.api().create_invoice(&invoice).await?;
                let remote_id = remote.id;
                info!(
                    tenant_id = %ctx.tenant_id,
                    order_id = %order.id,
                    remote_id,
                    total = %invoice.total_amount_inc_vat,
                    "Invoice created"
                );
                self.mark_synced(ctx, MappingKind::Invoice, &order.id, Some(remote), remote_id)
                    .await
            }
        }
    }

    async fn push_payment(
        &self,
        ctx: &TenantAccountingContext,
        payment_id: &str,
    ) -> SyncResult<PushOutcome> {
        let payment = self
            .db
            .payments()
            .get(&ctx.tenant_id, payment_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Payment", payment_id))?;

        let invoice = self
            .settled_mapping(ctx, MappingKind::Invoice, &payment.order_id)
            .await?
            .ok_or_else(|| SyncError::PreconditionFailed("Order must be synced before payment".into()))?;
        let (remote_invoice_id, _) = invoice_state(&invoice)?;

        let order = self
            .db
            .orders()
            .get(&ctx.tenant_id, &payment.order_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Order", payment.order_id.as_str()))?;

        let remote_payment = translator::translate_payment(&payment, remote_invoice_id)?;
        let remote = ctx.api().register_payment(&remote_payment).await?;

        let settles = payment.is_completed() && settles_in_full(order.total(), payment.amount());
        if settles && invoice.status == MappingStatus::Synced {
            self.db
                .mappings()
                .upsert(&ctx.tenant_id, MappingKind::Invoice, &order.id, &MappingUpdate::paid())
                .await?;
            info!(
                tenant_id = %ctx.tenant_id,
                order_id = %order.id,
                payment_id = %payment_id,
                "Invoice settled in full"
            );
        }

        Ok(PushOutcome {
            local_id: payment_id.to_string(),
            remote_id: remote.id,
            action: PushAction::Created,
        })
    }

    async fn push_refund(
        &self,
        ctx: &TenantAccountingContext,
        refund_id: &str,
    ) -> SyncResult<PushOutcome> {
        let refund = self
            .db
            .refunds()
            .get(&ctx.tenant_id, refund_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Refund", refund_id))?;

        let payment = self
            .db
            .payments()
            .get(&ctx.tenant_id, &refund.payment_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Payment", refund.payment_id.as_str()))?;

        let invoice = self
            .settled_mapping(ctx, MappingKind::Invoice, &payment.order_id)
            .await?
            .ok_or_else(|| SyncError::PreconditionFailed("Order must be synced before refund".into()))?;
        let (remote_invoice_id, _) = invoice_state(&invoice)?;

        let credit_note = translator::translate_credit_note(&refund, remote_invoice_id, &ctx.currency)?;
        let remote = ctx.api().create_credit_note(&credit_note).await?;

        Ok(PushOutcome {
            local_id: refund_id.to_string(),
            remote_id: remote.id,
            action: PushAction::Created,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Mapping of `local_id` if it is synced or paid.
    async fn settled_mapping(
        &self,
        ctx: &TenantAccountingContext,
        kind: MappingKind,
        local_id: &str,
    ) -> SyncResult<Option<EntityMapping>> {
        let mapping = self.db.mappings().get(&ctx.tenant_id, kind, local_id).await?;
        Ok(mapping.filter(|m| m.status.is_settled()))
    }

    async fn mark_synced(
        &self,
        ctx: &TenantAccountingContext,
        kind: MappingKind,
        local_id: &str,
        created: Option<RemoteRef>,
        remote_id: i64,
    ) -> SyncResult<PushOutcome> {
        let action = if created.is_some() {
            PushAction::Created
        } else {
            PushAction::Updated
        };
        self.db
            .mappings()
            .upsert(&ctx.tenant_id, kind, local_id, &MappingUpdate::synced(created))
            .await?;

        Ok(PushOutcome {
            local_id: local_id.to_string(),
            remote_id,
            action,
        })
    }

    /// Marks the mapping failed when `result` is an entity failure.
    async fn record_failure(
        &self,
        ctx: &TenantAccountingContext,
        kind: MappingKind,
        local_id: &str,
        result: SyncResult<PushOutcome>,
    ) -> SyncResult<PushOutcome> {
        if let Err(err) = &result {
            if err.is_entity_failure() {
                self.db
                    .mappings()
                    .upsert(
                        &ctx.tenant_id,
                        kind,
                        local_id,
                        &MappingUpdate::failed(err.to_string()),
                    )
                    .await?;
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_log(
        &self,
        ctx: &TenantAccountingContext,
        operation: SyncOperation,
        processed: u32,
        failed: u32,
        details: SyncDetails,
        started: Instant,
        triggered_by: TriggerSource,
    ) -> SyncResult<SyncLogEntry> {
        let error_message = details.errors().first().map(|e| e.message.clone());
        let entry = NewSyncLogEntry {
            tenant_id: ctx.tenant_id.clone(),
            operation,
            status: SyncLogStatus::from_counts(processed, failed),
            items_processed: processed,
            items_failed: failed,
            error_message,
            details,
            duration_ms: elapsed_ms(started),
            triggered_by,
        };
        Ok(self.db.sync_log().append(entry).await?)
    }
}

/// Remote id and remote status of a settled invoice mapping.
fn invoice_state(mapping: &EntityMapping) -> SyncResult<(i64, InvoiceStatus)> {
    let remote_id = mapping.remote_id.ok_or_else(|| {
        SyncError::PreconditionFailed(format!(
            "Invoice mapping for order {} has no remote id",
            mapping.local_id
        ))
    })?;
    let status = match mapping.status {
        MappingStatus::Paid => InvoiceStatus::Paid,
        _ => InvoiceStatus::Invoiced,
    };
    Ok((remote_id, status))
}

fn elapsed_ms(started: Instant) -> u32 {
    u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use std::sync::Arc;
    use tally_core::Money;

    async fn setup() -> (SyncEngine, TenantAccountingContext, Arc<FakeApi>) {
        let db = test_db().await;
        seed_tenant(&db, "t1").await;
        let api = FakeApi::new();
        let ctx = TenantAccountingContext::load(&db, &FakeFactory::new(api.clone()), "t1")
            .await
            .unwrap();
        (SyncEngine::new(db), ctx, api)
    }

    async fn mapping(engine: &SyncEngine, kind: MappingKind, id: &str) -> Option<EntityMapping> {
        engine.db().mappings().get("t1", kind, id).await.unwrap()
    }

    async fn synced_order(engine: &SyncEngine, ctx: &TenantAccountingContext) -> i64 {
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;
        seed_order(engine.db(), "t1", "o1", "c1").await;
        engine.push(ctx, EntityKind::Customer, "c1").await.unwrap();
        engine.push(ctx, EntityKind::Invoice, "o1").await.unwrap().remote_id
    }

    #[tokio::test]
    async fn test_customer_sync_is_idempotent() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;

        let first = engine.sync_customer(&ctx, "c1", TriggerSource::Manual).await.unwrap();
        let second = engine.sync_customer(&ctx, "c1", TriggerSource::Manual).await.unwrap();

        assert_eq!(first.action, PushAction::Created);
        assert_eq!(second.action, PushAction::Updated);
        assert_eq!(first.remote_id, second.remote_id);
        assert_eq!(
            api.calls(),
            vec![
                ApiCall::CreateCustomer("Kari Nordmann".into()),
                ApiCall::UpdateCustomer(first.remote_id),
            ]
        );

        let counts = engine
            .db()
            .mappings()
            .count_by_status("t1", MappingKind::Customer)
            .await
            .unwrap();
        assert_eq!(counts, vec![(MappingStatus::Synced, 1)]);

        let log = engine.db().sync_log().recent("t1", 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|e| e.items_processed == 1 && e.items_failed == 0));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_remote_id() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;
        let created = engine.push(&ctx, EntityKind::Customer, "c1").await.unwrap();

        api.fail_on("Kari Nordmann");
        let err = engine
            .sync_customer(&ctx, "c1", TriggerSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteApi { status: Some(500), .. }));

        let m = mapping(&engine, MappingKind::Customer, "c1").await.unwrap();
        assert_eq!(m.status, MappingStatus::Failed);
        assert_eq!(m.remote_id, Some(created.remote_id));
        assert!(m.error_message.unwrap().contains("rejected"));

        let entry = engine
            .db()
            .sync_log()
            .latest("t1", SyncOperation::CustomerSync)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.items_failed, 1);
        assert_eq!(entry.status, SyncLogStatus::Failed);
    }

    #[tokio::test]
    async fn test_first_failure_creates_failed_mapping_without_remote() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;
        api.set_unreachable(true);

        assert!(engine.push(&ctx, EntityKind::Customer, "c1").await.is_err());

        let m = mapping(&engine, MappingKind::Customer, "c1").await.unwrap();
        assert_eq!(m.status, MappingStatus::Failed);
        assert_eq!(m.remote_id, None);
    }

    #[tokio::test]
    async fn test_missing_customer_is_not_found() {
        let (engine, ctx, api) = setup().await;

        let err = engine
            .sync_customer(&ctx, "ghost", TriggerSource::Manual)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(api.calls().is_empty());
        assert!(mapping(&engine, MappingKind::Customer, "ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_blank_name_is_validation_failure() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", " ", "").await;

        let err = engine.push(&ctx, EntityKind::Customer, "c1").await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(api.calls().is_empty());
        assert_eq!(
            mapping(&engine, MappingKind::Customer, "c1").await.unwrap().status,
            MappingStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_product_sync() {
        let (engine, ctx, api) = setup().await;
        seed_service(engine.db(), "t1", "s1", "Herreklipp").await;

        let outcome = engine.sync_product(&ctx, "s1", TriggerSource::Api).await.unwrap();
        assert_eq!(outcome.action, PushAction::Created);
        assert_eq!(api.calls(), vec![ApiCall::CreateProduct("Herreklipp".into())]);

        let entry = engine
            .db()
            .sync_log()
            .latest("t1", SyncOperation::ProductSync)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.triggered_by, TriggerSource::Api);
    }

    #[tokio::test]
    async fn test_invoice_requires_synced_customer() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;
        seed_order(engine.db(), "t1", "o1", "c1").await;

        let err = engine.push(&ctx, EntityKind::Invoice, "o1").await.unwrap_err();
        assert!(matches!(err, SyncError::PreconditionFailed(_)));
        assert!(api.calls().is_empty());

        let m = mapping(&engine, MappingKind::Invoice, "o1").await.unwrap();
        assert_eq!(m.status, MappingStatus::Failed);
    }

    #[tokio::test]
    async fn test_invoice_sync_sets_synced_even_when_paid_locally() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;
        seed_order(engine.db(), "t1", "o1", "c1").await;
        seed_payment(engine.db(), "t1", "p1", "o1", 100_000).await;

        let customer = engine.push(&ctx, EntityKind::Customer, "c1").await.unwrap();
        let invoice = engine.push(&ctx, EntityKind::Invoice, "o1").await.unwrap();

        assert_eq!(invoice.action, PushAction::Created);
        assert!(api.calls().contains(&ApiCall::CreateInvoice {
            customer_id: customer.remote_id,
            status: InvoiceStatus::Paid,
        }));
        let m = mapping(&engine, MappingKind::Invoice, "o1").await.unwrap();
        assert_eq!(m.status, MappingStatus::Synced);
        assert_eq!(m.remote_number, Some(format!("N{}", invoice.remote_id)));
    }

    #[tokio::test]
    async fn test_invoice_resync_updates_status_only() {
        let (engine, ctx, api) = setup().await;
        let remote_id = synced_order(&engine, &ctx).await;

        let again = engine.push(&ctx, EntityKind::Invoice, "o1").await.unwrap();
        assert_eq!(again.action, PushAction::Updated);
        assert_eq!(api.count(|c| matches!(c, ApiCall::CreateInvoice { .. })), 1);
        assert!(api
            .calls()
            .contains(&ApiCall::UpdateInvoiceStatus(remote_id, InvoiceStatus::Invoiced)));
    }

    #[tokio::test]
    async fn test_payment_requires_synced_invoice() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;
        seed_order(engine.db(), "t1", "o1", "c1").await;
        seed_payment(engine.db(), "t1", "p1", "o1", 100_000).await;

        let err = engine
            .sync_payment(&ctx, "p1", TriggerSource::Manual)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Order must be synced before payment");
        assert!(api.calls().is_empty());
        let entry = engine
            .db()
            .sync_log()
            .latest("t1", SyncOperation::PaymentSync)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.error_message.as_deref(), Some("Order must be synced before payment"));
    }

    #[tokio::test]
    async fn test_full_payment_advances_invoice_to_paid() {
        let (engine, ctx, api) = setup().await;
        let remote_invoice = synced_order(&engine, &ctx).await;
        // 999.99 settles 1000.00 within one øre
        seed_payment(engine.db(), "t1", "p1", "o1", 99_999).await;

        engine.push(&ctx, EntityKind::Payment, "p1").await.unwrap();

        assert!(api.calls().contains(&ApiCall::RegisterPayment {
            invoice_id: remote_invoice,
            amount: Money::from_cents(99_999),
        }));
        assert_eq!(
            mapping(&engine, MappingKind::Invoice, "o1").await.unwrap().status,
            MappingStatus::Paid
        );

        // Paid invoices are not pushed again
        let calls_before = api.calls().len();
        let outcome = engine.push(&ctx, EntityKind::Invoice, "o1").await.unwrap();
        assert_eq!(outcome.action, PushAction::Unchanged);
        assert_eq!(api.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_partial_payment_keeps_invoice_synced() {
        let (engine, ctx, _api) = setup().await;
        synced_order(&engine, &ctx).await;
        seed_payment(engine.db(), "t1", "p1", "o1", 60_000).await;

        engine.push(&ctx, EntityKind::Payment, "p1").await.unwrap();

        assert_eq!(
            mapping(&engine, MappingKind::Invoice, "o1").await.unwrap().status,
            MappingStatus::Synced
        );
    }

    #[tokio::test]
    async fn test_refund_creates_credit_note_without_touching_mapping() {
        let (engine, ctx, api) = setup().await;
        let remote_invoice = synced_order(&engine, &ctx).await;
        seed_payment(engine.db(), "t1", "p1", "o1", 100_000).await;
        engine.push(&ctx, EntityKind::Payment, "p1").await.unwrap();
        seed_refund(engine.db(), "t1", "r1", "p1", 25_000).await;

        engine.sync_refund(&ctx, "r1", TriggerSource::Manual).await.unwrap();

        assert!(api.calls().contains(&ApiCall::CreateCreditNote {
            invoice_id: remote_invoice,
            amount: Money::from_cents(25_000),
        }));
        assert_eq!(
            mapping(&engine, MappingKind::Invoice, "o1").await.unwrap().status,
            MappingStatus::Paid
        );

        let entry = engine
            .db()
            .sync_log()
            .latest("t1", SyncOperation::PaymentSync)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(entry.details, SyncDetails::Payment { ref refund_ids, .. } if refund_ids == &["r1".to_string()]));
    }

    #[tokio::test]
    async fn test_refund_requires_synced_invoice() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;
        seed_order(engine.db(), "t1", "o1", "c1").await;
        seed_payment(engine.db(), "t1", "p1", "o1", 100_000).await;
        seed_refund(engine.db(), "t1", "r1", "p1", 25_000).await;

        let err = engine.push(&ctx, EntityKind::Refund, "r1").await.unwrap_err();
        assert!(matches!(err, SyncError::PreconditionFailed(_)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_is_fail_soft() {
        let (engine, ctx, api) = setup().await;
        let names = [("c1", "Ada"), ("c2", "Bo"), ("c3", "Cai"), ("c4", "Dag"), ("c5", "Eli")];
        for (id, first) in names {
            seed_customer(engine.db(), "t1", id, first, "Hansen").await;
        }
        api.fail_on("Bo Hansen");
        api.fail_on("Dag Hansen");

        let ids: Vec<String> = names.iter().map(|(id, _)| id.to_string()).collect();
        let summary = engine
            .sync_many(&ctx, EntityKind::Customer, &ids, TriggerSource::Scheduled)
            .await
            .unwrap();

        assert_eq!(summary.status, SyncLogStatus::Partial);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 2);

        let log = engine.db().sync_log().recent("t1", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, summary.log_id);
        assert_eq!(log[0].items_processed, 3);
        assert_eq!(log[0].items_failed, 2);
        let failing: Vec<_> = log[0].details.errors().iter().map(|e| e.local_id.as_str()).collect();
        assert_eq!(failing, vec!["c2", "c4"]);

        for id in ["c1", "c3", "c5"] {
            let m = mapping(&engine, MappingKind::Customer, id).await.unwrap();
            assert_eq!(m.status, MappingStatus::Synced);
        }
        for id in ["c2", "c4"] {
            let m = mapping(&engine, MappingKind::Customer, id).await.unwrap();
            assert_eq!(m.status, MappingStatus::Failed);
            assert!(m.error_message.is_some());
        }
    }

    #[tokio::test]
    async fn test_bulk_all_failed() {
        let (engine, ctx, api) = setup().await;
        seed_customer(engine.db(), "t1", "c1", "Kari", "Nordmann").await;
        api.set_unreachable(true);

        let summary = engine
            .sync_many(&ctx, EntityKind::Customer, &["c1".to_string(), "ghost".to_string()], TriggerSource::Manual)
            .await
            .unwrap();

        assert_eq!(summary.status, SyncLogStatus::Failed);
        assert_eq!(summary.failed, 2);
        assert!(summary.errors[1].message.contains("not found"));
    }

    #[tokio::test]
    async fn test_transition_invoice_status() {
        let (engine, ctx, api) = setup().await;
        let remote_id = synced_order(&engine, &ctx).await;

        engine
            .transition_invoice_status(&ctx, "o1", InvoiceStatus::Paid, TriggerSource::Manual)
            .await
            .unwrap();
        assert!(api
            .calls()
            .contains(&ApiCall::UpdateInvoiceStatus(remote_id, InvoiceStatus::Paid)));
        assert_eq!(
            mapping(&engine, MappingKind::Invoice, "o1").await.unwrap().status,
            MappingStatus::Paid
        );

        let err = engine
            .transition_invoice_status(&ctx, "o1", InvoiceStatus::Invoiced, TriggerSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(
            api.count(|c| matches!(c, ApiCall::UpdateInvoiceStatus(_, InvoiceStatus::Invoiced))),
            0
        );
    }

    #[tokio::test]
    async fn test_transition_requires_synced_invoice() {
        let (engine, ctx, api) = setup().await;

        let err = engine
            .transition_invoice_status(&ctx, "o1", InvoiceStatus::Paid, TriggerSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::PreconditionFailed(_)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connection_is_logged() {
        let (engine, ctx, api) = setup().await;

        engine.test_connection(&ctx, TriggerSource::Manual).await.unwrap();
        api.set_unreachable(true);
        assert!(engine.test_connection(&ctx, TriggerSource::Manual).await.is_err());

        let log = engine.db().sync_log().recent("t1", 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|e| e.operation == SyncOperation::TestConnection));
        assert!(log.iter().any(|e| e.details == SyncDetails::Connection { reachable: false }));
        assert!(log.iter().any(|e| e.details == SyncDetails::Connection { reachable: true }));
    }
}
