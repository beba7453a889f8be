//! # Local Record Repositories
//!
//! Read access to the records the booking and POS subsystems hand over:
//! customers, catalog items, orders, payments and refunds.
//!
//! ## Unsynced Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  customers / catalog_items                                             │
//! │    LEFT JOIN *_mappings                                                │
//! │    → no mapping, pending, or synced but updated since synced_at        │
//! │                                                                         │
//! │  orders      completed AND no invoice mapping                          │
//! │  payments    completed AND not yet registered                          │
//! │              AND (invoice synced/paid OR never attempted)              │
//! │  refunds     not yet credited                                          │
//! │              AND (invoice synced/paid OR never attempted)              │
//! │                                                                         │
//! │  Failed mappings are never selected: retry is admin-triggered.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payments and refunds have no mapping table. Their push history is read
//! from `payment_sync` log entries: an id listed in `details.payment_ids` (or
//! `refund_ids`) was attempted, and pushed unless it also appears in
//! `details.errors`. A payment blocked by an unsynced invoice is attempted
//! once, logged as failed, and picked up again once the invoice settles.
//!
//! The `insert` methods exist for the owning subsystems and for tests; the
//! sync engine itself only reads.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tally_core::{CatalogItem, Customer, Order, OrderItem, Payment, Refund};

// =============================================================================
// Customers
// =============================================================================

const CUSTOMER_COLUMNS: &str = "c.id, c.tenant_id, c.first_name, c.last_name, c.phone, c.email, \
                                c.address, c.notes, c.created_at, c.updated_at";

/// Repository for customers.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Gets a tenant's customer by id.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!(
            "SELECT {} FROM customers c WHERE c.tenant_id = ?1 AND c.id = ?2",
            CUSTOMER_COLUMNS
        );

        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(customer)
    }

    /// Inserts or replaces a customer.
    pub async fn upsert(&self, customer: &Customer) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (
                id, tenant_id, first_name, last_name, phone, email,
                address, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                phone = excluded.phone,
                email = excluded.email,
                address = excluded.address,
                notes = excluded.notes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.tenant_id)
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(&customer.phone)
        .bind(&customer.email)
        .bind(&customer.address)
        .bind(&customer.notes)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ids of customers that need a push.
    pub async fn unsynced_ids(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT c.id FROM customers c
            LEFT JOIN customer_mappings m
                ON m.tenant_id = c.tenant_id AND m.local_id = c.id
            WHERE c.tenant_id = ?1
              AND (m.local_id IS NULL
                   OR m.status = 'pending'
                   OR (m.status = 'synced' AND c.updated_at > m.synced_at))
            ORDER BY c.created_at, c.id
            LIMIT ?2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(tenant_id = %tenant_id, count = ids.len(), "Unsynced customers");
        Ok(ids)
    }
}

// =============================================================================
// Catalog Items
// =============================================================================

const CATALOG_COLUMNS: &str = "i.id, i.tenant_id, i.kind, i.name, i.description, i.price_cents, \
                               i.is_active, i.created_at, i.updated_at";

/// Repository for services and retail products.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Gets a tenant's catalog item by id.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<CatalogItem>> {
        let sql = format!(
            "SELECT {} FROM catalog_items i WHERE i.tenant_id = ?1 AND i.id = ?2",
            CATALOG_COLUMNS
        );

        let item = sqlx::query_as::<_, CatalogItem>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// Inserts or replaces a catalog item.
    pub async fn upsert(&self, item: &CatalogItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO catalog_items (
                id, tenant_id, kind, name, description, price_cents,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                description = excluded.description,
                price_cents = excluded.price_cents,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.tenant_id)
        .bind(item.kind)
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.price_cents)
        .bind(item.is_active)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ids of catalog items that need a push.
    pub async fn unsynced_ids(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT i.id FROM catalog_items i
            LEFT JOIN product_mappings m
                ON m.tenant_id = i.tenant_id AND m.local_id = i.id
            WHERE i.tenant_id = ?1
              AND (m.local_id IS NULL
                   OR m.status = 'pending'
                   OR (m.status = 'synced' AND i.updated_at > m.synced_at))
            ORDER BY i.created_at, i.id
            LIMIT ?2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(tenant_id = %tenant_id, count = ids.len(), "Unsynced catalog items");
        Ok(ids)
    }
}

// =============================================================================
// Orders
// =============================================================================

const ORDER_COLUMNS: &str = "o.id, o.tenant_id, o.customer_id, o.total_cents, o.status, o.created_at";

/// Repository for orders and their lines.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets a tenant's order by id.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<Order>> {
        let sql = format!(
            "SELECT {} FROM orders o WHERE o.tenant_id = ?1 AND o.id = ?2",
            ORDER_COLUMNS
        );

        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
    }

    /// Lines of an order, in entry order.
    pub async fn items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT id, order_id, name, unit_price_cents, quantity, vat_rate_bps
            FROM order_items
            WHERE order_id = ?1
            ORDER BY position, id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Inserts an order with its lines in one transaction.
    pub async fn insert(&self, order: &Order, items: &[OrderItem]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, tenant_id, customer_id, total_cents, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&order.id)
        .bind(&order.tenant_id)
        .bind(&order.customer_id)
        .bind(order.total_cents)
        .bind(order.status)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, position, name, unit_price_cents, quantity, vat_rate_bps
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&item.id)
            .bind(&order.id)
            .bind(position as i64)
            .bind(&item.name)
            .bind(item.unit_price_cents)
            .bind(item.quantity)
            .bind(item.vat_rate_bps)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Ids of completed orders that have never been invoiced remotely.
    pub async fn uninvoiced_ids(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT o.id FROM orders o
            LEFT JOIN invoice_mappings m
                ON m.tenant_id = o.tenant_id AND m.local_id = o.id
            WHERE o.tenant_id = ?1
              AND o.status = 'completed'
              AND m.local_id IS NULL
            ORDER BY o.created_at, o.id
            LIMIT ?2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(tenant_id = %tenant_id, count = ids.len(), "Uninvoiced orders");
        Ok(ids)
    }
}

// =============================================================================
// Payments
// =============================================================================

const PAYMENT_COLUMNS: &str = "p.id, p.tenant_id, p.order_id, p.amount_cents, p.currency, p.method, \
                               p.gateway_reference, p.status, p.processed_at, p.created_at";

/// Repository for payments.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Gets a tenant's payment by id.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments p WHERE p.tenant_id = ?1 AND p.id = ?2",
            PAYMENT_COLUMNS
        );

        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    /// All payments recorded against an order, oldest first.
    pub async fn for_order(&self, tenant_id: &str, order_id: &str) -> DbResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments p WHERE p.tenant_id = ?1 AND p.order_id = ?2 \
             ORDER BY COALESCE(p.processed_at, p.created_at), p.id",
            PAYMENT_COLUMNS
        );

        let payments = sqlx::query_as::<_, Payment>(&sql)
            .bind(tenant_id)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    /// Inserts a payment.
    pub async fn insert(&self, payment: &Payment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, tenant_id, order_id, amount_cents, currency, method,
                gateway_reference, status, processed_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.tenant_id)
        .bind(&payment.order_id)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(&payment.method)
        .bind(&payment.gateway_reference)
        .bind(payment.status)
        .bind(payment.processed_at)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ids of completed payments not yet registered remotely.
    pub async fn unsynced_ids(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<String>> {
        let sql = format!(
            r#"
            SELECT p.id FROM payments p
            LEFT JOIN invoice_mappings m
                ON m.tenant_id = p.tenant_id AND m.local_id = p.order_id
            WHERE p.tenant_id = ?1
              AND p.status = 'completed'
              AND NOT {pushed}
              AND (m.status IN ('synced', 'paid') OR NOT {attempted})
            ORDER BY COALESCE(p.processed_at, p.created_at), p.id
            LIMIT ?2
            "#,
            pushed = logged_in("payment_ids", "p", true),
            attempted = logged_in("payment_ids", "p", false),
        );

        let ids = sqlx::query_scalar::<_, String>(&sql)
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(tenant_id = %tenant_id, count = ids.len(), "Unsynced payments");
        Ok(ids)
    }
}

// =============================================================================
// Refunds
// =============================================================================

const REFUND_COLUMNS: &str =
    "r.id, r.tenant_id, r.payment_id, r.amount_cents, r.reason, r.processed_at, r.created_at";

/// Repository for refunds.
#[derive(Debug, Clone)]
pub struct RefundRepository {
    pool: SqlitePool,
}

impl RefundRepository {
    /// Creates a new RefundRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RefundRepository { pool }
    }

    /// Gets a tenant's refund by id.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<Refund>> {
        let sql = format!(
            "SELECT {} FROM refunds r WHERE r.tenant_id = ?1 AND r.id = ?2",
            REFUND_COLUMNS
        );

        let refund = sqlx::query_as::<_, Refund>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(refund)
    }

    /// Inserts a refund.
    pub async fn insert(&self, refund: &Refund) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, tenant_id, payment_id, amount_cents, reason, processed_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.tenant_id)
        .bind(&refund.payment_id)
        .bind(refund.amount_cents)
        .bind(&refund.reason)
        .bind(refund.processed_at)
        .bind(refund.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ids of refunds without a remote credit note.
    pub async fn unsynced_ids(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<String>> {
        let sql = format!(
            r#"
            SELECT r.id FROM refunds r
            JOIN payments p ON p.id = r.payment_id
            LEFT JOIN invoice_mappings m
                ON m.tenant_id = p.tenant_id AND m.local_id = p.order_id
            WHERE r.tenant_id = ?1
              AND NOT {pushed}
              AND (m.status IN ('synced', 'paid') OR NOT {attempted})
            ORDER BY COALESCE(r.processed_at, r.created_at), r.id
            LIMIT ?2
            "#,
            pushed = logged_in("refund_ids", "r", true),
            attempted = logged_in("refund_ids", "r", false),
        );

        let ids = sqlx::query_scalar::<_, String>(&sql)
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        debug!(tenant_id = %tenant_id, count = ids.len(), "Unsynced refunds");
        Ok(ids)
    }
}

// =============================================================================
// Push History
// =============================================================================

/// SQL condition: some `payment_sync` log entry lists `{alias}.id` under
/// `details.{list}`. With `pushed`, only entries where it did not fail count.
fn logged_in(list: &str, alias: &str, pushed: bool) -> String {
    let not_failed = if pushed {
        format!(
            " AND NOT EXISTS (SELECT 1 FROM json_each(l.details, '$.errors') e \
             WHERE json_extract(e.value, '$.local_id') = {alias}.id)"
        )
    } else {
        String::new()
    };

    format!(
        "EXISTS (SELECT 1 FROM sync_log l, json_each(l.details, '$.{list}') j \
         WHERE l.tenant_id = {alias}.tenant_id AND l.operation = 'payment_sync' \
         AND j.value = {alias}.id{not_failed})"
    )
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::{Duration, Utc};
    use tally_core::{
        CatalogItemKind, EntityKind, ItemError, MappingKind, MappingUpdate, NewSyncLogEntry, OrderStatus,
        PaymentStatus, RemoteRef, SyncDetails, SyncLogStatus, SyncOperation, TriggerSource,
    };

    fn customer(id: &str) -> Customer {
        let now = Utc::now();
        Customer {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            first_name: "Kari".to_string(),
            last_name: "Nordmann".to_string(),
            phone: None,
            email: None,
            address: Some("Storgata 1, 0123 Oslo".to_string()),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seeded_order(db: &Database) -> Order {
        db.customers().upsert(&customer("c1")).await.unwrap();
        let order = Order {
            id: "o1".into(),
            tenant_id: "t1".into(),
            customer_id: "c1".into(),
            total_cents: 100_000,
            status: OrderStatus::Completed,
            created_at: Utc::now(),
        };
        let items = vec![
            OrderItem {
                id: "i2".into(),
                order_id: "o1".into(),
                name: "Klipp".into(),
                unit_price_cents: 60_000,
                quantity: 1,
                vat_rate_bps: 2500,
            },
            OrderItem {
                id: "i1".into(),
                order_id: "o1".into(),
                name: "Farge".into(),
                unit_price_cents: 20_000,
                quantity: 2,
                vat_rate_bps: 2500,
            },
        ];
        db.orders().insert(&order, &items).await.unwrap();
        order
    }

    fn payment(id: &str, status: PaymentStatus) -> Payment {
        Payment {
            id: id.into(),
            tenant_id: "t1".into(),
            order_id: "o1".into(),
            amount_cents: 100_000,
            currency: "NOK".into(),
            method: "card".into(),
            gateway_reference: None,
            status,
            processed_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unsynced_customers() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customers = db.customers();
        let mappings = db.mappings();

        customers.upsert(&customer("new")).await.unwrap();
        customers.upsert(&customer("synced")).await.unwrap();
        customers.upsert(&customer("failed")).await.unwrap();
        customers.upsert(&customer("stale")).await.unwrap();

        for id in ["synced", "stale"] {
            mappings
                .upsert("t1", MappingKind::Customer, id, &MappingUpdate::synced(Some(RemoteRef::new(1))))
                .await
                .unwrap();
        }
        mappings
            .upsert("t1", MappingKind::Customer, "failed", &MappingUpdate::failed("boom"))
            .await
            .unwrap();

        let mut stale = customer("stale");
        stale.updated_at = Utc::now() + Duration::seconds(5);
        customers.upsert(&stale).await.unwrap();

        let mut ids = customers.unsynced_ids("t1", 100).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["new".to_string(), "stale".to_string()]);
    }

    #[tokio::test]
    async fn test_unsynced_catalog_items() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let item = CatalogItem {
            id: "s1".into(),
            tenant_id: "t1".into(),
            kind: CatalogItemKind::Service,
            name: "Herreklipp".into(),
            description: None,
            price_cents: 45_000,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        db.catalog().upsert(&item).await.unwrap();

        assert_eq!(db.catalog().unsynced_ids("t1", 10).await.unwrap(), vec!["s1"]);
        let loaded = db.catalog().get("t1", "s1").await.unwrap().unwrap();
        assert_eq!(loaded.kind, CatalogItemKind::Service);

        db.mappings()
            .upsert("t1", MappingKind::Product, "s1", &MappingUpdate::synced(Some(RemoteRef::new(5))))
            .await
            .unwrap();
        assert!(db.catalog().unsynced_ids("t1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_items_keep_entry_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seeded_order(&db).await;

        let items = db.orders().items("o1").await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Klipp", "Farge"]);

        assert_eq!(db.orders().uninvoiced_ids("t1", 10).await.unwrap(), vec!["o1"]);
        assert!(db.orders().get("t2", "o1").await.unwrap().is_none());
    }

    async fn log_payment_batch(db: &Database, details: SyncDetails) {
        let failed = details.errors().len() as u32;
        db.sync_log()
            .append(NewSyncLogEntry {
                tenant_id: "t1".into(),
                operation: SyncOperation::PaymentSync,
                status: if failed == 0 {
                    SyncLogStatus::Success
                } else {
                    SyncLogStatus::Failed
                },
                items_processed: 1 - failed.min(1),
                items_failed: failed,
                error_message: None,
                details,
                duration_ms: 3,
                triggered_by: TriggerSource::Scheduled,
            })
            .await
            .unwrap();
    }

    fn failed_item(id: &str) -> Vec<ItemError> {
        vec![ItemError {
            local_id: id.into(),
            message: "Order must be synced before payment".into(),
        }]
    }

    #[tokio::test]
    async fn test_unsynced_payments_exclude_registered() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seeded_order(&db).await;
        db.payments().insert(&payment("p1", PaymentStatus::Completed)).await.unwrap();
        db.payments().insert(&payment("p2", PaymentStatus::Failed)).await.unwrap();
        db.payments().insert(&payment("p3", PaymentStatus::Completed)).await.unwrap();
        db.mappings()
            .upsert("t1", MappingKind::Invoice, "o1", &MappingUpdate::synced(Some(RemoteRef::new(9))))
            .await
            .unwrap();

        let mut ids = db.payments().unsynced_ids("t1", 10).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["p1", "p3"]);

        log_payment_batch(
            &db,
            SyncDetails::for_batch(EntityKind::Payment, vec!["p1".into()], Vec::new()),
        )
        .await;
        assert_eq!(db.payments().unsynced_ids("t1", 10).await.unwrap(), vec!["p3"]);

        // A failed attempt does not count as registered
        log_payment_batch(
            &db,
            SyncDetails::for_batch(EntityKind::Payment, vec!["p3".into()], failed_item("p3")),
        )
        .await;
        assert_eq!(db.payments().unsynced_ids("t1", 10).await.unwrap(), vec!["p3"]);

        assert_eq!(db.payments().for_order("t1", "o1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_blocked_payment_waits_for_invoice() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seeded_order(&db).await;
        db.payments().insert(&payment("p1", PaymentStatus::Completed)).await.unwrap();

        // Never attempted: selected so the missing invoice gets logged
        assert_eq!(db.payments().unsynced_ids("t1", 10).await.unwrap(), vec!["p1"]);

        log_payment_batch(
            &db,
            SyncDetails::for_batch(EntityKind::Payment, vec!["p1".into()], failed_item("p1")),
        )
        .await;
        db.mappings()
            .upsert("t1", MappingKind::Invoice, "o1", &MappingUpdate::failed("HTTP 500"))
            .await
            .unwrap();
        assert!(db.payments().unsynced_ids("t1", 10).await.unwrap().is_empty());

        db.mappings()
            .upsert("t1", MappingKind::Invoice, "o1", &MappingUpdate::synced(Some(RemoteRef::new(9))))
            .await
            .unwrap();
        assert_eq!(db.payments().unsynced_ids("t1", 10).await.unwrap(), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_unsynced_refunds_exclude_credited() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seeded_order(&db).await;
        db.payments().insert(&payment("p1", PaymentStatus::Completed)).await.unwrap();

        let refund = Refund {
            id: "r1".into(),
            tenant_id: "t1".into(),
            payment_id: "p1".into(),
            amount_cents: 10_000,
            reason: Some("Unhappy".into()),
            processed_at: None,
            created_at: Utc::now() - Duration::days(40),
        };
        db.refunds().insert(&refund).await.unwrap();

        assert_eq!(db.refunds().unsynced_ids("t1", 10).await.unwrap(), vec!["r1"]);

        // Registering the payment says nothing about its refund
        log_payment_batch(
            &db,
            SyncDetails::for_batch(EntityKind::Payment, vec!["p1".into()], Vec::new()),
        )
        .await;
        assert_eq!(db.refunds().unsynced_ids("t1", 10).await.unwrap(), vec!["r1"]);

        log_payment_batch(
            &db,
            SyncDetails::for_batch(EntityKind::Refund, vec!["r1".into()], Vec::new()),
        )
        .await;
        assert!(db.refunds().unsynced_ids("t1", 10).await.unwrap().is_empty());
    }
}
