//! In-memory accounting API and fixtures for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tally_core::translator::{
    RemoteCreditNote, RemoteCustomer, RemoteInvoice, RemoteInvoiceStatus, RemotePayment,
    RemoteProduct,
};
use tally_core::{
    AccountingCredentials, AccountingSettings, CatalogItem, CatalogItemKind, Customer,
    InvoiceStatus, Money, Order, OrderItem, OrderStatus, Payment, PaymentStatus, Refund,
    RemoteRef, SyncSchedule,
};
use tally_db::{default_settings, Database, DbConfig};

use crate::client::{AccountingApi, ApiFactory};
use crate::error::{SyncError, SyncResult};

/// A call the fake received.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    CreateCustomer(String),
    UpdateCustomer(i64),
    CreateProduct(String),
    UpdateProduct(i64),
    CreateInvoice { customer_id: i64, status: InvoiceStatus },
    UpdateInvoiceStatus(i64, InvoiceStatus),
    RegisterPayment { invoice_id: i64, amount: Money },
    CreateCreditNote { invoice_id: i64, amount: Money },
    TestConnection,
}

/// Records calls and hands out increasing remote ids starting at 1000.
///
/// `fail_on(key)` makes calls whose key matches fail with HTTP 500. Keys:
/// customer name, product name, invoice `CustomerID`, payment reference,
/// credit-note reason.
pub struct FakeApi {
    calls: Mutex<Vec<ApiCall>>,
    failing: Mutex<HashSet<String>>,
    next_id: AtomicI64,
    unreachable: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeApi {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            next_id: AtomicI64::new(1000),
            unreachable: AtomicBool::new(false),
        })
    }

    pub fn fail_on(&self, key: impl Into<String>) {
        self.failing.lock().unwrap().insert(key.into());
    }

    pub fn recover(&self, key: &str) {
        self.failing.lock().unwrap().remove(key);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ApiCall, key: &str) -> SyncResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SyncError::transport("connection refused"));
        }
        if self.failing.lock().unwrap().contains(key) {
            return Err(SyncError::RemoteApi {
                status: Some(500),
                message: format!("rejected {}", key),
            });
        }
        Ok(())
    }

    fn next_ref(&self) -> RemoteRef {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        RemoteRef {
            id,
            number: Some(format!("N{}", id)),
        }
    }
}

#[async_trait]
impl AccountingApi for FakeApi {
    async fn create_customer(&self, customer: &RemoteCustomer) -> SyncResult<RemoteRef> {
        self.record(ApiCall::CreateCustomer(customer.name.clone()), &customer.name)?;
        Ok(self.next_ref())
    }

    async fn update_customer(&self, remote_id: i64, customer: &RemoteCustomer) -> SyncResult<()> {
        self.record(ApiCall::UpdateCustomer(remote_id), &customer.name)
    }

    async fn create_product(&self, product: &RemoteProduct) -> SyncResult<RemoteRef> {
        self.record(ApiCall::CreateProduct(product.name.clone()), &product.name)?;
        Ok(self.next_ref())
    }

    async fn update_product(&self, remote_id: i64, product: &RemoteProduct) -> SyncResult<()> {
        self.record(ApiCall::UpdateProduct(remote_id), &product.name)
    }

    async fn create_invoice(&self, invoice: &RemoteInvoice) -> SyncResult<RemoteRef> {
        self.record(
            ApiCall::CreateInvoice {
                customer_id: invoice.customer_id,
                status: invoice.status,
            },
            &invoice.customer_id.to_string(),
        )?;
        Ok(self.next_ref())
    }

    async fn update_invoice_status(
        &self,
        remote_id: i64,
        status: &RemoteInvoiceStatus,
    ) -> SyncResult<()> {
        self.record(
            ApiCall::UpdateInvoiceStatus(remote_id, status.status),
            &remote_id.to_string(),
        )
    }

    async fn register_payment(&self, payment: &RemotePayment) -> SyncResult<RemoteRef> {
        self.record(
            ApiCall::RegisterPayment {
                invoice_id: payment.invoice_id,
                amount: payment.amount,
            },
            &payment.reference,
        )?;
        Ok(self.next_ref())
    }

    async fn create_credit_note(&self, credit_note: &RemoteCreditNote) -> SyncResult<RemoteRef> {
        self.record(
            ApiCall::CreateCreditNote {
                invoice_id: credit_note.original_invoice_id,
                amount: credit_note.amount,
            },
            &credit_note.reason,
        )?;
        Ok(self.next_ref())
    }

    async fn test_connection(&self) -> SyncResult<()> {
        self.record(ApiCall::TestConnection, "companies")
    }
}

/// Hands the same [`FakeApi`] to every tenant.
pub struct FakeFactory {
    api: Arc<FakeApi>,
}

impl FakeFactory {
    pub fn new(api: Arc<FakeApi>) -> Self {
        FakeFactory { api }
    }
}

impl ApiFactory for FakeFactory {
    fn connect(
        &self,
        _tenant_id: &str,
        _credentials: &AccountingCredentials,
    ) -> SyncResult<Arc<dyn AccountingApi>> {
        Ok(self.api.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub async fn test_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, day, hour, 0, 0).unwrap()
}

/// Enabled tenant with credentials and a daily 02:00 schedule.
pub async fn seed_tenant(db: &Database, tenant: &str) -> AccountingSettings {
    let mut settings = default_settings(tenant);
    settings.enabled = true;
    settings.credentials = Some(AccountingCredentials {
        client_id: format!("{}-client", tenant),
        client_secret: "secret".into(),
        company_id: Some(1),
    });
    settings.schedule = SyncSchedule::daily(2, 0);
    db.settings().save(&settings).await.unwrap()
}

pub async fn seed_customer(db: &Database, tenant: &str, id: &str, first: &str, last: &str) {
    let customer = Customer {
        id: id.into(),
        tenant_id: tenant.into(),
        first_name: first.into(),
        last_name: last.into(),
        phone: Some("+47 400 00 000".into()),
        email: None,
        address: Some("Storgata 1, 0123 Oslo".into()),
        notes: None,
        created_at: at(1, 9),
        updated_at: at(1, 9),
    };
    db.customers().upsert(&customer).await.unwrap();
}

pub async fn seed_service(db: &Database, tenant: &str, id: &str, name: &str) {
    let item = CatalogItem {
        id: id.into(),
        tenant_id: tenant.into(),
        kind: CatalogItemKind::Service,
        name: name.into(),
        description: None,
        price_cents: 45_000,
        is_active: true,
        created_at: at(1, 9),
        updated_at: at(1, 9),
    };
    db.catalog().upsert(&item).await.unwrap();
}

/// Completed order of two lines: 600.00 + 2 × 200.00 = 1000.00 ex. VAT.
pub async fn seed_order(db: &Database, tenant: &str, id: &str, customer_id: &str) {
    let order = Order {
        id: id.into(),
        tenant_id: tenant.into(),
        customer_id: customer_id.into(),
        total_cents: 100_000,
        status: OrderStatus::Completed,
        created_at: at(2, 10),
    };
    let items = vec![
        OrderItem {
            id: format!("{}-1", id),
            order_id: id.into(),
            name: "Klipp".into(),
            unit_price_cents: 60_000,
            quantity: 1,
            vat_rate_bps: 2500,
        },
        OrderItem {
            id: format!("{}-2", id),
            order_id: id.into(),
            name: "Farge".into(),
            unit_price_cents: 20_000,
            quantity: 2,
            vat_rate_bps: 2500,
        },
    ];
    db.orders().insert(&order, &items).await.unwrap();
}

pub async fn seed_payment(db: &Database, tenant: &str, id: &str, order_id: &str, cents: i64) {
    let payment = Payment {
        id: id.into(),
        tenant_id: tenant.into(),
        order_id: order_id.into(),
        amount_cents: cents,
        currency: "NOK".into(),
        method: "card".into(),
        gateway_reference: None,
        status: PaymentStatus::Completed,
        processed_at: Some(at(2, 11)),
        created_at: at(2, 11),
    };
    db.payments().insert(&payment).await.unwrap();
}

pub async fn seed_refund(db: &Database, tenant: &str, id: &str, payment_id: &str, cents: i64) {
    let refund = Refund {
        id: id.into(),
        tenant_id: tenant.into(),
        payment_id: payment_id.into(),
        amount_cents: cents,
        reason: Some("Unhappy with colour".into()),
        processed_at: Some(at(3, 12)),
        created_at: at(3, 12),
    };
    db.refunds().insert(&refund).await.unwrap();
}
