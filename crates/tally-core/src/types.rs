//! # Domain Types
//!
//! Core domain types used throughout the accounting sync engine.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  INBOUND (handed over by booking / POS)                                │
//! │  ┌────────────┐ ┌─────────────┐ ┌──────────┐ ┌──────────┐ ┌────────┐  │
//! │  │  Customer  │ │ CatalogItem │ │  Order   │ │ Payment  │ │ Refund │  │
//! │  │            │ │ service /   │ │ + items  │ │ order_id │ │ pay_id │  │
//! │  │            │ │ product     │ │          │ │          │ │        │  │
//! │  └────────────┘ └─────────────┘ └──────────┘ └──────────┘ └────────┘  │
//! │                                                                         │
//! │  CORRELATION                         AUDIT                              │
//! │  ┌─────────────────────────────┐    ┌──────────────────────────────┐   │
//! │  │ EntityMapping               │    │ SyncLogEntry                 │   │
//! │  │ (tenant, kind, local_id)    │    │ operation / status / counts  │   │
//! │  │   → remote_id, status       │    │ details: SyncDetails (enum)  │   │
//! │  └─────────────────────────────┘    └──────────────────────────────┘   │
//! │                                                                         │
//! │  CONFIGURATION                                                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ AccountingSettings: enabled, credentials, schedule, timezone    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;
use crate::schedule::SyncSchedule;

// =============================================================================
// VAT Rate
// =============================================================================

/// VAT rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so Norway's standard rate of 25% is 2500 bps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VatRate(u32);

impl VatRate {
    /// Norwegian standard ("high") VAT rate.
    pub const STANDARD: VatRate = VatRate(2500);

    /// Creates a VAT rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        VatRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (output boundary only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero VAT rate.
    #[inline]
    pub const fn zero() -> Self {
        VatRate(0)
    }
}

impl Default for VatRate {
    fn default() -> Self {
        VatRate::STANDARD
    }
}

// =============================================================================
// Customer
// =============================================================================

/// A salon customer as held by the booking system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Free text, usually "Street 1, 0123 City".
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Returns "First Last", trimmed.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

// =============================================================================
// Catalog Item
// =============================================================================

/// Whether a catalog item is a bookable service or a retail product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum CatalogItemKind {
    Service,
    Product,
}

/// A service or retail product from the salon catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CatalogItem {
    pub id: String,
    pub tenant_id: String,
    pub kind: CatalogItemKind,
    pub name: String,
    pub description: Option<String>,
    /// Price excluding VAT, in øre.
    pub price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Order
// =============================================================================

/// Lifecycle of a POS order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
    Refunded,
}

/// An order that becomes a remote invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// One line of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub vat_rate_bps: i64,
}

impl OrderItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Negative rates in storage are treated as zero.
    #[inline]
    pub fn vat_rate(&self) -> VatRate {
        VatRate::from_bps(u32::try_from(self.vat_rate_bps).unwrap_or(0))
    }
}

// =============================================================================
// Payment & Refund
// =============================================================================

/// Gateway state of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// A payment captured against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: String,
    pub tenant_id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub currency: String,
    /// Payment method label ("card", "vipps", "cash", ...).
    pub method: String,
    pub gateway_reference: Option<String>,
    pub status: PaymentStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    /// When the money moved: processing time, or creation time as fallback.
    pub fn effective_at(&self) -> DateTime<Utc> {
        self.processed_at.unwrap_or(self.created_at)
    }
}

/// A refund of (part of) a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Refund {
    pub id: String,
    pub tenant_id: String,
    pub payment_id: String,
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Refund {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    pub fn effective_at(&self) -> DateTime<Utc> {
        self.processed_at.unwrap_or(self.created_at)
    }
}

// =============================================================================
// Remote Invoice Status
// =============================================================================

/// Invoice status in the external accounting system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum InvoiceStatus {
    Draft,
    Invoiced,
    Paid,
    Cancelled,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvoiceStatus::Draft => "Draft",
            InvoiceStatus::Invoiced => "Invoiced",
            InvoiceStatus::Paid => "Paid",
            InvoiceStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "invoiced" => Ok(InvoiceStatus::Invoiced),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" | "canceled" => Ok(InvoiceStatus::Cancelled),
            other => Err(crate::error::ValidationError::InvalidFormat {
                field: "invoice_status".to_string(),
                reason: format!("unknown invoice status '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Entity Mapping
// =============================================================================

/// Entity kinds that carry a persistent mapping row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    Customer,
    Product,
    Invoice,
}

impl MappingKind {
    /// Returns true if `status` exists for this kind (`paid` is invoice-only).
    pub fn allows(&self, status: MappingStatus) -> bool {
        status != MappingStatus::Paid || *self == MappingKind::Invoice
    }
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MappingKind::Customer => "customer",
            MappingKind::Product => "product",
            MappingKind::Invoice => "invoice",
        };
        f.write_str(s)
    }
}

/// Sync state of one mapping row.
///
/// ## State Machine
/// ```text
///   (absent) ──push ok──► synced ──payment settles──► paid (invoice only)
///      │                   ▲  │
///      │ push fails        │  │ push fails
///      ▼                   │  ▼
///    failed ──admin retry──┘ failed (remote_id kept)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Pending,
    Synced,
    Failed,
    Paid,
}

impl MappingStatus {
    /// True for states a dependent entity may build on.
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(self, MappingStatus::Synced | MappingStatus::Paid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Pending => "pending",
            MappingStatus::Synced => "synced",
            MappingStatus::Failed => "failed",
            MappingStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted correlation between a local entity and its remote counterpart.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EntityMapping {
    pub tenant_id: String,
    pub kind: MappingKind,
    pub local_id: String,
    /// Absent when the very first push failed.
    pub remote_id: Option<i64>,
    /// Human-facing remote number (customer/invoice number), if returned.
    pub remote_number: Option<String>,
    pub status: MappingStatus,
    /// Present iff `status == Failed`.
    pub error_message: Option<String>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl EntityMapping {
    /// A remote record exists, so the next push is an update.
    #[inline]
    pub fn has_remote(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// Identity of a record the remote system just created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub id: i64,
    pub number: Option<String>,
}

impl RemoteRef {
    pub fn new(id: i64) -> Self {
        RemoteRef { id, number: None }
    }
}

/// A mapping write. Constructors keep `error_message` tied to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingUpdate {
    remote: Option<RemoteRef>,
    status: MappingStatus,
    error_message: Option<String>,
}

impl MappingUpdate {
    /// Push succeeded. `remote` is `None` when updating an existing record.
    pub fn synced(remote: Option<RemoteRef>) -> Self {
        MappingUpdate {
            remote,
            status: MappingStatus::Synced,
            error_message: None,
        }
    }

    /// Push failed. Any remote id already stored is kept.
    pub fn failed(error: impl Into<String>) -> Self {
        MappingUpdate {
            remote: None,
            status: MappingStatus::Failed,
            error_message: Some(error.into()),
        }
    }

    /// Invoice fully settled by a payment.
    pub fn paid() -> Self {
        MappingUpdate {
            remote: None,
            status: MappingStatus::Paid,
            error_message: None,
        }
    }

    pub fn remote(&self) -> Option<&RemoteRef> {
        self.remote.as_ref()
    }

    pub fn status(&self) -> MappingStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

// =============================================================================
// Sync Log
// =============================================================================

/// Entity kinds accepted by the manual trigger surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Customer,
    Product,
    Invoice,
    Payment,
    Refund,
}

impl EntityKind {
    /// Order in which a full run walks the precondition chain.
    pub const RUN_ORDER: [EntityKind; 5] = [
        EntityKind::Customer,
        EntityKind::Product,
        EntityKind::Invoice,
        EntityKind::Payment,
        EntityKind::Refund,
    ];

    /// Sync Log operation this kind is recorded under.
    pub fn operation(&self) -> SyncOperation {
        match self {
            EntityKind::Customer => SyncOperation::CustomerSync,
            EntityKind::Product => SyncOperation::ProductSync,
            EntityKind::Invoice => SyncOperation::InvoiceSync,
            EntityKind::Payment | EntityKind::Refund => SyncOperation::PaymentSync,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Product => "product",
            EntityKind::Invoice => "invoice",
            EntityKind::Payment => "payment",
            EntityKind::Refund => "refund",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" | "customers" => Ok(EntityKind::Customer),
            "product" | "products" | "service" | "services" => Ok(EntityKind::Product),
            "invoice" | "invoices" | "order" | "orders" => Ok(EntityKind::Invoice),
            "payment" | "payments" => Ok(EntityKind::Payment),
            "refund" | "refunds" | "credit_note" => Ok(EntityKind::Refund),
            other => Err(crate::error::ValidationError::InvalidFormat {
                field: "entity_kind".to_string(),
                reason: format!("unknown entity kind '{}'", other),
            }),
        }
    }
}

/// Operation recorded on a Sync Log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    CustomerSync,
    ProductSync,
    InvoiceSync,
    PaymentSync,
    TestConnection,
}

/// Outcome of a sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogStatus {
    Success,
    Partial,
    Failed,
}

impl SyncLogStatus {
    /// Derives a batch status from its counts.
    ///
    /// ```rust
    /// use tally_core::SyncLogStatus;
    ///
    /// assert_eq!(SyncLogStatus::from_counts(5, 0), SyncLogStatus::Success);
    /// assert_eq!(SyncLogStatus::from_counts(3, 2), SyncLogStatus::Partial);
    /// assert_eq!(SyncLogStatus::from_counts(0, 2), SyncLogStatus::Failed);
    /// ```
    pub fn from_counts(processed: u32, failed: u32) -> Self {
        if failed == 0 {
            SyncLogStatus::Success
        } else if processed == 0 {
            SyncLogStatus::Failed
        } else {
            SyncLogStatus::Partial
        }
    }

    /// Folds batch statuses of one run into a run status.
    pub fn combine(statuses: &[SyncLogStatus]) -> Self {
        if statuses.iter().all(|s| *s == SyncLogStatus::Success) {
            SyncLogStatus::Success
        } else if statuses.iter().all(|s| *s == SyncLogStatus::Failed) {
            SyncLogStatus::Failed
        } else {
            SyncLogStatus::Partial
        }
    }
}

impl fmt::Display for SyncLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncLogStatus::Success => "success",
            SyncLogStatus::Partial => "partial",
            SyncLogStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Who started a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Scheduled,
    Api,
}

/// One failing entity inside a sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ItemError {
    pub local_id: String,
    pub message: String,
}

/// Structured details of a Sync Log entry, one variant per operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncDetails {
    Customer {
        customer_ids: Vec<String>,
        errors: Vec<ItemError>,
    },
    Product {
        item_ids: Vec<String>,
        errors: Vec<ItemError>,
    },
    Invoice {
        order_ids: Vec<String>,
        errors: Vec<ItemError>,
    },
    Payment {
        payment_ids: Vec<String>,
        refund_ids: Vec<String>,
        errors: Vec<ItemError>,
    },
    Connection {
        reachable: bool,
    },
}

impl SyncDetails {
    /// Builds the details for a batch of `kind`.
    pub fn for_batch(kind: EntityKind, ids: Vec<String>, errors: Vec<ItemError>) -> Self {
        match kind {
            EntityKind::Customer => SyncDetails::Customer {
                customer_ids: ids,
                errors,
            },
            EntityKind::Product => SyncDetails::Product {
                item_ids: ids,
                errors,
            },
            EntityKind::Invoice => SyncDetails::Invoice {
                order_ids: ids,
                errors,
            },
            EntityKind::Payment => SyncDetails::Payment {
                payment_ids: ids,
                refund_ids: Vec::new(),
                errors,
            },
            EntityKind::Refund => SyncDetails::Payment {
                payment_ids: Vec::new(),
                refund_ids: ids,
                errors,
            },
        }
    }

    /// Failing entities recorded in these details.
    pub fn errors(&self) -> &[ItemError] {
        match self {
            SyncDetails::Customer { errors, .. }
            | SyncDetails::Product { errors, .. }
            | SyncDetails::Invoice { errors, .. }
            | SyncDetails::Payment { errors, .. } => errors,
            SyncDetails::Connection { .. } => &[],
        }
    }
}

/// Immutable audit record of one sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncLogEntry {
    pub id: String,
    pub tenant_id: String,
    pub operation: SyncOperation,
    pub status: SyncLogStatus,
    pub items_processed: u32,
    pub items_failed: u32,
    pub error_message: Option<String>,
    pub details: SyncDetails,
    pub duration_ms: u32,
    pub triggered_by: TriggerSource,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A Sync Log entry before it is stored.
#[derive(Debug, Clone)]
pub struct NewSyncLogEntry {
    pub tenant_id: String,
    pub operation: SyncOperation,
    pub status: SyncLogStatus,
    pub items_processed: u32,
    pub items_failed: u32,
    pub error_message: Option<String>,
    pub details: SyncDetails,
    pub duration_ms: u32,
    pub triggered_by: TriggerSource,
}

// =============================================================================
// Tenant Accounting Settings
// =============================================================================

/// OAuth client credentials for the tenant's accounting company.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountingCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Remote company the tenant books into.
    pub company_id: Option<i64>,
}

impl fmt::Debug for AccountingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountingCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("company_id", &self.company_id)
            .finish()
    }
}

/// Per-tenant integration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingSettings {
    pub tenant_id: String,
    pub enabled: bool,
    pub credentials: Option<AccountingCredentials>,
    pub schedule: SyncSchedule,
    /// IANA zone name, e.g. "Europe/Oslo".
    pub timezone: String,
    /// Operating currency (ISO 4217).
    pub currency: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncLogStatus>,
    pub last_sync_errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
