//! # Financial Translator
//!
//! Pure functions turning local records into the accounting system's
//! customer, product, invoice, payment and credit-note payloads.
//!
//! ## VAT Arithmetic
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  line amount   = unit_price × quantity                    (exact, øre) │
//! │  line VAT      = amount × bps / 10000   rounded per line for DISPLAY   │
//! │  invoice VAT   = Σ (amount × bps) / 10000   rounded ONCE               │
//! │                                                                         │
//! │  300.00, 150.00, 120.00 @ 25%                                          │
//! │     amount = 570.00   VAT = 142.50   incl. VAT = 712.50                │
//! │                                                                         │
//! │  Rounding never happens between lines, so totals cannot drift.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invoice Status Edges
//! ```text
//!   Invoiced ──► Paid        the only forward edge the engine authorizes
//!   Paid ──X──► Invoiced     refused
//! ```

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::address::parse_address;
use crate::error::{CoreError, CoreResult};
use crate::money::{self, round_scaled, Money};
use crate::types::{
    CatalogItem, CatalogItemKind, Customer, InvoiceStatus, Order, OrderItem, Payment, Refund,
    VatRate,
};
use crate::validation::{self, ValidationResult};

// =============================================================================
// Policy Constants
// =============================================================================

/// Days between invoice date and due date.
pub const PAYMENT_TERMS_DAYS: u64 = 14;

/// Income account for bookable services.
pub const SERVICE_INCOME_ACCOUNT: &str = "3000";

/// Income account for retail products.
pub const PRODUCT_INCOME_ACCOUNT: &str = "3400";

/// VAT code for the standard (high) rate.
pub const HIGH_VAT_CODE: &str = "HIGH";

/// Country code stamped on every exported customer.
pub const DEFAULT_COUNTRY_CODE: &str = "NO";

/// Slack allowed when deciding whether a payment settles an invoice.
pub const SETTLEMENT_TOLERANCE: Money = Money::from_cents(1);

// =============================================================================
// Remote Payloads
// =============================================================================

/// Customer payload for `POST /customer` and `PUT /customer/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteCustomer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country_code: String,
    pub notes: Option<String>,
}

/// Product payload for `POST /product` and `PUT /product/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteProduct {
    pub name: String,
    pub description: Option<String>,
    #[serde(with = "money::decimal")]
    pub price_ex_vat: Money,
    pub income_account: String,
    pub vat_type: String,
    pub active: bool,
}

/// One invoice line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteInvoiceLine {
    pub description: String,
    pub quantity: i64,
    #[serde(with = "money::decimal")]
    pub unit_price: Money,
    #[serde(with = "money::decimal")]
    pub amount: Money,
    /// Percent, e.g. 25.
    #[serde(rename = "VATRate")]
    pub vat_rate: f64,
    #[serde(rename = "VATAmount", with = "money::decimal")]
    pub vat_amount: Money,
}

/// Invoice payload for `POST /invoice`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteInvoice {
    #[serde(rename = "CustomerID")]
    pub customer_id: i64,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    pub status: InvoiceStatus,
    pub notes: Option<String>,
    pub lines: Vec<RemoteInvoiceLine>,
    #[serde(with = "money::decimal")]
    pub total_amount: Money,
    #[serde(rename = "TotalVAT", with = "money::decimal")]
    pub total_vat: Money,
    #[serde(rename = "TotalAmountIncVAT", with = "money::decimal")]
    pub total_amount_inc_vat: Money,
}

/// Body of `PUT /invoice/{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteInvoiceStatus {
    pub status: InvoiceStatus,
}

/// Payment payload for `POST /payment`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemotePayment {
    #[serde(rename = "InvoiceID")]
    pub invoice_id: i64,
    pub payment_date: NaiveDate,
    #[serde(with = "money::decimal")]
    pub amount: Money,
    pub currency: String,
    pub payment_method: String,
    pub reference: String,
}

/// The single line of a credit note.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteCreditNoteLine {
    pub description: String,
    #[serde(with = "money::decimal")]
    pub amount: Money,
}

/// Credit note payload for `POST /credit-note`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteCreditNote {
    #[serde(rename = "OriginalInvoiceID")]
    pub original_invoice_id: i64,
    pub credit_note_date: NaiveDate,
    #[serde(with = "money::decimal")]
    pub amount: Money,
    pub currency: String,
    pub reason: String,
    pub lines: Vec<RemoteCreditNoteLine>,
}

// =============================================================================
// VAT Accumulation
// =============================================================================

/// Invoice totals, each rounded exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvoiceTotals {
    pub amount: Money,
    pub vat: Money,
    pub amount_inc_vat: Money,
}

/// Sums line amounts and unrounded VAT products across an invoice.
#[derive(Debug, Clone, Copy, Default)]
pub struct VatAccumulator {
    amount: Money,
    vat_scaled: i128,
}

impl VatAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one line and returns its display VAT (rounded for this line only).
    pub fn add_line(&mut self, amount: Money, rate: VatRate) -> Money {
        let scaled = amount.cents() as i128 * rate.bps() as i128;
        self.amount += amount;
        self.vat_scaled += scaled;
        Money::from_cents(round_scaled(scaled))
    }

    pub fn totals(&self) -> InvoiceTotals {
        let vat = Money::from_cents(round_scaled(self.vat_scaled));
        InvoiceTotals {
            amount: self.amount,
            vat,
            amount_inc_vat: self.amount + vat,
        }
    }
}

/// Builds invoice lines and their totals.
///
/// ## Example
/// ```rust
/// use tally_core::translator::build_invoice_lines;
/// use tally_core::OrderItem;
///
/// let items: Vec<OrderItem> = [30000, 15000, 12000]
///     .iter()
///     .enumerate()
///     .map(|(i, price)| OrderItem {
///         id: format!("item-{}", i),
///         order_id: "order-1".into(),
///         name: "Cut".into(),
///         unit_price_cents: *price,
///         quantity: 1,
///         vat_rate_bps: 2500,
///     })
///     .collect();
///
/// let (_, totals) = build_invoice_lines(&items);
/// assert_eq!(totals.amount.cents(), 57000);
/// assert_eq!(totals.vat.cents(), 14250);
/// assert_eq!(totals.amount_inc_vat.cents(), 71250);
/// ```
pub fn build_invoice_lines(items: &[OrderItem]) -> (Vec<RemoteInvoiceLine>, InvoiceTotals) {
    let mut acc = VatAccumulator::new();
    let lines = items
        .iter()
        .map(|item| {
            let amount = item.unit_price().multiply_quantity(item.quantity);
            let rate = item.vat_rate();
            let vat_amount = acc.add_line(amount, rate);
            RemoteInvoiceLine {
                description: item.name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price(),
                amount,
                vat_rate: rate.percentage(),
                vat_amount,
            }
        })
        .collect();
    (lines, acc.totals())
}

// =============================================================================
// Invoice Policy
// =============================================================================

/// Due date under the fixed payment terms.
///
/// ```rust
/// use chrono::NaiveDate;
/// use tally_core::translator::due_date;
///
/// let invoiced = NaiveDate::from_ymd_opt(2025, 12, 2).unwrap();
/// assert_eq!(due_date(invoiced), NaiveDate::from_ymd_opt(2025, 12, 16).unwrap());
/// ```
pub fn due_date(invoice_date: NaiveDate) -> NaiveDate {
    invoice_date
        .checked_add_days(Days::new(PAYMENT_TERMS_DAYS))
        .unwrap_or(NaiveDate::MAX)
}

/// True when `paid` settles `total` within [`SETTLEMENT_TOLERANCE`].
pub fn settles_in_full(total: Money, paid: Money) -> bool {
    total.within(paid, SETTLEMENT_TOLERANCE)
}

/// Remote status for an order given what has been paid so far.
pub fn settlement_status(total: Money, paid: Money) -> InvoiceStatus {
    if settles_in_full(total, paid) || paid > total {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Invoiced
    }
}

/// Authorizes a remote invoice status change.
///
/// Staying in place is allowed. The only forward edge is Invoiced → Paid.
pub fn authorize_transition(from: InvoiceStatus, to: InvoiceStatus) -> CoreResult<()> {
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (InvoiceStatus::Invoiced, InvoiceStatus::Paid) => Ok(()),
        (from, to) => Err(CoreError::InvalidStatusTransition { from, to }),
    }
}

// =============================================================================
// Translations
// =============================================================================

/// Everything needed to translate one order into an invoice.
#[derive(Debug, Clone)]
pub struct InvoiceDraft<'a> {
    pub order: &'a Order,
    pub items: &'a [OrderItem],
    pub remote_customer_id: i64,
    /// Order date in the tenant's timezone.
    pub invoice_date: NaiveDate,
    pub currency: &'a str,
    /// Payments recorded against the order (any status).
    pub payments: &'a [Payment],
}

/// Translates an order into an invoice payload.
pub fn translate_invoice(draft: &InvoiceDraft<'_>) -> CoreResult<RemoteInvoice> {
    if draft.items.is_empty() {
        return Err(CoreError::EmptyOrder {
            order_id: draft.order.id.clone(),
        });
    }
    validation::validate_order_items(draft.items)?;

    let (lines, totals) = build_invoice_lines(draft.items);

    let completed: Vec<&Payment> = draft.payments.iter().filter(|p| p.is_completed()).collect();
    let paid: Money = completed.iter().map(|p| p.amount()).sum();
    let status = settlement_status(draft.order.total(), paid);

    let notes = match (status, completed.last()) {
        (InvoiceStatus::Paid, Some(last)) => Some(format!(
            "Betalt via {} - {}",
            last.method,
            last.effective_at().date_naive()
        )),
        _ => None,
    };

    Ok(RemoteInvoice {
        customer_id: draft.remote_customer_id,
        invoice_date: draft.invoice_date,
        due_date: due_date(draft.invoice_date),
        currency: draft.currency.to_string(),
        status,
        notes,
        lines,
        total_amount: totals.amount,
        total_vat: totals.vat,
        total_amount_inc_vat: totals.amount_inc_vat,
    })
}

/// Translates a customer. Fails only on data the remote would reject.
pub fn translate_customer(customer: &Customer) -> ValidationResult<RemoteCustomer> {
    let name = customer.full_name();
    validation::validate_customer_name(&name)?;
    if let Some(email) = customer.email.as_deref() {
        validation::validate_email(email)?;
    }

    let parsed = customer
        .address
        .as_deref()
        .map(parse_address)
        .unwrap_or_default();

    Ok(RemoteCustomer {
        name,
        email: clean(customer.email.as_deref()),
        phone: clean(customer.phone.as_deref()),
        address: parsed.street,
        postal_code: parsed.postal_code,
        city: parsed.city,
        country_code: DEFAULT_COUNTRY_CODE.to_string(),
        notes: clean(customer.notes.as_deref()),
    })
}

/// Income account for a catalog item kind.
pub fn income_account(kind: CatalogItemKind) -> &'static str {
    match kind {
        CatalogItemKind::Service => SERVICE_INCOME_ACCOUNT,
        CatalogItemKind::Product => PRODUCT_INCOME_ACCOUNT,
    }
}

/// Translates a catalog item.
pub fn translate_catalog_item(item: &CatalogItem) -> ValidationResult<RemoteProduct> {
    validation::validate_item_name(&item.name)?;
    validation::validate_price_cents("price", item.price_cents)?;

    Ok(RemoteProduct {
        name: item.name.trim().to_string(),
        description: clean(item.description.as_deref()),
        price_ex_vat: item.price(),
        income_account: income_account(item.kind).to_string(),
        vat_type: HIGH_VAT_CODE.to_string(),
        active: item.is_active,
    })
}

/// Translates a payment against a remote invoice.
pub fn translate_payment(payment: &Payment, remote_invoice_id: i64) -> ValidationResult<RemotePayment> {
    validation::validate_positive_amount("amount", payment.amount_cents)?;

    let reference = payment
        .gateway_reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("PAY-{}", payment.id));

    Ok(RemotePayment {
        invoice_id: remote_invoice_id,
        payment_date: payment.effective_at().date_naive(),
        amount: payment.amount(),
        currency: payment.currency.clone(),
        payment_method: payment.method.clone(),
        reference,
    })
}

/// Translates a refund into a single-line credit note.
pub fn translate_credit_note(
    refund: &Refund,
    remote_invoice_id: i64,
    currency: &str,
) -> ValidationResult<RemoteCreditNote> {
    validation::validate_positive_amount("amount", refund.amount_cents)?;

    let reason = clean(refund.reason.as_deref()).unwrap_or_else(|| "unspecified".to_string());

    Ok(RemoteCreditNote {
        original_invoice_id: remote_invoice_id,
        credit_note_date: refund.effective_at().date_naive(),
        amount: refund.amount(),
        currency: currency.to_string(),
        reason: reason.clone(),
        lines: vec![RemoteCreditNoteLine {
            description: format!("Refund: {}", reason),
            amount: refund.amount(),
        }],
    })
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Unit Tests
// =============================================================================
