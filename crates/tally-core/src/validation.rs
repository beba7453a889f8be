//! # Validation Module
//!
//! Checks run on local data before it is exported.
//!
//! ## Where Validation Sits
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Local record ──► validate (THIS MODULE) ──► translate ──► HTTP push   │
//! │                        │                                                │
//! │                        └── ValidationError                             │
//! │                              → mapping marked failed                   │
//! │                              → no remote call                          │
//! │                              → not retried until the record changes    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::OrderItem;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest name the accounting system accepts.
pub const MAX_NAME_LEN: usize = 200;

/// Validates a customer display name.
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_customer_name;
///
/// assert!(validate_customer_name("Kari Nordmann").is_ok());
/// assert!(validate_customer_name("   ").is_err());
/// ```
pub fn validate_customer_name(name: &str) -> ValidationResult<()> {
    validate_name("name", name)
}

/// Validates a catalog item name.
pub fn validate_item_name(name: &str) -> ValidationResult<()> {
    validate_name("name", name)
}

fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::required(field));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// Loose email shape check: one `@`, something on both sides, a dot in the domain.
///
/// Blank values pass; they are exported as absent.
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let email = email.trim();
    if email.is_empty() {
        return Ok(());
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "email".to_string(),
            reason: format!("'{}' is not an email address", email),
        })
    }
}

/// Validates a price in øre (zero allowed for free services).
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a payment or refund amount.
pub fn validate_positive_amount(field: &str, cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates order lines before they become invoice lines.
pub fn validate_order_items(items: &[OrderItem]) -> ValidationResult<()> {
    for item in items {
        if item.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: format!("quantity of '{}'", item.name),
            });
        }
        validate_price_cents("unit_price", item.unit_price_cents)?;
        if !(0..=10_000).contains(&item.vat_rate_bps) {
            return Err(ValidationError::OutOfRange {
                field: "vat_rate_bps".to_string(),
                min: 0,
                max: 10_000,
            });
        }
    }
    Ok(())
}

/// Validates an ISO 4217 currency code ("NOK").
pub fn validate_currency(code: &str) -> ValidationResult<()> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "currency".to_string(),
            reason: format!("'{}' is not a three-letter currency code", code),
        })
    }
}
