//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Summing invoice lines as floats:                                       │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ drift on every invoice           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer øre                                              │
//! │    Every amount is an i64 count of minor units (1 NOK = 100 øre).       │
//! │    VAT products are accumulated exactly (i128) and rounded ONCE,        │
//! │    when the value leaves the engine as a JSON decimal.                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::money::Money;
//!
//! let line = Money::from_cents(29900).multiply_quantity(2); // 598.00
//! let total = line + Money::from_cents(1450);
//! assert_eq!(total.cents(), 61250);
//! assert_eq!(total.to_decimal_string(), "612.50");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use ts_rs::TS;

/// Basis points in one whole (100%).
pub(crate) const BPS_SCALE: i128 = 10_000;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (øre for NOK).
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  OrderItem.unit_price × quantity ──► line amount ──► invoice totals    │
/// │                                                                         │
/// │  Payment.amount ──► RemotePayment.Amount                               │
/// │  Refund.amount  ──► RemoteCreditNote.Amount                            │
/// │                                                                         │
/// │  Only the serde boundary (`money::decimal`) turns øre into 712.50      │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let price = Money::from_cents(1099); // 10.99
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit (kroner) portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(29900); // 299.00
    /// assert_eq!(unit_price.multiply_quantity(3).cents(), 89700);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Returns true when both amounts differ by at most `tolerance`.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let total = Money::from_cents(100000);
    /// assert!(total.within(Money::from_cents(99999), Money::from_cents(1)));
    /// assert!(!total.within(Money::from_cents(60000), Money::from_cents(1)));
    /// ```
    pub fn within(&self, other: Money, tolerance: Money) -> bool {
        (self.0 - other.0).abs() <= tolerance.0.abs()
    }

    /// Formats the amount as a plain two-decimal string ("712.50").
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

/// Rounds a value scaled by basis points back to øre, half away from zero.
pub(crate) fn round_scaled(scaled: i128) -> i64 {
    let half = BPS_SCALE / 2;
    let rounded = if scaled >= 0 {
        (scaled + half) / BPS_SCALE
    } else {
        (scaled - half) / BPS_SCALE
    };
    rounded as i64
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Output Boundary
// =============================================================================

/// Serde adapter emitting `Money` as a JSON decimal number (`712.5`).
///
/// ## Usage
/// ```rust,ignore
/// #[derive(Serialize)]
/// struct RemoteLine {
///     #[serde(rename = "Amount", with = "crate::money::decimal")]
///     amount: Money,
/// }
/// ```
pub mod decimal {
    use super::Money;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Money, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.cents() as f64 / 100.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Money, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Ok(Money::from_cents((value * 100.0).round() as i64))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(71250).to_string(), "712.50");
        assert_eq!(Money::from_cents(500).to_string(), "5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(0).to_string(), "0.00");
    }

    #[test]
    fn test_round_scaled_half_away_from_zero() {
        // 0.50 × 25% = 0.125 → 0.13
        assert_eq!(round_scaled(50 * 2500), 13);
        assert_eq!(round_scaled(-50 * 2500), -13);
        assert_eq!(round_scaled(30000 * 2500), 7500);
    }

    #[test]
    fn test_within_tolerance() {
        let total = Money::from_cents(100000);
        let tolerance = Money::from_cents(1);
        assert!(total.within(Money::from_cents(100000), tolerance));
        assert!(total.within(Money::from_cents(100001), tolerance));
        assert!(!total.within(Money::from_cents(99998), tolerance));
    }

    #[test]
    fn test_sum() {
        let total: Money = [30000, 15000, 12000]
            .into_iter()
            .map(Money::from_cents)
            .sum();
        assert_eq!(total.cents(), 57000);
    }

    #[test]
    fn test_decimal_boundary() {
        #[derive(Serialize)]
        struct Line {
            #[serde(with = "decimal")]
            amount: Money,
        }

        let json = serde_json::to_value(Line {
            amount: Money::from_cents(71250),
        })
        .unwrap();
        assert_eq!(json["amount"], serde_json::json!(712.5));
    }
}
