//! # Address Parsing
//!
//! Best-effort split of a free-text customer address into the structured
//! fields the accounting system expects.
//!
//! ```text
//!   "Storgata 1, 0123 Oslo"
//!    └───┬────┘  └┬─┘ └┬─┘
//!     street   postal city
//!
//!   "Storgata 1, Oslo"      → street + city, no postal code
//!   "Storgata 1"            → street only
//! ```
//!
//! Parsing never fails. Input that fits no pattern lands in the closest field.

use serde::{Deserialize, Serialize};

/// Norwegian postal codes are exactly four digits.
const POSTAL_CODE_LEN: usize = 4;

/// Structured form of a free-text address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

/// Splits `"Street, PostalCode City"` on the first comma.
///
/// ## Example
/// ```rust
/// use tally_core::address::parse_address;
///
/// let parsed = parse_address("Storgata 1, 0123 Oslo");
/// assert_eq!(parsed.street.as_deref(), Some("Storgata 1"));
/// assert_eq!(parsed.postal_code.as_deref(), Some("0123"));
/// assert_eq!(parsed.city.as_deref(), Some("Oslo"));
/// ```
pub fn parse_address(raw: &str) -> ParsedAddress {
    let raw = raw.trim();
    if raw.is_empty() {
        return ParsedAddress::default();
    }

    let Some((street, rest)) = raw.split_once(',') else {
        return ParsedAddress {
            street: Some(raw.to_string()),
            ..ParsedAddress::default()
        };
    };

    let rest = rest.trim();
    let (postal_code, city) = match split_postal_code(rest) {
        Some((code, city)) => (Some(code.to_string()), non_empty(city)),
        None => (None, non_empty(rest)),
    };

    ParsedAddress {
        street: non_empty(street),
        postal_code,
        city,
    }
}

/// Matches `"NNNN City"`. Returns `None` unless both parts are present.
fn split_postal_code(rest: &str) -> Option<(&str, &str)> {
    let (code, city) = rest.split_once(char::is_whitespace)?;
    let is_code = code.len() == POSTAL_CODE_LEN && code.chars().all(|c| c.is_ascii_digit());
    let city = city.trim();
    (is_code && !city.is_empty()).then_some((code, city))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_address() {
        let parsed = parse_address("Storgata 1, 0123 Oslo");
        assert_eq!(parsed.street.as_deref(), Some("Storgata 1"));
        assert_eq!(parsed.postal_code.as_deref(), Some("0123"));
        assert_eq!(parsed.city.as_deref(), Some("Oslo"));
    }

    #[test]
    fn test_missing_postal_code_falls_back_to_city() {
        let parsed = parse_address("Storgata 1, Oslo");
        assert_eq!(parsed.street.as_deref(), Some("Storgata 1"));
        assert_eq!(parsed.postal_code, None);
        assert_eq!(parsed.city.as_deref(), Some("Oslo"));
    }

    #[test]
    fn test_multi_word_city_and_extra_commas() {
        let parsed = parse_address("Kirkeveien 12, 1337 Sandvika Sentrum");
        assert_eq!(parsed.city.as_deref(), Some("Sandvika Sentrum"));

        // Only the first comma splits
        let parsed = parse_address("c/o Hansen, Bakken 3, Bergen");
        assert_eq!(parsed.street.as_deref(), Some("c/o Hansen"));
        assert_eq!(parsed.postal_code, None);
        assert_eq!(parsed.city.as_deref(), Some("Bakken 3, Bergen"));
    }

    #[test]
    fn test_malformed_input_does_not_panic() {
        assert_eq!(parse_address(""), ParsedAddress::default());
        assert_eq!(parse_address("Storgata 1").street.as_deref(), Some("Storgata 1"));

        let parsed = parse_address(",");
        assert_eq!(parsed, ParsedAddress::default());

        let parsed = parse_address("Gate 2, 0123");
        assert_eq!(parsed.postal_code, None);
        assert_eq!(parsed.city.as_deref(), Some("0123"));

        let parsed = parse_address("Gate 2, 12345 Oslo");
        assert_eq!(parsed.postal_code, None);
        assert_eq!(parsed.city.as_deref(), Some("12345 Oslo"));

        let parsed = parse_address("Gåte 2, ØØØØ Tromsø");
        assert_eq!(parsed.postal_code, None);
    }
}
