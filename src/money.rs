//! Decimal-as-string money handling.
//!
//! Monetary values are stored and served as strings; all arithmetic goes
//! through `rust_decimal` here so no caller does float math on prices.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};

/// Parse a stored or client-supplied amount.
pub fn parse_amount(value: &str) -> AppResult<Decimal> {
    value
        .trim()
        .parse::<Decimal>()
        .map_err(|_| AppError::Validation(format!("Invalid amount: {}", value)))
}

/// Format an amount back to its canonical string form.
pub fn format_amount(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Convert to minor units (kopecks) for the payment gateway.
pub fn to_minor_units(value: Decimal) -> i64 {
    (value * Decimal::from(100)).round().to_i64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() {
        let amount = parse_amount("500.50").unwrap();
        assert_eq!(format_amount(amount), "500.5");
        assert_eq!(format_amount(parse_amount("1000").unwrap()), "1000");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_amount("12,50").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn minor_units() {
        assert_eq!(to_minor_units(parse_amount("500").unwrap()), 50000);
        assert_eq!(to_minor_units(parse_amount("12.34").unwrap()), 1234);
    }
}
