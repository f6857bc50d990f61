//! Money helpers: all amounts are `rust_decimal::Decimal` rounded half-up
//! to two places at the edges.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round to two decimal places, half away from zero.
pub fn round_half_up(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Amount in the currency's minimal units (cents, kopecks), the integer
/// representation hosted checkouts expect.
pub fn to_minimal_units(amount: Decimal) -> i64 {
    let cents = round_half_up(amount) * Decimal::from(100);
    cents.trunc().to_i64().unwrap_or(0)
}

/// Render an amount the way the JSON API does: a decimal string with two
/// places.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", round_half_up(amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_half_up_rounding() {
        assert_eq!(round_half_up(dec!(1.005)), dec!(1.01));
        assert_eq!(round_half_up(dec!(1.004)), dec!(1.00));
        assert_eq!(round_half_up(dec!(2.675)), dec!(2.68));
        assert_eq!(round_half_up(dec!(-1.005)), dec!(-1.01));
    }

    #[test]
    fn test_minimal_units() {
        assert_eq!(to_minimal_units(dec!(49.90)), 4990);
        assert_eq!(to_minimal_units(dec!(0.01)), 1);
        assert_eq!(to_minimal_units(dec!(104.705)), 10471);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(dec!(5)), "5.00");
        assert_eq!(format_amount(dec!(12.3)), "12.30");
        assert_eq!(format_amount(dec!(12.345)), "12.35");
    }
}
