use rust_decimal::{Decimal, RoundingStrategy};

/// Prices and sizes travel the wire truncated to 8 fractional digits.
pub fn quantize_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(8, RoundingStrategy::ToZero)
}

/// Percentages are truncated to 4 fractional digits.
pub fn quantize_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, RoundingStrategy::ToZero)
}

/// Position sizes are rounded to 6 fractional digits before submission.
pub fn quantize_size(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(6, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_truncates_not_rounds() {
        assert_eq!(
            quantize_price(dec!(0.123456789999)),
            dec!(0.12345678)
        );
    }

    #[test]
    fn test_percent_four_digits() {
        assert_eq!(quantize_percent(dec!(66.666666)), dec!(66.6666));
    }

    #[test]
    fn test_size_six_digits() {
        assert_eq!(quantize_size(dec!(0.0049999999)), dec!(0.005));
    }
}
