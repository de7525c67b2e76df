//! On-chain amount conversion for human-readable approval details.

use rust_decimal::Decimal;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert a raw base-unit amount to a decimal with `decimals` fractional digits.
///
/// Returns `None` when `decimals` exceeds what `Decimal` can represent (28).
pub fn base_units_to_decimal(raw: u64, decimals: u32) -> Option<Decimal> {
    if decimals > 28 {
        return None;
    }
    Decimal::try_from_i128_with_scale(raw as i128, decimals)
        .ok()
        .map(|d| d.normalize())
}

/// Convert lamports to SOL.
pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_lamports_to_sol() {
        assert_eq!(lamports_to_sol(1_500_000_000), Decimal::from_str("1.5").unwrap());
        assert_eq!(lamports_to_sol(1), Decimal::from_str("0.000000001").unwrap());
        assert_eq!(lamports_to_sol(0), Decimal::ZERO);
    }

    #[test]
    fn test_base_units_to_decimal() {
        assert_eq!(
            base_units_to_decimal(1_250_000, 6),
            Some(Decimal::from_str("1.25").unwrap())
        );
        assert_eq!(base_units_to_decimal(42, 0), Some(Decimal::from(42)));
        assert_eq!(base_units_to_decimal(1, 29), None);
    }
}
