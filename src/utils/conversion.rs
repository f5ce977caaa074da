//! Type conversion and formatting utilities.
//!
//! Functions for converting between on-chain integer amounts (U256) and
//! decimal-adjusted `BigDecimal` values, plus hex formatting.

use alloy::primitives::{hex, U256};
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};

// ============================================
// Hex Encoding
// ============================================

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// ============================================
// U256 <-> BigDecimal
// ============================================

/// Convert alloy U256 into an unsigned BigInt.
pub fn u256_to_bigint(value: U256) -> BigInt {
    let bytes: [u8; 32] = value.to_le_bytes();
    BigInt::from_bytes_le(Sign::Plus, &bytes)
}

/// Convert a raw on-chain amount into a decimal value shifted by `decimals`.
///
/// The conversion is exact: the integer digits are kept and only the scale
/// changes, so `1_000_000` with 6 decimals becomes exactly `1`.
///
/// # Example
/// ```ignore
/// let value = U256::from(1_500_000u64);
/// assert_eq!(int_to_dec(value, 6), BigDecimal::from_str("1.5").unwrap());
/// ```
pub fn int_to_dec(value: U256, decimals: u8) -> BigDecimal {
    BigDecimal::new(u256_to_bigint(value), decimals as i64)
}

/// Convert a u128 reserve value into a decimal value shifted by `decimals`.
pub fn reserve_to_dec(reserve: u128, decimals: u8) -> BigDecimal {
    BigDecimal::new(BigInt::from(reserve), decimals as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_int_to_dec_shifts_by_decimals() {
        let value = U256::from(1_500_000u64);
        assert_eq!(int_to_dec(value, 6), BigDecimal::from_str("1.5").unwrap());

        let one_ether = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(int_to_dec(one_ether, 18), BigDecimal::from(1));
    }

    #[test]
    fn test_int_to_dec_zero_decimals() {
        assert_eq!(int_to_dec(U256::from(42u64), 0), BigDecimal::from(42));
    }

    #[test]
    fn test_reserve_to_dec() {
        assert_eq!(
            reserve_to_dec(2_500_000u128, 6),
            BigDecimal::from_str("2.5").unwrap()
        );
    }

    #[test]
    fn test_hex_encode_lowercase() {
        assert_eq!(hex_encode(&[0xAB, 0x01]), "0xab01");
    }
}
