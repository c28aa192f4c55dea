// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Exact conversion between human-readable token amounts and base units.
//!
//! Amounts are handled as decimal strings and [`U256`] integers only. There
//! is no floating point anywhere on this path.

use alloy::primitives::U256;

/// Largest decimal precision whose scale factor fits in a `U256`.
pub const MAX_DECIMALS: u8 = 77;

/// Errors produced while converting amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Invalid amount format: {0:?}")]
    InvalidFormat(String),

    #[error("Too many decimal places (max {max})")]
    TooPrecise { max: u8 },

    #[error("Unsupported token decimals: {0}")]
    UnsupportedDecimals(u8),

    #[error("Amount overflow")]
    Overflow,
}

fn scale(decimals: u8) -> Result<U256, AmountError> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::UnsupportedDecimals(decimals));
    }
    Ok(U256::from(10u8).pow(U256::from(decimals)))
}

fn parse_digits(digits: &str, original: &str) -> Result<U256, AmountError> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::InvalidFormat(original.to_string()));
    }
    U256::from_str_radix(digits, 10).map_err(|_| AmountError::Overflow)
}

/// Parse a human-readable amount into base units.
///
/// # Arguments
/// * `amount` - Amount as a string (e.g., "10.5")
/// * `decimals` - Token decimals (18 for most ERC-20s, 6 for USDC)
///
/// Signs, exponents, thousands separators and more fractional digits than
/// `decimals` are rejected rather than rounded.
pub fn to_base_units(amount: &str, decimals: u8) -> Result<U256, AmountError> {
    let multiplier = scale(decimals)?;
    let trimmed = amount.trim();

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(AmountError::InvalidFormat(amount.to_string()));
    }
    let whole_units = if whole.is_empty() {
        U256::ZERO
    } else {
        parse_digits(whole, amount)?
    };

    let fraction_units = if fraction.is_empty() {
        U256::ZERO
    } else {
        // Trailing zeros carry no value, so "1.50" is fine for 1 decimal.
        let significant = fraction.trim_end_matches('0');
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidFormat(amount.to_string()));
        }
        if significant.len() > decimals as usize {
            return Err(AmountError::TooPrecise { max: decimals });
        }
        let padded = format!("{:0<width$}", significant, width = decimals as usize);
        if padded.is_empty() {
            U256::ZERO
        } else {
            parse_digits(&padded, amount)?
        }
    };

    whole_units
        .checked_mul(multiplier)
        .and_then(|w| w.checked_add(fraction_units))
        .ok_or(AmountError::Overflow)
}

/// Format base units as a human-readable amount without losing precision.
pub fn from_base_units(amount: U256, decimals: u8) -> Result<String, AmountError> {
    let divisor = scale(decimals)?;

    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder.is_zero() {
        return Ok(whole.to_string());
    }

    let decimal_str = format!(
        "{:0>width$}",
        remainder.to_string(),
        width = decimals as usize
    );
    let trimmed = decimal_str.trim_end_matches('0');
    Ok(format!("{}.{}", whole, trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_amount_whole() {
        let result = to_base_units("1", 18).unwrap();
        assert_eq!(result, U256::from(1_000_000_000_000_000_000u64));
    }

    #[test]
    fn test_parse_amount_decimal() {
        let result = to_base_units("10.5", 18).unwrap();
        assert_eq!(result, U256::from(10_500_000_000_000_000_000u128));
    }

    #[test]
    fn test_parse_amount_usdc() {
        // 1.5 USDC = 1_500_000 (6 decimals)
        let result = to_base_units("1.5", 6).unwrap();
        assert_eq!(result, U256::from(1_500_000u64));
    }

    #[test]
    fn test_parse_amount_edge_forms() {
        assert_eq!(to_base_units(".5", 1).unwrap(), U256::from(5u8));
        assert_eq!(to_base_units("7.", 2).unwrap(), U256::from(700u16));
        assert_eq!(to_base_units("1.50", 1).unwrap(), U256::from(15u8));
        assert_eq!(to_base_units("42", 0).unwrap(), U256::from(42u8));
        assert_eq!(to_base_units("0", 18).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_parse_amount_beyond_u128() {
        // 10^30 tokens at 18 decimals does not fit in u128
        let amount = format!("1{}", "0".repeat(30));
        let result = to_base_units(&amount, 18).unwrap();
        assert_eq!(result, U256::from(10u8).pow(U256::from(48u8)));
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        for bad in ["", ".", "-1", "+1", "1e18", "1,000", "1.2.3", "abc", " . "] {
            assert!(
                matches!(to_base_units(bad, 18), Err(AmountError::InvalidFormat(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_parse_amount_rejects_excess_precision() {
        assert_eq!(
            to_base_units("0.0000001", 6),
            Err(AmountError::TooPrecise { max: 6 })
        );
        assert_eq!(to_base_units("1.5", 0), Err(AmountError::TooPrecise { max: 0 }));
    }

    #[test]
    fn test_parse_amount_overflow() {
        let huge = "9".repeat(80);
        assert_eq!(to_base_units(&huge, 0), Err(AmountError::Overflow));
        assert_eq!(
            to_base_units("1", 78),
            Err(AmountError::UnsupportedDecimals(78))
        );
    }

    #[test]
    fn test_format_amount() {
        let one = U256::from(1_000_000_000_000_000_000u64);
        assert_eq!(from_base_units(one, 18).unwrap(), "1");

        let tiny = U256::from(1u8);
        assert_eq!(from_base_units(tiny, 18).unwrap(), "0.000000000000000001");

        let one_and_half = U256::from(1_500_000u64);
        assert_eq!(from_base_units(one_and_half, 6).unwrap(), "1.5");

        assert_eq!(from_base_units(U256::ZERO, 8).unwrap(), "0");
    }

    fn arb_u256() -> impl Strategy<Value = U256> {
        prop::array::uniform32(any::<u8>()).prop_map(|bytes| U256::from_be_bytes(bytes))
    }

    proptest! {
        #[test]
        fn base_units_round_trip(
            raw in arb_u256(),
            decimals in prop::sample::select(vec![0u8, 6, 8, 18]),
        ) {
            let human = from_base_units(raw, decimals).unwrap();
            prop_assert_eq!(to_base_units(&human, decimals).unwrap(), raw);
        }

        #[test]
        fn small_magnitudes_round_trip(
            raw in any::<u64>(),
            decimals in prop::sample::select(vec![0u8, 6, 8, 18]),
        ) {
            let raw = U256::from(raw);
            let human = from_base_units(raw, decimals).unwrap();
            prop_assert_eq!(to_base_units(&human, decimals).unwrap(), raw);
        }
    }
}
