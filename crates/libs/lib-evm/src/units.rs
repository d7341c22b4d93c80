//! Conversion between human-readable amounts and on-chain smallest units.
//!
//! The decimal precision always comes from configuration. Nothing here
//! assumes 18.

use alloy_primitives::utils::{format_units, parse_units};
use alloy_primitives::{Address, U256};
use lib_core::config::MAX_DECIMALS;
use lib_core::{AppError, Result};
use std::str::FromStr;

/// Native currency (ETH and forks) precision.
pub const NATIVE_DECIMALS: u8 = 18;

/// Scale a human-readable amount to smallest units with `decimals` precision.
///
/// The amount is taken as its shortest decimal form (`0.1`, not the nearest
/// binary value), so what the user typed is what gets sent. Digits beyond the
/// token's precision are rounded half-up.
pub fn to_base_units(amount: f64, decimals: u8) -> Result<U256> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::InvalidInput(format!("Amount must be a positive number, got {}", amount)));
    }
    check_decimals(decimals)?;

    let text = amount.to_string();
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let precision = decimals as usize;

    let value = if fraction.len() <= precision {
        parse_decimal(&text, decimals)?
    } else {
        let kept = if precision == 0 {
            whole.to_string()
        } else {
            format!("{}.{}", whole, &fraction[..precision])
        };
        let truncated = parse_decimal(&kept, decimals)?;
        if fraction.as_bytes()[precision] >= b'5' {
            truncated + U256::from(1u8)
        } else {
            truncated
        }
    };

    if value.is_zero() {
        return Err(AppError::InvalidInput(format!(
            "Amount {} is smaller than the token precision ({} decimals)",
            amount, decimals
        )));
    }
    Ok(value)
}

fn parse_decimal(text: &str, decimals: u8) -> Result<U256> {
    parse_units(text, decimals)
        .map(|parsed| parsed.get_absolute())
        .map_err(|e| AppError::InvalidInput(format!("Invalid amount {}: {}", text, e)))
}

/// Convert smallest units to a human-readable amount with `decimals` precision.
pub fn from_base_units(value: U256, decimals: u8) -> Result<f64> {
    check_decimals(decimals)?;
    let text = format_units(value, decimals)
        .map_err(|e| AppError::Decoding(format!("Cannot format {}: {}", value, e)))?;
    text.parse::<f64>()
        .map_err(|e| AppError::Decoding(format!("Cannot parse {}: {}", text, e)))
}

/// Parse an optional contract address from configuration or a deal record.
///
/// Empty means "not deployed yet" and yields `None`.
pub fn parse_optional_address(value: &str) -> Result<Option<Address>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Address::from_str(value)
        .map(Some)
        .map_err(|e| AppError::InvalidInput(format!("Invalid address {:?}: {}", value, e)))
}

fn check_decimals(decimals: u8) -> Result<()> {
    if decimals > MAX_DECIMALS {
        return Err(AppError::Config(format!("Unsupported decimals {}", decimals)));
    }
    Ok(())
}
