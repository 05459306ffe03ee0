//! Hex quantity encoding used by the JSON-RPC interface

use reserve_types::Address;
use rust_decimal::Decimal;

/// Decimals of the native token
pub const NATIVE_DECIMALS: u32 = 18;

fn digits(raw: &str) -> Result<&str, String> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| format!("quantity {:?} lacks 0x prefix", raw))?;
    if digits.is_empty() {
        return Err(format!("quantity {:?} has no digits", raw));
    }
    Ok(digits)
}

pub fn parse_u64(raw: &str) -> Result<u64, String> {
    u64::from_str_radix(digits(raw)?, 16).map_err(|e| format!("quantity {:?}: {}", raw, e))
}

pub fn parse_u128(raw: &str) -> Result<u128, String> {
    u128::from_str_radix(digits(raw)?, 16).map_err(|e| format!("quantity {:?}: {}", raw, e))
}

pub fn encode(value: u64) -> String {
    format!("0x{:x}", value)
}

/// Smallest-unit integer to a token amount
pub fn to_token_amount(units: u128, decimals: u32) -> Result<Decimal, String> {
    let units = i128::try_from(units).map_err(|_| format!("amount {} out of range", units))?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .map(|d| d.normalize())
        .map_err(|e| format!("amount {} out of range: {}", units, e))
}

/// A 20-byte hex account address
pub fn validate_address(address: &Address) -> Result<(), String> {
    let raw = address.as_str();
    let body = raw
        .strip_prefix("0x")
        .ok_or_else(|| format!("address {} lacks 0x prefix", raw))?;
    let bytes = hex::decode(body).map_err(|e| format!("address {}: {}", raw, e))?;
    if bytes.len() != 20 {
        return Err(format!("address {} is {} bytes, expected 20", raw, bytes.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_u64("0x0"), Ok(0));
        assert_eq!(parse_u64("0x1b4"), Ok(436));
        assert_eq!(parse_u64("0XFF"), Ok(255));
        assert!(parse_u64("1b4").is_err());
        assert!(parse_u64("0x").is_err());
        assert!(parse_u64("0xzz").is_err());
    }

    #[test]
    fn encodes_without_leading_zeros() {
        assert_eq!(encode(0), "0x0");
        assert_eq!(encode(436), "0x1b4");
    }

    #[test]
    fn converts_wei_to_ether() {
        let wei = parse_u128("0xde0b6b3a7640000").unwrap();
        assert_eq!(to_token_amount(wei, NATIVE_DECIMALS).unwrap(), dec!(1));
        assert_eq!(to_token_amount(1_500_000_000_000_000_000, NATIVE_DECIMALS).unwrap(), dec!(1.5));
        assert_eq!(to_token_amount(0, NATIVE_DECIMALS).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(validate_address(&Address::from("0x63825c174ab367968EC60f061753D3bbD36A0D8F")).is_ok());
        assert!(validate_address(&Address::from("63825c174ab367968ec60f061753d3bbd36a0d8f")).is_err());
        assert!(validate_address(&Address::from("0x1234")).is_err());
        assert!(validate_address(&Address::from("0xnothex")).is_err());
    }
}
