//! Minimal ABI plumbing for the handful of contract reads the bot makes.
//!
//! Full ABI machinery would be overkill for two selectors and one event
//! topic; everything here works on 32-byte words.

use rust_decimal::Decimal;

use crate::error::BotError;
use crate::Result;

/// `slot0()` on a Uniswap V3 pool.
pub const SLOT0_SELECTOR: &str = "0x3850c7bd";

/// `balanceOf(address)` on an ERC-20.
pub const BALANCE_OF_SELECTOR: &str = "0x70a08231";

/// keccak256("Transfer(address,address,uint256)"), topic0 of ERC-20 transfers.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Build `balanceOf(address)` calldata. The address must be `0x` plus 40 hex
/// characters.
pub fn encode_balance_of(address: &str) -> Result<String> {
    let bare = address
        .strip_prefix("0x")
        .ok_or_else(|| BotError::Decode(format!("address missing 0x prefix: {address}")))?;
    if bare.len() != 40 || !bare.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BotError::Decode(format!("malformed address: {address}")));
    }
    Ok(format!(
        "{BALANCE_OF_SELECTOR}{:0>64}",
        bare.to_ascii_lowercase()
    ))
}

/// Pad an address to the 32-byte topic form used in log filters.
pub fn address_topic(address: &str) -> Result<String> {
    let bare = address
        .strip_prefix("0x")
        .ok_or_else(|| BotError::Decode(format!("address missing 0x prefix: {address}")))?;
    if bare.len() != 40 || !bare.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BotError::Decode(format!("malformed address: {address}")));
    }
    Ok(format!("0x{:0>64}", bare.to_ascii_lowercase()))
}

/// Split a `0x`-prefixed return payload into 32-byte words.
pub fn decode_words(data: &str) -> Result<Vec<[u8; 32]>> {
    let bare = data
        .strip_prefix("0x")
        .ok_or_else(|| BotError::Decode(format!("payload missing 0x prefix: {data}")))?;
    let bytes = hex::decode(bare).map_err(|e| BotError::Decode(format!("bad hex: {e}")))?;
    if bytes.len() % 32 != 0 {
        return Err(BotError::Decode(format!(
            "payload length {} is not word-aligned",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

/// A 256-bit word as a (high, low) u128 pair.
pub fn word_to_u128_pair(word: &[u8; 32]) -> (u128, u128) {
    let mut hi = [0u8; 16];
    let mut lo = [0u8; 16];
    hi.copy_from_slice(&word[..16]);
    lo.copy_from_slice(&word[16..]);
    (u128::from_be_bytes(hi), u128::from_be_bytes(lo))
}

/// Decode a word holding a quantity that must fit in u128 (balances, gas,
/// log values). Real token supplies sit far below 2^128; anything above is
/// corrupt data, not a balance.
pub fn word_to_u128(word: &[u8; 32]) -> Result<u128> {
    let (hi, lo) = word_to_u128_pair(word);
    if hi != 0 {
        return Err(BotError::Decode("quantity exceeds u128".to_string()));
    }
    Ok(lo)
}

/// Parse a `0x`-prefixed JSON-RPC quantity (block numbers, gas, status).
pub fn parse_quantity(value: &str) -> Result<u128> {
    let bare = value
        .strip_prefix("0x")
        .ok_or_else(|| BotError::Decode(format!("quantity missing 0x prefix: {value}")))?;
    if bare.is_empty() {
        return Err(BotError::Decode("empty quantity".to_string()));
    }
    u128::from_str_radix(bare, 16)
        .map_err(|e| BotError::Decode(format!("bad quantity {value}: {e}")))
}

/// Price of token0 in token1 from a pool's `sqrtPriceX96`.
///
/// The quoted value is `(sqrtPriceX96 / 2^96)^2`. 2^96 itself does not fit
/// in Decimal's 96-bit mantissa, so the sqrt is split into its integer part
/// `q = sqrt >> 96` and the low 96 bits `r`, and `r` is scaled down by 2^48
/// twice.
pub fn sqrt_price_x96_to_price(word: &[u8; 32]) -> Result<Decimal> {
    const TWO_POW_48: i64 = 1 << 48;
    const LOW_96_MASK: u128 = (1u128 << 96) - 1;

    let (hi, lo) = word_to_u128_pair(word);
    // sqrtPriceX96 is uint160: any word bit at or above 160 is corrupt
    // data, not a price.
    if hi >> 32 != 0 {
        return Err(BotError::Decode("sqrtPriceX96 out of range".to_string()));
    }
    let q = (hi << 32) | (lo >> 96);
    if q >= 1u128 << 96 {
        return Err(BotError::Decode("sqrtPriceX96 out of range".to_string()));
    }
    let r = lo & LOW_96_MASK;

    let q_dec = Decimal::from_i128_with_scale(q as i128, 0);
    let frac = Decimal::from_i128_with_scale(r as i128, 0)
        / Decimal::from(TWO_POW_48)
        / Decimal::from(TWO_POW_48);

    let root = q_dec + frac;
    Ok(root * root)
}

/// Convert a raw integer token amount into whole units.
///
/// Split into whole and fractional parts first: raw amounts of
/// high-supply tokens overflow Decimal's mantissa if converted directly.
pub fn raw_to_decimal(raw: u128, decimals: u32) -> Result<Decimal> {
    if decimals > 28 {
        return Err(BotError::Decode(format!(
            "unsupported token decimals: {decimals}"
        )));
    }
    let unit = 10u128.pow(decimals);
    let whole = raw / unit;
    let frac = raw % unit;

    if whole >= 1u128 << 96 {
        return Err(BotError::Decode(format!(
            "token amount {raw} overflows decimal range"
        )));
    }

    Ok(Decimal::from_i128_with_scale(whole as i128, 0)
        + Decimal::from_i128_with_scale(frac as i128, decimals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn word_from_u128(value: u128) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&value.to_be_bytes());
        word
    }

    #[test]
    fn test_encode_balance_of_pads_address() {
        let data =
            encode_balance_of("0x6982508145454Ce325dDbE47a25d4ec3d2311933").unwrap();
        assert_eq!(data.len(), 10 + 64);
        assert!(data.starts_with(BALANCE_OF_SELECTOR));
        assert!(data.ends_with("6982508145454ce325ddbe47a25d4ec3d2311933"));
        assert!(data[10..34].chars().all(|c| c == '0'));
    }

    #[test]
    fn test_encode_balance_of_rejects_garbage() {
        assert!(encode_balance_of("not-an-address").is_err());
        assert!(encode_balance_of("0x1234").is_err());
    }

    #[test]
    fn test_decode_words_alignment() {
        let two_words = format!("0x{}{}", "11".repeat(32), "22".repeat(32));
        assert_eq!(decode_words(&two_words).unwrap().len(), 2);
        assert!(decode_words("0xabcdef").is_err());
        assert!(decode_words("no-prefix").is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1").unwrap(), 1);
        assert_eq!(parse_quantity("0x4a817c800").unwrap(), 20_000_000_000);
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("1234").is_err());
    }

    #[test]
    fn test_sqrt_price_unity() {
        // sqrtPriceX96 == 2^96 encodes a price of exactly 1
        let mut word = [0u8; 32];
        word[19] = 1; // bit 96
        assert_eq!(sqrt_price_x96_to_price(&word).unwrap(), Decimal::ONE);
    }

    #[test]
    fn test_sqrt_price_two_x96_is_four() {
        let mut word = [0u8; 32];
        word[19] = 2; // 2 * 2^96
        assert_eq!(sqrt_price_x96_to_price(&word).unwrap(), dec!(4));
    }

    #[test]
    fn test_sqrt_price_fractional() {
        // sqrtPriceX96 = 2^96 + 2^95 -> root 1.5 -> price 2.25
        let mut word = [0u8; 32];
        word[19] = 1;
        word[20] = 0x80;
        assert_eq!(sqrt_price_x96_to_price(&word).unwrap(), dec!(2.25));
    }

    #[test]
    fn test_sqrt_price_rejects_bits_above_uint160() {
        // A set bit above position 159 previously aliased into a plausible
        // price instead of failing.
        let mut word = [0u8; 32];
        word[0] = 1; // bit 255
        assert!(sqrt_price_x96_to_price(&word).is_err());

        let mut word = [0u8; 32];
        word[11] = 1; // bit 160
        assert!(sqrt_price_x96_to_price(&word).is_err());
    }

    #[test]
    fn test_raw_to_decimal_zero_decimal_token() {
        // decimals == 0 is a legal ERC-20 value; the raw amount is already
        // in whole units.
        assert_eq!(raw_to_decimal(42, 0).unwrap(), dec!(42));
        assert_eq!(raw_to_decimal(0, 0).unwrap(), Decimal::ZERO);
        assert!(raw_to_decimal(1, 29).is_err());
    }

    #[test]
    fn test_raw_to_decimal_eighteen_decimals() {
        assert_eq!(raw_to_decimal(1_500_000_000_000_000_000, 18).unwrap(), dec!(1.5));
        assert_eq!(raw_to_decimal(1, 18).unwrap(), dec!(0.000000000000000001));
    }

    #[test]
    fn test_raw_to_decimal_high_supply_token() {
        // 10^31 raw units at 18 decimals, larger than Decimal's mantissa
        // if converted naively
        let raw = 10u128.pow(31);
        assert_eq!(raw_to_decimal(raw, 18).unwrap(), dec!(10000000000000));
    }

    #[test]
    fn test_word_to_u128_rejects_overflow() {
        let mut word = [0u8; 32];
        word[0] = 1;
        assert!(word_to_u128(&word).is_err());
        assert_eq!(word_to_u128(&word_from_u128(42)).unwrap(), 42);
    }
}
