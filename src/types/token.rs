// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Token amounts.
//!
//! Amounts are arbitrary precision. On the wire they use the chain's byte form:
//! an empty string for zero, otherwise a sign byte (0 positive, 1 negative)
//! followed by the big-endian magnitude.

use crate::error::{KernelError, Result};
use num_bigint::{BigInt, Sign};
use num_traits::Zero;

pub type TokenAmount = BigInt;

pub fn token_to_bytes(amount: &TokenAmount) -> Vec<u8> {
    if amount.is_zero() {
        return Vec::new();
    }
    let (sign, magnitude) = amount.to_bytes_be();
    let mut out = Vec::with_capacity(magnitude.len() + 1);
    out.push(if sign == Sign::Minus { 1 } else { 0 });
    out.extend_from_slice(&magnitude);
    out
}

pub fn token_from_bytes(bytes: &[u8]) -> Result<TokenAmount> {
    let Some((&sign, magnitude)) = bytes.split_first() else {
        return Ok(TokenAmount::zero());
    };
    let sign = match sign {
        0 => Sign::Plus,
        1 => Sign::Minus,
        other => return Err(KernelError::Decode(format!("invalid token sign byte {other}"))),
    };
    Ok(BigInt::from_bytes_be(sign, magnitude))
}

/// Parses the decimal string form used by JSON-RPC endpoints.
pub fn parse_token(s: &str) -> Result<TokenAmount> {
    s.trim()
        .parse::<BigInt>()
        .map_err(|e| KernelError::Decode(format!("invalid token amount {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_empty() {
        assert!(token_to_bytes(&TokenAmount::zero()).is_empty());
        assert_eq!(token_from_bytes(&[]).unwrap(), TokenAmount::zero());
    }

    #[test]
    fn test_sign_byte() {
        assert_eq!(token_to_bytes(&TokenAmount::from(100)), vec![0x00, 0x64]);
        assert_eq!(token_to_bytes(&TokenAmount::from(-1)), vec![0x01, 0x01]);
        assert!(token_from_bytes(&[0x07, 0x01]).is_err());
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_token("11214").unwrap(), TokenAmount::from(11214));
        assert!(parse_token("12fil").is_err());
    }
}
