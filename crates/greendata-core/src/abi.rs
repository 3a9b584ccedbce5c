//! ABI encoding of disclosed clear values
//!
//! The reveal transaction carries the clear values as the ABI encoding of a
//! static tuple of `uint256`, one word per ciphertext handle, in handle order.

use alloy_primitives::U256;

use crate::constants::MAX_CONSUMPTION;
use crate::Error;

/// ABI word size in bytes
pub const WORD_SIZE: usize = 32;

/// Encode clear values as consecutive big-endian 32-byte words
pub fn encode_clear_values(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * WORD_SIZE);
    for value in values {
        out.extend_from_slice(&U256::from(*value).to_be_bytes::<WORD_SIZE>());
    }
    out
}

/// Decode `expected` clear values; every value must fit a 32-bit ciphertext
pub fn decode_clear_values(data: &[u8], expected: usize) -> crate::Result<Vec<u64>> {
    if data.len() != expected * WORD_SIZE {
        return Err(Error::MalformedClearValues(format!(
            "expected {} bytes for {} values, got {}",
            expected * WORD_SIZE,
            expected,
            data.len()
        )));
    }

    data.chunks_exact(WORD_SIZE)
        .map(|word| {
            let value = U256::from_be_slice(word);
            if value > U256::from(MAX_CONSUMPTION) {
                return Err(Error::MalformedClearValues(format!(
                    "value {} exceeds 32 bits",
                    value
                )));
            }
            Ok(value.to::<u64>())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_layout() {
        let encoded = encode_clear_values(&[1, 0x0102]);
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 1);
        assert_eq!(&encoded[62..64], &[0x01, 0x02]);
        assert!(encoded[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let encoded = encode_clear_values(&[5]);
        assert!(decode_clear_values(&encoded, 2).is_err());
        assert!(decode_clear_values(&encoded[..31], 1).is_err());
        assert_eq!(decode_clear_values(&encoded, 1).unwrap(), vec![5]);
    }

    #[test]
    fn test_decode_rejects_wide_values() {
        let mut word = [0u8; 32];
        word[27] = 1; // 2^32
        assert!(decode_clear_values(&word, 1).is_err());
    }
}
