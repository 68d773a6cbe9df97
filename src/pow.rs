//! Proof-of-work check
//!
//! A header satisfies proof of work when its id, read as a 256-bit little-endian
//! integer, is strictly below the target encoded in its compact `bits` field.

use crate::error::{ConsensusError, Result};
use crate::types::*;
use std::cmp::Ordering;

/// 256-bit unsigned integer, least significant word first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct U256([u64; 4]);

impl U256 {
    pub fn zero() -> Self {
        U256([0; 4])
    }

    pub fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    /// Lowest 64 bits
    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    pub fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }
        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }
        result
    }

    pub fn shr(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }
        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in word_shift..4 {
            result.0[i - word_shift] |= self.0[i] >> bit_shift;
            if bit_shift > 0 && i > word_shift {
                result.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
            }
        }
        result
    }

    /// Little-endian bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.0.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// From little-endian bytes, the order in which block ids are stored
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(buf);
        }
        U256(words)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

/// Result of decoding a compact target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedTarget {
    pub value: U256,
    /// Sign bit set on a non-zero mantissa
    pub negative: bool,
    /// Exponent pushes the mantissa past 256 bits
    pub overflow: bool,
}

impl ExpandedTarget {
    /// Only a positive, in-range, non-zero target can be met by any hash
    pub fn is_usable(&self) -> bool {
        !self.negative && !self.overflow && !self.value.is_zero()
    }
}

/// Expand compact `bits`: low 23 bits mantissa, bit 23 sign, high byte exponent.
///
/// target = mantissa * 256^(exponent - 3)
pub fn expand_target(bits: u32) -> ExpandedTarget {
    let exponent = bits >> 24;
    let mut mantissa = bits & 0x007f_ffff;

    let value = if exponent <= 3 {
        mantissa >>= 8 * (3 - exponent);
        U256::from_u64(mantissa as u64)
    } else {
        U256::from_u64(mantissa as u64).shl(8 * (exponent - 3))
    };

    let negative = mantissa != 0 && bits & 0x0080_0000 != 0;
    let overflow = mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32));

    ExpandedTarget {
        value,
        negative,
        overflow,
    }
}

/// CheckProofOfWork: is `header.id()` below the target encoded in `header.bits`?
///
/// Returns an error when `bits` cannot encode a usable target, `Ok(false)` when the
/// hash simply misses it.
pub fn check_proof_of_work(header: &BlockHeader) -> Result<bool> {
    let target = expand_target(header.bits);
    if !target.is_usable() {
        return Err(ConsensusError::ContextuallyInvalid(format!(
            "unusable target bits {:#010x}",
            header.bits
        )));
    }
    let hash = U256::from_bytes(&header.id());
    Ok(hash < target.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;

    fn genesis_header() -> BlockHeader {
        let mut merkle_root: Hash = [0u8; 32];
        let display = hex::decode("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b").unwrap();
        for (i, byte) in display.iter().rev().enumerate() {
            merkle_root[i] = *byte;
        }
        BlockHeader {
            version: 1,
            prev_block_hash: [0u8; 32],
            merkle_root,
            timestamp: 1231006505,
            bits: GENESIS_BITS,
            nonce: 2083236893,
        }
    }

    // ===== U256 =====

    #[test]
    fn test_u256_shifts() {
        let value = U256::from_u64(0x1234_5678);
        assert_eq!(value.shl(0), value);
        assert!(value.shl(300).is_zero());
        assert!(value.shr(300).is_zero());
        assert_eq!(value.shl(8).low_u64(), 0x12_3456_7800);
        assert_eq!(value.shr(8).low_u64(), 0x12_3456);
        // across word boundaries
        assert_eq!(value.shl(100).shr(100), value);
        assert_eq!(value.shl(64).low_u64(), 0);
        assert_eq!(value.shl(60).shr(60), value);
    }

    #[test]
    fn test_u256_bytes_round_trip() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x78;
        bytes[1] = 0x56;
        bytes[31] = 0x01;
        assert_eq!(U256::from_bytes(&bytes).to_bytes(), bytes);
        assert_eq!(U256::from_u64(0x5678).to_bytes()[..2], [0x78, 0x56]);
    }

    #[test]
    fn test_u256_ordering_uses_high_words_first() {
        let small = U256::from_u64(u64::MAX);
        let large = U256::from_u64(1).shl(200);
        assert!(small < large);
        assert_eq!(small.cmp(&small), Ordering::Equal);
    }

    // ===== Compact targets =====

    #[test]
    fn test_expand_target_genesis_bits() {
        let target = expand_target(GENESIS_BITS);
        assert!(target.is_usable());
        assert_eq!(target.value, U256::from_u64(0xffff).shl(208));
        let bytes = target.value.to_bytes();
        assert_eq!(bytes[26], 0xff);
        assert_eq!(bytes[27], 0xff);
        assert!(bytes[28..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_expand_target_small_exponents_shift_right() {
        assert!(expand_target(0x0100_3456).value.is_zero());
        assert_eq!(expand_target(0x0112_3456).value.low_u64(), 0x12);
        assert_eq!(expand_target(0x0212_3456).value.low_u64(), 0x1234);
        assert_eq!(expand_target(0x0312_3456).value.low_u64(), 0x12_3456);
        assert_eq!(expand_target(0x0412_3456).value.low_u64(), 0x1234_5600);
        assert_eq!(expand_target(0x0500_9234).value.low_u64(), 0x9234_0000);
    }

    #[test]
    fn test_expand_target_sign_bit() {
        let target = expand_target(0x0492_3456);
        assert!(target.negative);
        assert!(!target.is_usable());
        // sign bit on a zero mantissa is not negative
        assert!(!expand_target(0x0180_0000).negative);
    }

    #[test]
    fn test_expand_target_overflow() {
        assert!(expand_target(0xff12_3456).overflow);
        assert!(expand_target(0x2301_0000).overflow);
        assert!(!expand_target(0x2200_0001).overflow);
        assert!(!expand_target(MAX_TARGET_BITS).overflow);
    }

    #[test]
    fn test_zero_target_rejects_everything() {
        let mut header = genesis_header();
        header.bits = 0x0300_0000;
        assert!(check_proof_of_work(&header).is_err());
    }

    // ===== Headers =====

    #[test]
    fn test_genesis_header_meets_target() {
        let header = genesis_header();
        assert_eq!(
            display_hash(&header.id()),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert!(check_proof_of_work(&header).unwrap());
    }

    #[test]
    fn test_wrong_nonce_misses_target() {
        let mut header = genesis_header();
        header.nonce = header.nonce.wrapping_add(1);
        assert!(!check_proof_of_work(&header).unwrap());
    }

    #[test]
    fn test_easy_target_found_by_nonce_search() {
        let mut header = genesis_header();
        header.bits = MAX_TARGET_BITS;
        header.nonce = 0;
        while !check_proof_of_work(&header).unwrap() {
            header.nonce += 1;
        }
        let target = expand_target(MAX_TARGET_BITS).value;
        assert!(U256::from_bytes(&header.id()) < target);
    }
}
