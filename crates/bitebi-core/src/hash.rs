//! Double-SHA256 and the `nBits` proof-of-work predicate (§4.2).

use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// `Hash(x) = SHA256(SHA256(x))`.
pub fn hash256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash256(second.into())
}

/// Decode an `nBits` compact target into a 256-bit big-endian value,
/// represented as 32 bytes (index 0 = most significant byte).
///
/// `nBits = exp:u8 || mantissa:u24`. `mantissa` is placed at byte offset
/// `exp - 3` counting from the least-significant byte. Returns `None` if
/// `exp < 3` (rejected per §4.2).
pub fn target_bytes(n_bits: u32) -> Option<[u8; 32]> {
    let exp = (n_bits >> 24) as i32;
    if exp < 3 {
        return None;
    }
    let mantissa = n_bits & 0x00FF_FFFF;
    let m = mantissa.to_be_bytes();
    // The mantissa's own bytes, most-significant first.
    let mantissa_bytes = [m[1], m[2], m[3]];
    let mut target = [0u8; 32];
    // `target` is big-endian (index 0 = MSB, index 31 = LSB). mantissa_bytes[i]
    // sits at LSB-offset `exp - 1 - i`, i.e. array index `31 - offset`.
    for (i, &b) in mantissa_bytes.iter().enumerate() {
        let offset = exp - 1 - i as i32;
        if !(0..=31).contains(&offset) {
            continue;
        }
        target[31 - offset as usize] = b;
    }
    Some(target)
}

/// Whether `hash`, read as a 256-bit big-endian integer, satisfies the
/// difficulty target encoded in `n_bits`. Returns `false` if `n_bits` has
/// `exp < 3` (rejected target).
pub fn satisfies_target(hash: &Hash256, n_bits: u32) -> bool {
    match target_bytes(n_bits) {
        Some(target) => hash.0 < target,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash256_is_double_sha256() {
        let data = b"bitebi";
        let first = Sha256::digest(data);
        let expected = Sha256::digest(first);
        assert_eq!(hash256(data).0, <[u8; 32]>::from(expected));
    }

    #[test]
    fn exp_below_three_is_rejected() {
        assert!(target_bytes(0x02FF_FFFF).is_none());
        assert!(!satisfies_target(&Hash256::ZERO, 0x02FF_FFFF));
    }

    #[test]
    fn zero_hash_satisfies_any_nonzero_target() {
        assert!(satisfies_target(&Hash256::ZERO, 0x1D00_FFFF));
    }

    #[test]
    fn predicate_is_monotone_in_the_hash_value() {
        // A smaller 256-bit integer can only make the predicate *more* likely
        // to hold, never less (P4).
        let n_bits = 0x1D00_FFFF;
        let mut hi = [0u8; 32];
        hi[4] = 0xFF; // a large-ish value, likely failing
        let mut lo = [0u8; 32];
        lo[4] = 0x01;
        let h_hi = Hash256(hi);
        let h_lo = Hash256(lo);
        assert!(h_lo.0 < h_hi.0);
        if satisfies_target(&h_hi, n_bits) {
            assert!(satisfies_target(&h_lo, n_bits));
        }
    }

    #[test]
    fn max_nbits_target_matches_known_mainnet_difficulty_one() {
        // 0x1d00ffff is Bitcoin's well-known "difficulty 1" target:
        // 4 zero bytes, 0xFFFF, then 26 zero bytes.
        let target = target_bytes(0x1D00_FFFF).unwrap();
        assert!(target[..4].iter().all(|&b| b == 0));
        assert_eq!(&target[4..6], &[0xFF, 0xFF]);
        assert!(target[6..].iter().all(|&b| b == 0));
    }
}
