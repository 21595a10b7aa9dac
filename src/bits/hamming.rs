//! Hamming distance and weight.

use super::{BitsError, Signature};

/// Number of bit positions at which `a` and `b` differ.
///
/// Fails if the two signatures have different lengths; nothing is ever
/// truncated or padded.
pub fn hamming_distance(a: &Signature, b: &Signature) -> Result<usize, BitsError> {
    Ok(a.xor(b)?.count_ones())
}

/// Number of set bits.
#[inline]
pub fn hamming_weight(a: &Signature) -> usize {
    a.count_ones()
}

/// Hamming distance normalized to `[0, 1]` by the signature length.
pub fn relative_distance(a: &Signature, b: &Signature) -> Result<f64, BitsError> {
    let distance = hamming_distance(a, b)?;
    Ok(distance as f64 / a.len().max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sig(bits: &str) -> Signature {
        Signature::from_bits(bits.chars().map(|c| c == '1'))
    }

    #[test]
    fn test_distance_examples() {
        assert_eq!(hamming_distance(&sig("0101"), &sig("1010")).unwrap(), 4);
        assert_eq!(hamming_distance(&sig("0101"), &sig("0100")).unwrap(), 1);
    }

    #[test]
    fn test_weight_examples() {
        assert_eq!(hamming_weight(&sig("0101")), 2);
        assert_eq!(hamming_weight(&sig("0100")), 1);
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        let result = hamming_distance(&sig("0101"), &sig("01011"));
        assert!(matches!(result, Err(BitsError::LengthMismatch { .. })));
    }

    #[test]
    fn test_relative_distance() {
        let a = Signature::from_hex("deadbeef").unwrap();
        let b = Signature::from_hex("deedbeaf").unwrap();
        let d = relative_distance(&a, &b).unwrap();
        assert!((d - 2.0 / 32.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_self_distance_is_zero(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let a = Signature::from_bytes(bytes);
            prop_assert_eq!(hamming_distance(&a, &a).unwrap(), 0);
        }

        #[test]
        fn prop_distance_symmetric_and_bounded(
            pair in (1usize..64).prop_flat_map(|n| (
                proptest::collection::vec(any::<u8>(), n),
                proptest::collection::vec(any::<u8>(), n),
            ))
        ) {
            let a = Signature::from_bytes(pair.0);
            let b = Signature::from_bytes(pair.1);
            let ab = hamming_distance(&a, &b).unwrap();
            prop_assert_eq!(ab, hamming_distance(&b, &a).unwrap());
            prop_assert!(ab <= a.len());
            prop_assert_eq!(ab, hamming_weight(&a.xor(&b).unwrap()));
        }

        #[test]
        fn prop_mismatch_always_fails(n in 1usize..32, extra in 1usize..8) {
            let a = Signature::zeros(n);
            let b = Signature::zeros(n + extra);
            prop_assert!(hamming_distance(&a, &b).is_err());
        }
    }
}
