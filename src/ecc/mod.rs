//! Helper-data error correction for noisy signature re-reads.
//!
//! At enrollment a binary BCH code computes parity bits ("helper data")
//! over the reference signature. A later noisy reading combined with the
//! stored helper data decodes back to the reference as long as no more
//! than `t` bits flipped. The recovered signature can then be hashed into
//! a stable per-chip key.
//!
//! ```text
//! enroll:   reference ──► BchCode::encode ──► HelperData
//! recover:  noisy + HelperData ──► BchCode::decode ──► reference ──► KeyDeriver
//! ```

mod bch;
mod corrector;
mod kdf;

pub use bch::{BchCode, BchParams, HelperData};
pub use corrector::{Codec, ErrorCorrector, Recovery};
pub use kdf::{ChipKey, HashAlgorithm, KeyDeriver};

use thiserror::Error;

/// Errors raised while encoding or decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EccError {
    /// More bits flipped than the code can correct.
    #[error("uncorrectable reading: more than {capacity} bit errors")]
    Uncorrectable {
        /// Correction capacity `t` of the code.
        capacity: usize,
    },
    /// Signature length does not match the code's data length.
    #[error("signature has {found} bits, code expects {expected}")]
    LengthMismatch {
        /// Data bits the code was built for.
        expected: usize,
        /// Bits supplied.
        found: usize,
    },
    /// Helper data length does not match the code's parity length.
    #[error("helper data has {found} bits, code expects {expected}")]
    HelperLength {
        /// Parity bits of the code.
        expected: usize,
        /// Bits supplied.
        found: usize,
    },
    /// Field or code parameters cannot build a code.
    #[error("invalid BCH parameters: {0}")]
    InvalidParams(String),
    /// `regenerate` was called before `enroll`.
    #[error("no helper data enrolled")]
    NotEnrolled,
}
