//! Bit sequences and Hamming-distance utilities.
//!
//! A PUF reading is a fixed-length bit sequence. Everything the
//! identifier does with readings reduces to comparing two of them
//! position by position, so length checks live here and nowhere else.

mod hamming;
mod signature;

pub use hamming::{hamming_distance, hamming_weight, relative_distance};
pub use signature::Signature;

/// Errors raised by bit-sequence operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BitsError {
    #[error("bit length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
