//! Chip identification and population statistics.
//!
//! The identifier owns the signature database in memory. Incoming
//! readings are matched against every enrolled reference by relative
//! Hamming distance, and each reading attributed to a chip updates that
//! chip's noise, inter-chip and unstable-bit statistics.

mod aliasing;
mod config;
mod identifier;

pub use aliasing::{estimate_aliasing, AliasError, AliasEstimate, GammaFit, MIN_FIT_SAMPLES, NOISE_QUANTILE};
pub use config::IdentifierConfig;
pub use identifier::{ChipIdentifier, Classification, Match};

use crate::bits::BitsError;
use crate::store::StoreError;

/// Errors raised by identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentifyError {
    #[error("signature has {found} bits, database expects {expected}")]
    SignatureLength { expected: usize, found: usize },
    #[error(transparent)]
    Bits(#[from] BitsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
