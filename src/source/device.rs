//! Device abstraction for raw signature reads.

use crate::bits::Signature;
use thiserror::Error;

/// Errors that can occur while reading signatures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("signature source is closed")]
    Closed,
    #[error("unknown chip: {0}")]
    UnknownChip(String),
    #[error("invalid source setup: {0}")]
    InvalidSetup(String),
    #[error("failed to read signature: {0}")]
    ReadFailed(String),
}

/// A device or simulator that produces one signature per read.
///
/// Implementations wrap whatever link reaches the chip; the rest of the
/// crate only sees fixed-length signatures.
pub trait SignatureSource {
    /// Reads the next signature from the currently selected chip.
    fn next(&mut self) -> Result<Signature, SourceError>;

    /// Releases the underlying device. Later reads fail.
    fn close(&mut self);

    /// Checks if the source can still be read.
    fn is_open(&self) -> bool;

    /// Length of every signature this source produces.
    fn n_bits(&self) -> usize;
}
