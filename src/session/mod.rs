//! Measurement rounds and batch characterization.
//!
//! One round follows the bench workflow: read a signature, classify it
//! against the database, enroll it if nobody matches, attribute it to a
//! chip, and optionally recover the enrolled signature through helper
//! data.
//!
//! ```text
//! source.next() ─► classify ─► known?  ──yes──► process(name)
//!                                 │                  │
//!                                 no                 ▼
//!                                 └─► add(name) ─► process(name) ─► ECC
//! ```

mod characterize;
mod measure;

pub use characterize::{characterize, Characterization};
pub use measure::{EccOutcome, MeasurementOutcome, Session};

use crate::ecc::EccError;
use crate::identify::IdentifyError;
use crate::source::SourceError;
use thiserror::Error;

/// Errors raised while running a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Identify(#[from] IdentifyError),
    #[error(transparent)]
    Ecc(#[from] EccError),
}
