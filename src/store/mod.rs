//! Signature database persistence.
//!
//! Each enrolled chip is kept as a [`ChipRecord`]: its reference
//! signature, how many times it has been measured, and the running
//! distance statistics. The whole set is stored as one XML document:
//!
//! ```text
//! chip_list
//!   chip(name, meas_count)
//!     sig(encoding="hex")
//!     noise / dist*
//!     inter_chip / other(name) / dist*
//!     unstable_bits(encoding="hex")
//! ```

mod database;
mod record;

pub use database::ChipDatabase;
pub use record::{ChipRecord, DistanceWindow};

/// Number of distances each window keeps.
pub const MAX_DISTANCES: usize = 64;

/// Errors raised while loading or saving the signature database.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("signature database io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed signature database: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("signature database format error: {0}")]
    Format(String),
}
