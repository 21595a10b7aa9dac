//! Identifier settings.

use crate::store::MAX_DISTANCES;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for a [`ChipIdentifier`](super::ChipIdentifier).
///
/// Passed explicitly to the constructor; nothing here is global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierConfig {
    /// Signature database location.
    pub path: PathBuf,
    /// Signature length in bits.
    pub n_bits: usize,
    /// Largest relative distance still accepted as a known chip.
    pub noise_threshold: f64,
    /// Capacity of every distance window.
    pub max_distances: usize,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/signatures.xml"),
            n_bits: 1024,
            noise_threshold: 0.25,
            max_distances: MAX_DISTANCES,
        }
    }
}

impl IdentifierConfig {
    /// Creates a configuration for the given database path and length.
    pub fn new(path: impl Into<PathBuf>, n_bits: usize) -> Self {
        Self {
            path: path.into(),
            n_bits,
            ..Default::default()
        }
    }
}
