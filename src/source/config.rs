//! Configuration file format.
//!
//! Every table is optional; missing values fall back to the defaults of
//! the deployed setup (1024-bit signatures, 0.25 noise threshold, BCH over
//! GF(2^13) correcting 20 bits).

use crate::ecc::{BchParams, HashAlgorithm};
use crate::identify::IdentifierConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Virtual chip population settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Number of chips.
    pub chips: usize,
    /// Seed for references and read noise.
    pub seed: u64,
    /// Per-bit flip probability on every read.
    pub flip_probability: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            chips: 32,
            seed: 0,
            flip_probability: 0.025,
        }
    }
}

/// Helper-data error correction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EccConfig {
    /// Enroll helper data and attempt recovery on every read.
    pub enabled: bool,
    /// Code parameters.
    pub bch: BchParams,
    /// Hash for chip keys derived from recovered signatures.
    pub key_algorithm: HashAlgorithm,
}

impl Default for EccConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bch: BchParams::default(),
            key_algorithm: HashAlgorithm::default(),
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Reads per chip during characterization.
    pub reads_per_chip: usize,
    /// Closest matches listed per measurement.
    pub match_scores: usize,
    /// Print Prometheus text exposition after each command.
    pub print_metrics: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reads_per_chip: 32,
            match_scores: 8,
            print_metrics: false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("signature length must be positive")]
    InvalidSignatureLength,
    #[error("noise threshold {0} outside (0, 1]")]
    InvalidThreshold(f64),
    #[error("distance window capacity must be positive")]
    InvalidWindow,
    #[error("flip probability {0} outside [0, 0.5)")]
    InvalidFlipProbability(f64),
    #[error("chip count {0} outside 1..=999")]
    InvalidChipCount(usize),
    #[error("ECC data length {k} does not match signature length {n_bits}")]
    EccLengthMismatch { k: usize, n_bits: usize },
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub identifier: IdentifierConfig,
    #[serde(default)]
    pub ecc: EccConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl FileConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config = Self::from_toml(&content)?;
        tracing::info!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let identifier = &self.identifier;
        if identifier.n_bits == 0 {
            return Err(ConfigError::InvalidSignatureLength);
        }
        if !(identifier.noise_threshold > 0.0 && identifier.noise_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(identifier.noise_threshold));
        }
        if identifier.max_distances == 0 {
            return Err(ConfigError::InvalidWindow);
        }
        if !(0.0..0.5).contains(&self.simulator.flip_probability) {
            return Err(ConfigError::InvalidFlipProbability(
                self.simulator.flip_probability,
            ));
        }
        if !(1..=999).contains(&self.simulator.chips) {
            return Err(ConfigError::InvalidChipCount(self.simulator.chips));
        }
        if self.ecc.enabled && self.ecc.bch.k != identifier.n_bits {
            return Err(ConfigError::EccLengthMismatch {
                k: self.ecc.bch.k,
                n_bits: identifier.n_bits,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = FileConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.identifier.n_bits, 1024);
        assert_eq!(config.ecc.bch.k, 1024);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = FileConfig::from_toml(
            r#"
            [identifier]
            path = "lab/sigs.xml"
            noise_threshold = 0.2

            [simulator]
            chips = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.identifier.path, Path::new("lab/sigs.xml"));
        assert_eq!(config.identifier.n_bits, 1024);
        assert_eq!(config.simulator.chips, 8);
        assert_eq!(config.simulator.flip_probability, 0.025);
        assert!(!config.ecc.enabled);
    }

    #[test]
    fn test_ecc_table() {
        let config = FileConfig::from_toml(
            r#"
            [ecc]
            enabled = true
            key_algorithm = "sha256"

            [ecc.bch]
            t = 12
            "#,
        )
        .unwrap();
        assert!(config.ecc.enabled);
        assert_eq!(config.ecc.bch.t, 12);
        assert_eq!(config.ecc.bch.m, 13);
        assert_eq!(config.ecc.key_algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = FileConfig::default();
        config.identifier.noise_threshold = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(0.0)));

        let mut config = FileConfig::default();
        config.simulator.flip_probability = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFlipProbability(_))
        ));

        let mut config = FileConfig::default();
        config.identifier.n_bits = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidSignatureLength));
    }

    #[test]
    fn test_ecc_length_must_match() {
        let mut config = FileConfig::default();
        config.identifier.n_bits = 256;
        assert!(config.validate().is_ok());

        config.ecc.enabled = true;
        assert_eq!(
            config.validate(),
            Err(ConfigError::EccLengthMismatch { k: 1024, n_bits: 256 })
        );
    }

    #[test]
    fn test_parse_error_reported() {
        assert!(matches!(
            FileConfig::from_toml("identifier = 3"),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            FileConfig::from_file("/nonexistent/puf.toml"),
            Err(ConfigError::FileReadError(_))
        ));
    }
}
