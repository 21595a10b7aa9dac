//! Metrics collection and registry.

use crate::identify::ChipIdentifier;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of population statistics for metrics update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Enrolled chips.
    pub chips: usize,
    /// Measurements processed across all chips.
    pub measurements: u64,
    /// Mean over every stored noise distance, in bits.
    pub mean_noise_distance: f64,
    /// Mean over every stored inter-chip distance, in bits.
    pub mean_inter_chip_distance: f64,
    /// Unstable bit positions summed over all chips.
    pub unstable_bits: usize,
    /// 99.7% noise distance, when the population supports a fit.
    pub alias_threshold: Option<f64>,
    /// Probability of aliasing, when the population supports a fit.
    pub alias_probability: Option<f64>,
}

impl MetricsSnapshot {
    /// Summarizes the identifier's current database.
    pub fn from_identifier(identifier: &ChipIdentifier) -> Self {
        let names = identifier.names();

        let (alias_threshold, alias_probability) = if identifier.aliasing_ready() {
            match identifier.probability_of_aliasing() {
                Ok(estimate) => (Some(estimate.threshold), Some(estimate.probability)),
                Err(e) => {
                    tracing::debug!(error = %e, "No aliasing estimate for metrics");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        Self {
            chips: names.len(),
            measurements: names.iter().map(|n| identifier.meas_count(n)).sum(),
            mean_noise_distance: mean(&identifier.all_noise_distances()),
            mean_inter_chip_distance: mean(&identifier.all_inter_chip_distances()),
            unstable_bits: names.iter().map(|n| identifier.num_unstable_bits(n)).sum(),
            alias_threshold,
            alias_probability,
        }
    }
}

/// Mean of a pooled sample; 0 when empty.
fn mean(values: &[usize]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<usize>() as f64 / values.len() as f64
}

/// Prometheus metrics registry for population monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    chips: IntGauge,
    measurements_total: IntCounter,
    mean_noise_distance: Gauge,
    mean_inter_chip_distance: Gauge,
    unstable_bits: IntGauge,

    // Aliasing estimate
    alias_threshold: Gauge,
    alias_probability: Gauge,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all population metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let chips = IntGauge::new("puf_identify_chips", "Number of enrolled chips")?;
        let measurements_total = IntCounter::new(
            "puf_identify_measurements_total",
            "Total measurements processed",
        )?;
        let mean_noise_distance = Gauge::new(
            "puf_identify_mean_noise_distance_bits",
            "Mean within-chip Hamming distance to the enrolled signature",
        )?;
        let mean_inter_chip_distance = Gauge::new(
            "puf_identify_mean_inter_chip_distance_bits",
            "Mean Hamming distance between readings and other chips",
        )?;
        let unstable_bits = IntGauge::new(
            "puf_identify_unstable_bits",
            "Unstable bit positions summed over all chips",
        )?;

        let alias_threshold = Gauge::new(
            "puf_identify_alias_threshold_bits",
            "99.7th percentile of the fitted noise distance distribution",
        )?;
        let alias_probability = Gauge::new(
            "puf_identify_alias_probability",
            "Probability that a different chip falls within the noise threshold",
        )?;

        registry.register(Box::new(chips.clone()))?;
        registry.register(Box::new(measurements_total.clone()))?;
        registry.register(Box::new(mean_noise_distance.clone()))?;
        registry.register(Box::new(mean_inter_chip_distance.clone()))?;
        registry.register(Box::new(unstable_bits.clone()))?;
        registry.register(Box::new(alias_threshold.clone()))?;
        registry.register(Box::new(alias_probability.clone()))?;

        Ok(Self {
            registry,
            chips,
            measurements_total,
            mean_noise_distance,
            mean_inter_chip_distance,
            unstable_bits,
            alias_threshold,
            alias_probability,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.chips.set(snapshot.chips as i64);

        // Counters only move forward; a cleared database leaves them alone.
        let current = self.measurements_total.get();
        if snapshot.measurements > current {
            self.measurements_total.inc_by(snapshot.measurements - current);
        }

        self.mean_noise_distance.set(snapshot.mean_noise_distance);
        self.mean_inter_chip_distance
            .set(snapshot.mean_inter_chip_distance);
        self.unstable_bits.set(snapshot.unstable_bits as i64);

        if let Some(threshold) = snapshot.alias_threshold {
            self.alias_threshold.set(threshold);
        }
        if let Some(probability) = snapshot.alias_probability {
            self.alias_probability.set(probability);
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::Signature;
    use crate::identify::IdentifierConfig;

    #[test]
    fn test_registry_creation() {
        assert!(MetricsRegistry::new().is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();
        let snapshot = MetricsSnapshot {
            chips: 3,
            measurements: 12,
            mean_noise_distance: 4.5,
            mean_inter_chip_distance: 510.0,
            unstable_bits: 40,
            alias_threshold: Some(21.0),
            alias_probability: None,
        };
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("puf_identify_chips 3"));
        assert!(output.contains("puf_identify_measurements_total 12"));
        assert!(output.contains("puf_identify_alias_threshold_bits 21"));
        assert!(output.contains("puf_identify_alias_probability 0"));
    }

    #[test]
    fn test_counter_never_decreases() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&MetricsSnapshot {
            measurements: 10,
            ..Default::default()
        });
        registry.update(&MetricsSnapshot::default());
        assert!(registry
            .encode()
            .unwrap()
            .contains("puf_identify_measurements_total 10"));
    }

    #[test]
    fn test_snapshot_from_identifier() {
        let mut identifier = ChipIdentifier::new(IdentifierConfig::new("unused.xml", 8));
        let sig = |hex: &str| Signature::from_hex(hex).unwrap();
        identifier.process("a", &sig("00")).unwrap();
        identifier.process("a", &sig("03")).unwrap();
        identifier.process("b", &sig("ff")).unwrap();

        let snapshot = MetricsSnapshot::from_identifier(&identifier);
        assert_eq!(snapshot.chips, 2);
        assert_eq!(snapshot.measurements, 3);
        assert_eq!(snapshot.unstable_bits, 2);
        // Only a has a noise sample (2); only b has an inter-chip one (8).
        assert!((snapshot.mean_noise_distance - 2.0).abs() < 1e-12);
        assert!((snapshot.mean_inter_chip_distance - 8.0).abs() < 1e-12);
        assert_eq!(snapshot.alias_threshold, None);
    }

    #[test]
    fn test_chips_without_samples_do_not_dilute_means() {
        let mut identifier = ChipIdentifier::new(IdentifierConfig::new("unused.xml", 8));
        let sig = |hex: &str| Signature::from_hex(hex).unwrap();
        identifier.process("a", &sig("00")).unwrap();
        identifier.process("a", &sig("0f")).unwrap();
        for name in ["b", "c", "d"] {
            identifier.add(name, sig("ff")).unwrap();
        }

        let snapshot = MetricsSnapshot::from_identifier(&identifier);
        assert_eq!(snapshot.chips, 4);
        assert!((snapshot.mean_noise_distance - 4.0).abs() < 1e-12);
        assert_eq!(snapshot.mean_inter_chip_distance, 0.0);
    }
}
