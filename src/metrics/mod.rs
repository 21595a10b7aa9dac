//! Prometheus metrics for the chip population.
//!
//! Gauges are refreshed from a [`MetricsSnapshot`] of the identifier's
//! database after each command.
//!
//! # Metrics Exposed
//!
//! - `puf_identify_chips` - Enrolled chips
//! - `puf_identify_measurements_total` - Measurements processed
//! - `puf_identify_mean_noise_distance_bits` - Mean noise distance
//! - `puf_identify_mean_inter_chip_distance_bits` - Mean inter-chip distance
//! - `puf_identify_unstable_bits` - Unstable bits over all chips
//! - `puf_identify_alias_threshold_bits` - 99.7% noise distance
//! - `puf_identify_alias_probability` - Probability of aliasing
//!
//! # Example
//!
//! ```no_run
//! use puf_identify::identify::{ChipIdentifier, IdentifierConfig};
//! use puf_identify::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let identifier = ChipIdentifier::new(IdentifierConfig::default());
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.update(&MetricsSnapshot::from_identifier(&identifier));
//! println!("{}", registry.encode().expect("Failed to encode"));
//! ```

mod collector;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
