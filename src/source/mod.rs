//! Where signatures come from.
//!
//! The hardware link that reads a physical chip sits behind the
//! [`SignatureSource`] trait. [`VirtualChips`] is a deterministic stand-in
//! population used by the CLI demo, batch characterization and tests.

mod config;
mod device;
mod virtual_chips;

pub use config::{ConfigError, EccConfig, FileConfig, OutputConfig, SimulatorConfig};
pub use device::{SignatureSource, SourceError};
pub use virtual_chips::VirtualChips;
