//! PUF Chip Identification Library
//!
//! Identifies physical chips by their physically uncloneable function
//! (PUF) responses and characterizes how reliably they can be told apart.
//! Each reading is a fixed-length binary signature that differs slightly
//! from read to read (noise) and a lot from chip to chip.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! source → identify ──→ store (XML)
//!   ↓        ↓   ↓
//!   ↓      ecc   metrics
//!   ↓
//! analysis (randomness scoring)
//! ```
//!
//! - [`source`] produces signatures: a hardware link or [`VirtualChips`].
//! - [`identify`] matches readings against enrolled chips and keeps
//!   per-chip noise, inter-chip and unstable-bit statistics, from which
//!   it estimates the probability of aliasing.
//! - [`store`] persists the database as XML.
//! - [`ecc`] recovers an enrolled signature from a noisy read using BCH
//!   helper data and derives a stable chip key from it.
//! - [`analysis`] scores single signatures with NIST SP 800-22 style tests.
//! - [`session`] ties a source to an identifier for measurement rounds
//!   and batch characterization.
//!
//! # Example
//!
//! ```no_run
//! use puf_identify::{
//!     identify::{ChipIdentifier, IdentifierConfig},
//!     source::{SimulatorConfig, VirtualChips},
//!     session::Session,
//! };
//!
//! let config = IdentifierConfig::new("data/signatures.xml", 1024);
//! let identifier = ChipIdentifier::open(config).unwrap();
//! let chips = VirtualChips::new(1024, &SimulatorConfig::default()).unwrap();
//!
//! let mut session = Session::new(chips, identifier);
//! for _ in 0..4 {
//!     let outcome = session.measure(None).unwrap();
//!     println!("{} (new: {})", outcome.name, outcome.is_new);
//! }
//!
//! let identifier = session.finish().unwrap();
//! if identifier.aliasing_ready() {
//!     let estimate = identifier.probability_of_aliasing().unwrap();
//!     println!("P(alias) = {:e}", estimate.probability);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod bits;
pub mod ecc;
pub mod identify;
pub mod metrics;
pub mod session;
pub mod source;
pub mod store;

// Re-export commonly used types at crate root
pub use analysis::{RandomnessReport, RandomnessTest, TestOutcome};
pub use bits::{hamming_distance, hamming_weight, Signature};
pub use ecc::{BchCode, BchParams, ErrorCorrector, HelperData, KeyDeriver};
pub use identify::{ChipIdentifier, Classification, IdentifierConfig, Match};
pub use session::{characterize, Session};
pub use source::{FileConfig, SignatureSource, VirtualChips};
pub use store::{ChipDatabase, ChipRecord};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
