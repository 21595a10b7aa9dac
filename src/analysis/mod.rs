//! Randomness scoring of PUF responses.
//!
//! A good PUF response looks like a fair coin: about half ones, no long
//! runs, no drift. The tests here put numbers on that for one signature.
//! They are screening statistics, not certification.

mod report;
mod statistics;

pub use report::RandomnessReport;
pub use statistics::{CumulativeSums, MinEntropy, Monobit, Runs, RunsBalanced, ShannonEntropy};

use crate::bits::Signature;

/// Metric produced by one test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    /// Test statistic or p-value.
    pub metric: f64,
    /// Whether the metric clears the test's pass level.
    pub passed: bool,
}

impl TestOutcome {
    /// Creates an outcome.
    pub fn new(metric: f64, passed: bool) -> Self {
        Self { metric, passed }
    }

    /// Outcome for inputs a test cannot score.
    pub fn failed() -> Self {
        Self::new(0.0, false)
    }
}

/// A randomness test over one signature.
pub trait RandomnessTest: Send + Sync {
    /// Short identifier used in reports.
    fn name(&self) -> &str;

    /// Scores `bits`. Never panics; unscorable input fails with metric 0.
    fn score(&self, bits: &Signature) -> TestOutcome;
}
