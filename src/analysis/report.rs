//! Running a battery of randomness tests over one signature.

use super::statistics::{
    CumulativeSums, MinEntropy, Monobit, Runs, RunsBalanced, ShannonEntropy,
};
use super::{RandomnessTest, TestOutcome};
use crate::bits::Signature;
use std::fmt;

/// Named outcomes of a test battery, in run order.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomnessReport {
    results: Vec<(String, TestOutcome)>,
}

impl RandomnessReport {
    /// The six built-in tests with their default pass levels.
    pub fn default_battery() -> Vec<Box<dyn RandomnessTest>> {
        vec![
            Box::new(ShannonEntropy::default()),
            Box::new(MinEntropy::default()),
            Box::new(Monobit::default()),
            Box::new(Runs::default()),
            Box::new(RunsBalanced::default()),
            Box::new(CumulativeSums::default()),
        ]
    }

    /// Scores `sig` with the default battery.
    pub fn run(sig: &Signature) -> Self {
        Self::run_with(&Self::default_battery(), sig)
    }

    /// Scores `sig` with `tests`.
    pub fn run_with(tests: &[Box<dyn RandomnessTest>], sig: &Signature) -> Self {
        let results: Vec<(String, TestOutcome)> = tests
            .iter()
            .map(|test| (test.name().to_string(), test.score(sig)))
            .collect();
        let failed = results.iter().filter(|(_, o)| !o.passed).count();
        tracing::debug!(bits = sig.len(), tests = results.len(), failed, "Scored signature");
        Self { results }
    }

    /// Outcome of the test called `name`.
    pub fn get(&self, name: &str) -> Option<&TestOutcome> {
        self.results
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    /// Iterates over `(name, outcome)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TestOutcome)> + '_ {
        self.results.iter().map(|(n, o)| (n.as_str(), o))
    }

    /// True if every test passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|(_, o)| o.passed)
    }

    /// Number of tests run.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if no test was run.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl fmt::Display for RandomnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, outcome) in &self.results {
            writeln!(
                f,
                "{name:<16} {:>10.6}  {}",
                outcome.metric,
                if outcome.passed { "pass" } else { "FAIL" }
            )?;
        }
        Ok(())
    }
}
