//! Bit-level randomness metrics over a single signature.
//!
//! Derived from NIST SP 800-22. Each test reports a metric and whether it
//! clears its pass level. These are screening statistics for PUF
//! responses, not proofs of randomness.

use super::{RandomnessTest, TestOutcome};
use crate::bits::Signature;
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::function::erf::erfc;

/// Fraction of ones; `None` for an empty signature.
fn ones_fraction(bits: &Signature) -> Option<f64> {
    if bits.is_empty() {
        return None;
    }
    Some(bits.count_ones() as f64 / bits.len() as f64)
}

/// Runs statistic shared by both runs tests.
fn runs_p_value(bits: &Signature, pi: f64) -> Option<f64> {
    let n = bits.len();
    let spread = pi * (1.0 - pi);
    if n == 0 || spread == 0.0 {
        return None;
    }
    let transitions = bits
        .iter()
        .zip(bits.iter().skip(1))
        .filter(|(a, b)| a != b)
        .count();
    let v_obs = (transitions + 1) as f64;
    let n = n as f64;
    let statistic = (v_obs - 2.0 * n * spread).abs() / (2.0 * (2.0 * n).sqrt() * spread);
    Some(erfc(statistic))
}

/// Shannon entropy of the bit distribution, in bits per bit.
#[derive(Debug, Clone, Copy)]
pub struct ShannonEntropy {
    /// Passes when the entropy is at least `1 - tolerance`.
    pub tolerance: f64,
}

impl Default for ShannonEntropy {
    fn default() -> Self {
        Self { tolerance: 0.01 }
    }
}

impl RandomnessTest for ShannonEntropy {
    fn name(&self) -> &str {
        "entropy"
    }

    fn score(&self, bits: &Signature) -> TestOutcome {
        let Some(p) = ones_fraction(bits) else {
            return TestOutcome::failed();
        };
        let term = |x: f64| if x > 0.0 { -x * x.log2() } else { 0.0 };
        let h = term(p) + term(1.0 - p);
        TestOutcome::new(h, h >= 1.0 - self.tolerance)
    }
}

/// Min-entropy `-ln(max(p, 1 - p))`.
#[derive(Debug, Clone, Copy)]
pub struct MinEntropy {
    /// Passes when the metric is at least `1 - tolerance`.
    pub tolerance: f64,
}

impl Default for MinEntropy {
    fn default() -> Self {
        Self { tolerance: 0.67 }
    }
}

impl RandomnessTest for MinEntropy {
    fn name(&self) -> &str {
        "min_entropy"
    }

    fn score(&self, bits: &Signature) -> TestOutcome {
        let Some(p) = ones_fraction(bits) else {
            return TestOutcome::failed();
        };
        // Constant input gives ln(1) = 0; keep the sign positive.
        let h = (-p.max(1.0 - p).ln()).max(0.0);
        TestOutcome::new(h, h >= 1.0 - self.tolerance)
    }
}

/// Frequency (monobit) test.
#[derive(Debug, Clone, Copy)]
pub struct Monobit {
    /// Minimum p-value.
    pub p_value: f64,
}

impl Default for Monobit {
    fn default() -> Self {
        Self { p_value: 0.01 }
    }
}

impl RandomnessTest for Monobit {
    fn name(&self) -> &str {
        "monobit"
    }

    fn score(&self, bits: &Signature) -> TestOutcome {
        if bits.is_empty() {
            return TestOutcome::failed();
        }
        let ones = bits.count_ones() as f64;
        let zeros = bits.len() as f64 - ones;
        let s_obs = (ones - zeros).abs() / (bits.len() as f64).sqrt();
        let p = erfc(s_obs / std::f64::consts::SQRT_2);
        TestOutcome::new(p, p >= self.p_value)
    }
}

/// Runs test with the frequency prerequisite.
#[derive(Debug, Clone, Copy)]
pub struct Runs {
    /// Minimum p-value.
    pub p_value: f64,
}

impl Default for Runs {
    fn default() -> Self {
        Self { p_value: 0.01 }
    }
}

impl RandomnessTest for Runs {
    fn name(&self) -> &str {
        "runs"
    }

    fn score(&self, bits: &Signature) -> TestOutcome {
        let Some(pi) = ones_fraction(bits) else {
            return TestOutcome::failed();
        };
        let tau = 2.0 / (bits.len() as f64).sqrt();
        if (pi - 0.5).abs() >= tau {
            return TestOutcome::failed();
        }
        match runs_p_value(bits, pi) {
            Some(p) => TestOutcome::new(p, p >= self.p_value),
            None => TestOutcome::failed(),
        }
    }
}

/// Runs test assuming a balanced source (π = ½), no prerequisite.
#[derive(Debug, Clone, Copy)]
pub struct RunsBalanced {
    /// Minimum p-value.
    pub p_value: f64,
}

impl Default for RunsBalanced {
    fn default() -> Self {
        Self { p_value: 0.01 }
    }
}

impl RandomnessTest for RunsBalanced {
    fn name(&self) -> &str {
        "runs_balanced"
    }

    fn score(&self, bits: &Signature) -> TestOutcome {
        match runs_p_value(bits, 0.5) {
            Some(p) => TestOutcome::new(p, p >= self.p_value),
            None => TestOutcome::failed(),
        }
    }
}

/// Forward cumulative sums test.
#[derive(Debug, Clone, Copy)]
pub struct CumulativeSums {
    /// The p-value must exceed this.
    pub p_value: f64,
}

impl Default for CumulativeSums {
    fn default() -> Self {
        Self { p_value: 0.01 }
    }
}

impl RandomnessTest for CumulativeSums {
    fn name(&self) -> &str {
        "cumulative_sums"
    }

    fn score(&self, bits: &Signature) -> TestOutcome {
        if bits.is_empty() {
            return TestOutcome::failed();
        }
        let Ok(normal) = Normal::new(0.0, 1.0) else {
            return TestOutcome::failed();
        };

        let z = bits
            .iter()
            .scan(0i64, |walk, bit| {
                *walk += if bit { 1 } else { -1 };
                Some(walk.abs())
            })
            .max()
            .unwrap_or(0) as f64;
        let n = bits.len() as f64;
        let root_n = n.sqrt();

        // Bounds truncate toward zero.
        let upper = (((n / z) - 1.0) / 4.0).trunc() as i64;
        let lower1 = (((-n / z) + 1.0) / 4.0).trunc() as i64;
        let lower2 = (((-n / z) - 3.0) / 4.0).trunc() as i64;

        let phi = |k: i64, offset: f64| normal.cdf((4.0 * k as f64 + offset) * z / root_n);
        let sum1: f64 = (lower1..=upper).map(|k| phi(k, 1.0) - phi(k, -1.0)).sum();
        let sum2: f64 = (lower2..=upper).map(|k| phi(k, 3.0) - phi(k, 1.0)).sum();
        let p = 1.0 - sum1 + sum2;
        TestOutcome::new(p, p > self.p_value)
    }
}
