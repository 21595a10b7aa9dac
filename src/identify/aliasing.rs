//! Probability of aliasing from fitted distance distributions.
//!
//! Noise distances (same chip, re-read) and inter-chip distances
//! (different chips) are each fitted with a three-parameter gamma
//! distribution by maximum likelihood. The noise fit's 99.7th percentile
//! is the acceptance threshold; the inter-chip fit's CDF at that
//! threshold is the chance that a different chip lands inside it.

use statrs::distribution::{ContinuousCDF, Gamma};
use statrs::function::gamma::{digamma, ln_gamma};

/// Fewest samples a pool must hold before it is fitted.
pub const MIN_FIT_SAMPLES: usize = 3;

/// Noise percentile used as the identification threshold.
pub const NOISE_QUANTILE: f64 = 0.997;

const LOC_GRID_POINTS: usize = 160;
const GOLDEN_ITERATIONS: usize = 80;
const BISECTION_ITERATIONS: usize = 200;
const MAX_SHAPE: f64 = 1e7;
const MIN_SHAPE: f64 = 1e-6;

/// Errors raised while estimating aliasing probability.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AliasError {
    #[error("{pool} pool has {found} samples, need at least {required}")]
    InsufficientSamples {
        pool: &'static str,
        found: usize,
        required: usize,
    },
    #[error("{pool} pool has no spread; every sample equals {value}")]
    DegenerateSample { pool: &'static str, value: f64 },
    #[error("gamma fit failed for {pool} pool: {reason}")]
    FitFailed { pool: &'static str, reason: String },
}

/// A fitted gamma distribution with location shift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaFit {
    /// Shape parameter `a`.
    pub shape: f64,
    /// Location (left end of the support).
    pub loc: f64,
    /// Scale parameter `θ`.
    pub scale: f64,
    dist: Gamma,
}

impl GammaFit {
    /// Creates a distribution from explicit parameters.
    pub fn new(shape: f64, loc: f64, scale: f64) -> Result<Self, AliasError> {
        Self::for_pool("explicit", shape, loc, scale)
    }

    fn for_pool(pool: &'static str, shape: f64, loc: f64, scale: f64) -> Result<Self, AliasError> {
        let dist = Gamma::new(shape, 1.0 / scale).map_err(|e| AliasError::FitFailed {
            pool,
            reason: e.to_string(),
        })?;
        Ok(Self {
            shape,
            loc,
            scale,
            dist,
        })
    }

    /// Maximum-likelihood fit of shape, location and scale.
    ///
    /// The location is profiled out: for each candidate location the
    /// shape solves `ln a - ψ(a) = ln ȳ - mean(ln y)` and the scale is
    /// `ȳ / a`. Candidate locations lie strictly below the sample
    /// minimum; they are scanned on a log-spaced grid and the best cell
    /// is refined by golden-section search.
    pub fn fit(pool: &'static str, samples: &[f64]) -> Result<Self, AliasError> {
        if samples.len() < MIN_FIT_SAMPLES {
            return Err(AliasError::InsufficientSamples {
                pool,
                found: samples.len(),
                required: MIN_FIT_SAMPLES,
            });
        }

        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() || !max.is_finite() {
            return Err(AliasError::FitFailed {
                pool,
                reason: "non-finite sample".to_string(),
            });
        }
        let span = max - min;
        if span <= 0.0 {
            return Err(AliasError::DegenerateSample { pool, value: min });
        }

        // Offsets below the minimum, log-spaced between these bounds.
        let near = span * 1e-3;
        let far = span * 20.0;
        let ratio = far / near;
        let offset_at = |t: f64| near * ratio.powf(t);

        let step = 1.0 / (LOC_GRID_POINTS - 1) as f64;
        let mut best: Option<(usize, ProfilePoint)> = None;
        for i in 0..LOC_GRID_POINTS {
            let point = profile(samples, min - offset_at(i as f64 * step));
            if let Some(point) = point {
                if best.map_or(true, |(_, b)| point.log_likelihood > b.log_likelihood) {
                    best = Some((i, point));
                }
            }
        }
        let (best_index, mut best_point) = best.ok_or_else(|| AliasError::FitFailed {
            pool,
            reason: "likelihood undefined at every location".to_string(),
        })?;

        // Golden-section refinement over the neighbouring grid cells.
        let mut lo = best_index.saturating_sub(1) as f64 * step;
        let mut hi = ((best_index + 1).min(LOC_GRID_POINTS - 1)) as f64 * step;
        let golden = (5f64.sqrt() - 1.0) / 2.0;
        let eval = |t: f64| profile(samples, min - offset_at(t));
        let mut c = hi - golden * (hi - lo);
        let mut d = lo + golden * (hi - lo);
        let mut fc = eval(c);
        let mut fd = eval(d);
        for _ in 0..GOLDEN_ITERATIONS {
            let ll_c = fc.map_or(f64::NEG_INFINITY, |p| p.log_likelihood);
            let ll_d = fd.map_or(f64::NEG_INFINITY, |p| p.log_likelihood);
            if ll_c > ll_d {
                hi = d;
                d = c;
                fd = fc;
                c = hi - golden * (hi - lo);
                fc = eval(c);
            } else {
                lo = c;
                c = d;
                fc = fd;
                d = lo + golden * (hi - lo);
                fd = eval(d);
            }
        }
        for point in [fc, fd].into_iter().flatten() {
            if point.log_likelihood > best_point.log_likelihood {
                best_point = point;
            }
        }

        let fit = Self::for_pool(pool, best_point.shape, best_point.loc, best_point.scale)?;
        tracing::debug!(
            pool,
            samples = samples.len(),
            shape = fit.shape,
            loc = fit.loc,
            scale = fit.scale,
            "Fitted gamma distribution"
        );
        Ok(fit)
    }

    /// Cumulative probability at `x`.
    pub fn cdf(&self, x: f64) -> f64 {
        if x <= self.loc {
            return 0.0;
        }
        self.dist.cdf(x - self.loc)
    }

    /// Percent-point function (inverse CDF), found by bisection.
    pub fn ppf(&self, p: f64) -> f64 {
        if p <= 0.0 {
            return self.loc;
        }
        if p >= 1.0 {
            return f64::INFINITY;
        }

        let mut lo = self.loc;
        let mut width = self.scale * self.shape.max(1.0);
        let mut hi = self.loc + width;
        while self.cdf(hi) < p && width.is_finite() {
            width *= 2.0;
            hi = self.loc + width;
        }
        for _ in 0..BISECTION_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if self.cdf(mid) < p {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    /// Mean of the fitted distribution.
    pub fn mean(&self) -> f64 {
        self.loc + self.shape * self.scale
    }
}

/// Profile-likelihood optimum for a fixed location.
#[derive(Debug, Clone, Copy)]
struct ProfilePoint {
    loc: f64,
    shape: f64,
    scale: f64,
    log_likelihood: f64,
}

fn profile(samples: &[f64], loc: f64) -> Option<ProfilePoint> {
    let n = samples.len() as f64;
    let mut sum = 0.0;
    let mut sum_ln = 0.0;
    for &x in samples {
        let y = x - loc;
        if y <= 0.0 {
            return None;
        }
        sum += y;
        sum_ln += y.ln();
    }
    let mean = sum / n;
    let s = mean.ln() - sum_ln / n;
    if !(s > 0.0) {
        return None;
    }

    let shape = solve_shape(s);
    let scale = mean / shape;
    let log_likelihood =
        (shape - 1.0) * sum_ln - n * shape - n * shape * scale.ln() - n * ln_gamma(shape);
    if !log_likelihood.is_finite() {
        return None;
    }
    Some(ProfilePoint {
        loc,
        shape,
        scale,
        log_likelihood,
    })
}

/// Solves `ln a - ψ(a) = s` for `a`; the left side is strictly
/// decreasing in `a`, so bisection in log space converges.
fn solve_shape(s: f64) -> f64 {
    let g = |a: f64| a.ln() - digamma(a) - s;
    let mut lo = MIN_SHAPE;
    let mut hi = MAX_SHAPE;
    if g(hi) > 0.0 {
        return hi;
    }
    if g(lo) < 0.0 {
        return lo;
    }
    for _ in 0..BISECTION_ITERATIONS {
        let mid = (lo * hi).sqrt();
        if g(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo * hi).sqrt()
}

/// Result of the aliasing estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AliasEstimate {
    /// Noise distance below which 99.7% of genuine re-reads fall.
    pub threshold: f64,
    /// Probability that an inter-chip distance falls below `threshold`.
    pub probability: f64,
    /// Fit of the pooled noise distances.
    pub noise_fit: GammaFit,
    /// Fit of the pooled inter-chip distances.
    pub inter_chip_fit: GammaFit,
}

/// Fits both pools and derives the threshold and aliasing probability.
pub fn estimate_aliasing(noise: &[usize], inter_chip: &[usize]) -> Result<AliasEstimate, AliasError> {
    let noise: Vec<f64> = noise.iter().map(|&d| d as f64).collect();
    let inter_chip: Vec<f64> = inter_chip.iter().map(|&d| d as f64).collect();

    let noise_fit = GammaFit::fit("noise", &noise)?;
    let inter_chip_fit = GammaFit::fit("inter-chip", &inter_chip)?;

    let threshold = noise_fit.ppf(NOISE_QUANTILE);
    let probability = inter_chip_fit.cdf(threshold);

    tracing::info!(
        threshold,
        probability,
        "Noise 99.7% threshold and probability of aliasing"
    );

    Ok(AliasEstimate {
        threshold,
        probability,
        noise_fit,
        inter_chip_fit,
    })
}
