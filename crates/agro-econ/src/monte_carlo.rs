//! Monte Carlo expected-value evaluation of the yield/margin model.
//!
//! Every trial owns an independent ChaCha8 stream (the run seed plus the trial
//! index as stream id), so trials can be spread over threads without sharing
//! RNG state and a seeded run is bit-identical regardless of thread count or
//! block size.

use agro_core::{
    round2, EngineConfig, EngineError, MonteCarloPolicy, MonteCarloRequest, MonteCarloSummary,
    ValidationError,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Yield and margin drawn by one trial.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrialOutcome {
    pub yield_bag_ha: f64,
    pub margin_per_ha: f64,
}

/// Distributions of a single run, shared read-only by all trials.
#[derive(Clone, Debug)]
pub struct TrialModel {
    seed: u64,
    rainfall: Normal<f64>,
    input: Normal<f64>,
    base_yield: Uniform<f64>,
    base_margin: Uniform<f64>,
}

impl TrialModel {
    /// Build the trial distributions for a validated request.
    pub fn new(request: &MonteCarloRequest, policy: &MonteCarloPolicy, seed: u64) -> Result<Self, EngineError> {
        let sd = policy.factor_stddev;
        let rainfall = Normal::new(request.rainfall_delta_pct / 100.0, sd)
            .map_err(|e| EngineError::Computation(format!("rainfall distribution: {e}")))?;
        let input = Normal::new(request.input_cost_delta_pct / 100.0, sd)
            .map_err(|e| EngineError::Computation(format!("input cost distribution: {e}")))?;
        let (ylo, yhi) = policy.yield_range;
        let (mlo, mhi) = policy.margin_range;
        if !policy.ranges_are_sampleable() {
            return Err(ValidationError::InvalidConfig(
                "monte_carlo ranges must be ordered (low, high) with a finite span".to_string(),
            )
            .into());
        }
        Ok(Self {
            seed,
            rainfall,
            input,
            base_yield: Uniform::new_inclusive(ylo, yhi),
            base_margin: Uniform::new_inclusive(mlo, mhi),
        })
    }

    /// Draw trial `index` from its own stream.
    pub fn trial(&self, index: u64) -> TrialOutcome {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(index);
        let rainfall = 1.0 + self.rainfall.sample(&mut rng);
        let input = 1.0 - self.input.sample(&mut rng);
        let base_yield = self.base_yield.sample(&mut rng);
        let base_margin = self.base_margin.sample(&mut rng);
        TrialOutcome {
            yield_bag_ha: base_yield * rainfall,
            margin_per_ha: base_margin * rainfall * input,
        }
    }
}

/// Run all trials of `request` with a fixed seed.
///
/// Trials are evaluated in parallel blocks of `block_size`; `cancel` is polled
/// between blocks and a raised flag aborts the run with
/// [`EngineError::Cancelled`]. There is no partial result.
///
/// Example:
/// let flag = AtomicBool::new(false);
/// let s = evaluate(&MonteCarloRequest::default(), &EngineConfig::default(), 42, &flag).unwrap();
/// assert_eq!(s.iterations, 1000);
pub fn evaluate(
    request: &MonteCarloRequest,
    cfg: &EngineConfig,
    seed: u64,
    cancel: &AtomicBool,
) -> Result<MonteCarloSummary, EngineError> {
    let policy = &cfg.monte_carlo;
    request.validate(policy.max_iterations)?;
    let total = usize::try_from(request.iterations).map_err(|_| ValidationError::TooManyIterations {
        requested: request.iterations,
        limit: policy.max_iterations,
    })?;
    let model = TrialModel::new(request, policy, seed)?;
    let block = policy.block_size.max(1);
    debug!(iterations = total, seed, block, "starting monte carlo run");

    let mut yield_sum = 0.0;
    let mut margin_sum = 0.0;
    let mut start = 0usize;
    while start < total {
        if cancel.load(Ordering::Relaxed) {
            debug!(completed = start, "monte carlo run cancelled");
            return Err(EngineError::Cancelled);
        }
        let end = start.saturating_add(block).min(total);
        let trials: Vec<TrialOutcome> = (start..end)
            .into_par_iter()
            .map(|i| model.trial(i as u64))
            .collect();
        // Sequential accumulation keeps the float sum order fixed.
        for t in &trials {
            yield_sum += t.yield_bag_ha;
            margin_sum += t.margin_per_ha;
        }
        start = end;
    }

    let n = total as f64;
    let expected_yield = yield_sum / n;
    let expected_margin = margin_sum / n;
    if !(expected_yield.is_finite() && expected_margin.is_finite()) {
        return Err(EngineError::Computation(
            "monte carlo averages are not finite".to_string(),
        ));
    }
    Ok(MonteCarloSummary {
        expected_yield: round2(expected_yield),
        expected_margin: round2(expected_margin),
        bag_price: request.bag_price,
        iterations: request.iterations,
    })
}

/// Job entry point: run with the request seed, or fresh entropy when unseeded.
pub fn run_cancellable(
    request: &MonteCarloRequest,
    cfg: &EngineConfig,
    cancel: &AtomicBool,
) -> Result<MonteCarloSummary, EngineError> {
    let seed = request.seed.unwrap_or_else(rand::random);
    evaluate(request, cfg, seed, cancel)
}

/// Run to completion; see [`run_cancellable`].
pub fn run_monte_carlo(request: &MonteCarloRequest, cfg: &EngineConfig) -> Result<MonteCarloSummary, EngineError> {
    run_cancellable(request, cfg, &AtomicBool::new(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(iterations: i64, rain: f64, input: f64) -> MonteCarloRequest {
        MonteCarloRequest {
            iterations,
            bag_price: 150.0,
            rainfall_delta_pct: rain,
            input_cost_delta_pct: input,
            seed: Some(2024),
        }
    }

    #[test]
    fn neutral_run_stays_within_uniform_bounds() {
        let s = run_monte_carlo(&request(1000, 0.0, 0.0), &EngineConfig::default()).unwrap();
        assert!((45.0..=65.0).contains(&s.expected_yield), "{s:?}");
        assert!((1400.0..=2200.0).contains(&s.expected_margin), "{s:?}");
        // Far tighter than the uniform bounds: the means sit near the midpoints.
        assert!((s.expected_yield - 55.0).abs() < 1.5, "{s:?}");
        assert!((s.expected_margin - 1800.0).abs() < 40.0, "{s:?}");
        assert_eq!(s.bag_price, 150.0);
        assert_eq!(s.iterations, 1000);
    }

    #[test]
    fn unseeded_runs_respect_bounds() {
        let mut req = request(1000, 0.0, 0.0);
        req.seed = None;
        let cfg = EngineConfig::default();
        for _ in 0..3 {
            let s = run_monte_carlo(&req, &cfg).unwrap();
            assert!((45.0..=65.0).contains(&s.expected_yield), "{s:?}");
            assert!((1400.0..=2200.0).contains(&s.expected_margin), "{s:?}");
        }
    }

    #[test]
    fn seeded_runs_are_reproducible_across_block_sizes() {
        let req = request(5000, 5.0, -3.0);
        let mut small = EngineConfig::default();
        small.monte_carlo.block_size = 7;
        let a = run_monte_carlo(&req, &EngineConfig::default()).unwrap();
        let b = run_monte_carlo(&req, &small).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rainfall_shift_moves_expected_yield() {
        let cfg = EngineConfig::default();
        let base = run_monte_carlo(&request(4000, 0.0, 0.0), &cfg).unwrap();
        let wet = run_monte_carlo(&request(4000, 10.0, 0.0), &cfg).unwrap();
        // Same seed, so the gap is exactly the 10% rainfall mean shift on each trial.
        assert!(wet.expected_yield > base.expected_yield + 4.0, "{base:?} {wet:?}");
        assert!(wet.expected_margin > base.expected_margin);
    }

    #[test]
    fn input_cost_increase_lowers_margin_only() {
        let cfg = EngineConfig::default();
        let base = run_monte_carlo(&request(4000, 0.0, 0.0), &cfg).unwrap();
        let pricey = run_monte_carlo(&request(4000, 0.0, 20.0), &cfg).unwrap();
        assert_eq!(base.expected_yield, pricey.expected_yield);
        assert!(pricey.expected_margin < base.expected_margin - 250.0);
    }

    #[test]
    fn non_positive_iterations_fail_before_any_trial() {
        let cfg = EngineConfig::default();
        for n in [0, -1, -1000] {
            let err = run_monte_carlo(&request(n, 0.0, 0.0), &cfg).unwrap_err();
            assert_eq!(err, EngineError::Validation(ValidationError::NonPositiveIterations(n)));
        }
    }

    #[test]
    fn iteration_ceiling_enforced() {
        let mut cfg = EngineConfig::default();
        cfg.monte_carlo.max_iterations = 10;
        let err = run_monte_carlo(&request(11, 0.0, 0.0), &cfg).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::TooManyIterations { requested: 11, limit: 10 })
        ));
    }

    #[test]
    fn raised_flag_cancels_without_result() {
        let flag = AtomicBool::new(true);
        let err = evaluate(&request(100, 0.0, 0.0), &EngineConfig::default(), 1, &flag).unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
    }

    #[test]
    fn zero_variance_trial_is_exact_product() {
        let mut cfg = EngineConfig::default();
        cfg.monte_carlo.factor_stddev = 0.0;
        cfg.monte_carlo.yield_range = (50.0, 50.0);
        cfg.monte_carlo.margin_range = (2000.0, 2000.0);
        let model = TrialModel::new(&request(1, 10.0, 10.0), &cfg.monte_carlo, 9).unwrap();
        let t = model.trial(3);
        assert!((t.yield_bag_ha - 55.0).abs() < 1e-9);
        assert!((t.margin_per_ha - 1980.0).abs() < 1e-9);
    }

    #[test]
    fn unsampleable_range_is_validation_error() {
        let mut cfg = EngineConfig::default();
        cfg.monte_carlo.margin_range = (-1.0e308, 1.0e308);
        let err = run_monte_carlo(&request(10, 0.0, 0.0), &cfg).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn trials_use_distinct_streams() {
        let model = TrialModel::new(&request(2, 0.0, 0.0), &EngineConfig::default().monte_carlo, 5).unwrap();
        assert_ne!(model.trial(0), model.trial(1));
        assert_eq!(model.trial(1), model.trial(1));
    }
}
