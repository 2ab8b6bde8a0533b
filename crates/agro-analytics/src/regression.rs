//! Ordinary least-squares productivity model.
//!
//! The model is refit on every call and only ever predicts its own training
//! rows. Columns are centered and scaled to unit norm, then the design is
//! solved directly through an SVD. Singular values under
//! `eps * max(n, p) * sigma_max` count as zero, so dependent columns (a single
//! sample, a constant feature, duplicated features) get the minimum-norm
//! solution while merely correlated ones keep their own slope. Fitted values
//! of a least-squares problem do not depend on which solution is picked.

use agro_core::{
    ensure_finite, round2, EngineConfig, EngineError, RegressionPolicy, RegressionSample,
};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

/// Number of model features: rainfall, ndvi, cost, temperature.
pub const FEATURES: usize = 4;

/// Iteration cap of the SVD; reaching it is a computation failure.
const SVD_MAX_ITERATIONS: usize = 10_000;

/// A fitted linear model in centered form.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearFit {
    mean_x: [f64; FEATURES],
    mean_y: f64,
    coefficients: [f64; FEATURES],
}

impl LinearFit {
    /// Per-feature slopes, in feature units.
    pub fn coefficients(&self) -> [f64; FEATURES] {
        self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.mean_y
            - self
                .coefficients
                .iter()
                .zip(&self.mean_x)
                .map(|(b, m)| b * m)
                .sum::<f64>()
    }

    pub fn predict_row(&self, x: &[f64; FEATURES]) -> f64 {
        self.mean_y
            + self
                .coefficients
                .iter()
                .zip(x.iter().zip(&self.mean_x))
                .map(|(b, (v, m))| b * (v - m))
                .sum::<f64>()
    }
}

fn design_row(s: &RegressionSample, policy: &RegressionPolicy) -> Result<[f64; FEATURES], EngineError> {
    let d = policy.default_feature;
    let row = [
        s.rainfall.unwrap_or(d),
        s.ndvi.unwrap_or(d),
        s.cost.unwrap_or(d),
        s.temperature.unwrap_or(d),
    ];
    for (name, v) in ["rainfall", "ndvi", "cost", "temperature"].into_iter().zip(row) {
        ensure_finite(name, v)?;
    }
    Ok(row)
}

/// Fit `targets ~ intercept + rows` by least squares.
pub fn fit(rows: &[[f64; FEATURES]], targets: &[f64]) -> Result<LinearFit, EngineError> {
    if rows.is_empty() || rows.len() != targets.len() {
        return Err(EngineError::Computation(format!(
            "cannot fit {} rows against {} targets",
            rows.len(),
            targets.len()
        )));
    }
    let n = rows.len();
    let inv_n = 1.0 / n as f64;
    let mut mean_x = [0.0; FEATURES];
    for row in rows {
        for (m, v) in mean_x.iter_mut().zip(row) {
            *m += v * inv_n;
        }
    }
    let mean_y = targets.iter().map(|y| y * inv_n).sum::<f64>();

    let mut scale = [0.0; FEATURES];
    for row in rows {
        for j in 0..FEATURES {
            let d = row[j] - mean_x[j];
            scale[j] += d * d;
        }
    }
    for s in scale.iter_mut() {
        *s = s.sqrt();
    }
    if !(mean_y.is_finite() && mean_x.iter().chain(&scale).all(|v| v.is_finite())) {
        return Err(EngineError::Computation(
            "feature magnitudes overflow the fit".to_string(),
        ));
    }
    let active: [bool; FEATURES] =
        std::array::from_fn(|j| scale[j] > 1e-12 * (1.0 + mean_x[j].abs()));

    // Centered, unit-norm columns; constant columns stay zero.
    let z = DMatrix::from_fn(n, FEATURES, |i, j| {
        if active[j] {
            (rows[i][j] - mean_x[j]) / scale[j]
        } else {
            0.0
        }
    });
    let y = DVector::from_fn(n, |i, _| targets[i] - mean_y);

    let beta = solve_least_squares(z, &y)?;
    let coefficients: [f64; FEATURES] =
        std::array::from_fn(|j| if active[j] { beta[j] / scale[j] } else { 0.0 });
    if !coefficients.iter().all(|c| c.is_finite()) {
        return Err(EngineError::Computation(
            "regression coefficients are not finite".to_string(),
        ));
    }
    Ok(LinearFit {
        mean_x,
        mean_y,
        coefficients,
    })
}

/// Minimum-norm least-squares solution of `z * beta = y`.
fn solve_least_squares(z: DMatrix<f64>, y: &DVector<f64>) -> Result<DVector<f64>, EngineError> {
    let (n, p) = z.shape();
    let svd = z
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or_else(|| EngineError::Computation("svd did not converge".to_string()))?;
    let sigma_max = svd.singular_values.max();
    if sigma_max <= 0.0 {
        // Every column is constant: the mean alone is the fit.
        return Ok(DVector::zeros(p));
    }
    let cutoff = f64::EPSILON * n.max(p) as f64 * sigma_max;
    svd.solve(y, cutoff)
        .map_err(|e| EngineError::Computation(format!("least-squares solve: {e}")))
}

/// In-sample yield predictions for `samples`, rounded to 2 decimals.
///
/// Missing features default to 0 and a missing yield to 55 (configurable).
/// An empty set yields an empty result.
///
/// Example:
/// let one = RegressionSample { rainfall: Some(900.0), yield_bag_ha: Some(61.25), ..Default::default() };
/// assert_eq!(predict(&[one], &EngineConfig::default()).unwrap(), vec![61.25]);
pub fn predict(samples: &[RegressionSample], cfg: &EngineConfig) -> Result<Vec<f64>, EngineError> {
    if samples.is_empty() {
        warn!("productivity prediction without samples");
        return Ok(Vec::new());
    }
    let policy = &cfg.regression;
    let rows = samples
        .iter()
        .map(|s| design_row(s, policy))
        .collect::<Result<Vec<_>, _>>()?;
    let targets = samples
        .iter()
        .map(|s| {
            let y = s.yield_bag_ha.unwrap_or(policy.default_yield);
            ensure_finite("yield", y).map(|_| y)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let model = fit(&rows, &targets)?;
    debug!(
        samples = samples.len(),
        intercept = model.intercept(),
        coefficients = ?model.coefficients(),
        "productivity model fitted"
    );
    let predictions: Vec<f64> = rows.iter().map(|r| model.predict_row(r)).collect();
    if predictions.iter().any(|p| !p.is_finite()) {
        return Err(EngineError::Computation(
            "regression produced non-finite predictions".to_string(),
        ));
    }
    Ok(predictions.into_iter().map(round2).collect())
}
