#![deny(warnings)]

//! Core value objects and invariants for the agronomic scenario engine.
//!
//! This crate defines the serializable request/result types shared by every
//! analyzer, the policy configuration, the error taxonomy, and validation
//! helpers guarding the basic numeric invariants (finite readings,
//! non-negative money, positive iteration counts).

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod baseline;
pub mod config;

pub use baseline::{
    aggregate_history, resolve_baseline, resolve_for_field, BaselineProvider, HistoricalAggregate,
    ProductivityRecord,
};
pub use config::{
    BaselineFallbacks, ConfigError, EngineConfig, MonteCarloPolicy, RegressionPolicy,
    SensitivityWeights, SimulationPolicy, SoilPolicy,
};

/// A what-if perturbation applied to a field baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInput {
    /// Rainfall change in percent (10 = +10%).
    pub rainfall_delta_pct: f64,
    /// Input cost change in percent; positive values erode margin.
    pub input_cost_delta_pct: f64,
    /// Fertilizer application change in percent.
    pub fertilizer_delta_pct: f64,
    /// Cultivar label, e.g. "SOJA RR".
    pub cultivar: String,
    /// Sale price per bag.
    pub bag_price: f64,
}

/// Reference yield/margin/cost figures for a field and season.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Yield in bags per hectare.
    pub yield_bag_ha: f64,
    /// Margin per hectare.
    pub margin_per_ha: f64,
    /// Production cost per hectare.
    pub cost_per_ha: f64,
}

/// Projected outcome of one deterministic scenario run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutcome {
    /// Display label `"{cultivar}-{bag_price}"`. Not unique.
    pub scenario_name: String,
    pub projected_yield: f64,
    pub projected_margin: f64,
    /// Heuristic in [risk_floor, 1].
    pub risk_score: f64,
    /// Factor name to numeric effect, enough to replay the computation.
    pub breakdown: BTreeMap<String, f64>,
}

fn default_iterations() -> i64 {
    1000
}

fn default_bag_price() -> f64 {
    150.0
}

/// Payload of a Monte Carlo risk job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloRequest {
    /// Number of trials; must be > 0.
    #[serde(default = "default_iterations")]
    pub iterations: i64,
    #[serde(default = "default_bag_price")]
    pub bag_price: f64,
    #[serde(default)]
    pub rainfall_delta_pct: f64,
    #[serde(default)]
    pub input_cost_delta_pct: f64,
    /// Fixed seed for reproducible runs; fresh entropy when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for MonteCarloRequest {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            bag_price: default_bag_price(),
            rainfall_delta_pct: 0.0,
            input_cost_delta_pct: 0.0,
            seed: None,
        }
    }
}

impl MonteCarloRequest {
    /// Build a request from an opaque key-value job payload.
    ///
    /// Absent (or null) keys take the defaults: 1000 iterations, bag price
    /// 150, zero deltas, no seed. Present keys of the wrong type are rejected.
    ///
    /// Example:
    /// let payload = serde_json::json!({"iterations": 500}).as_object().unwrap().clone();
    /// let req = MonteCarloRequest::from_payload(&payload).unwrap();
    /// assert_eq!(req.iterations, 500);
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, ValidationError> {
        let defaults = Self::default();
        let iterations = match present(payload, "iterations") {
            Some(v) => v
                .as_i64()
                .ok_or_else(|| ValidationError::invalid_field("iterations", "expected an integer"))?,
            None => defaults.iterations,
        };
        let seed = match present(payload, "seed") {
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                ValidationError::invalid_field("seed", "expected an unsigned integer")
            })?),
            None => None,
        };
        Ok(Self {
            iterations,
            bag_price: number_or(payload, "bag_price", defaults.bag_price)?,
            rainfall_delta_pct: number_or(payload, "rainfall_delta_pct", 0.0)?,
            input_cost_delta_pct: number_or(payload, "input_cost_delta_pct", 0.0)?,
            seed,
        })
    }

    /// Check the request before any trial is drawn.
    pub fn validate(&self, max_iterations: i64) -> Result<(), ValidationError> {
        if self.iterations <= 0 {
            return Err(ValidationError::NonPositiveIterations(self.iterations));
        }
        if self.iterations > max_iterations {
            return Err(ValidationError::TooManyIterations {
                requested: self.iterations,
                limit: max_iterations,
            });
        }
        ensure_finite("bag_price", self.bag_price)?;
        ensure_finite("rainfall_delta_pct", self.rainfall_delta_pct)?;
        ensure_finite("input_cost_delta_pct", self.input_cost_delta_pct)?;
        if self.bag_price < 0.0 {
            return Err(ValidationError::NegativeMoney("bag_price"));
        }
        Ok(())
    }
}

fn present<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    payload.get(key).filter(|v| !v.is_null())
}

fn number_or(payload: &Map<String, Value>, key: &str, default: f64) -> Result<f64, ValidationError> {
    match present(payload, key) {
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ValidationError::invalid_field(key, "expected a number")),
        None => Ok(default),
    }
}

/// Expected-value summary of a Monte Carlo run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloSummary {
    pub expected_yield: f64,
    pub expected_margin: f64,
    /// Echoed from the request.
    pub bag_price: f64,
    /// Number of trials averaged.
    pub iterations: i64,
}

/// One soil laboratory reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoilSample {
    /// Sampling depth in cm (> 0).
    pub depth_cm: i32,
    pub ph: f64,
    pub organic_matter: f64,
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
}

/// Macronutrients covered by the fertilizer plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Nutrient {
    /// Nitrogen
    N,
    /// Phosphorus
    P,
    /// Potassium
    K,
}

/// Lime and fertilizer recommendation for a field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoilAnalysis {
    pub lime_recommendation_kg_ha: f64,
    /// Empty when no samples were supplied.
    pub fertilizer_plan: BTreeMap<Nutrient, f64>,
    pub warnings: Vec<String>,
}

/// Cost change to analyze against an already-resolved baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostAnalysisInput {
    /// Declared production cost per hectare for the scenario.
    pub cost_per_ha: f64,
    /// Price change in percent.
    pub delta_price_pct: f64,
    /// Most recent historical cost, if the caller has one.
    #[serde(default)]
    pub baseline_cost_per_ha: Option<f64>,
}

/// Input categories receiving a fixed share of a cost delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Fertilizers,
    Defensives,
    Seeds,
}

impl CostCategory {
    pub const ALL: [CostCategory; 3] = [
        CostCategory::Fertilizers,
        CostCategory::Defensives,
        CostCategory::Seeds,
    ];
}

impl fmt::Display for CostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostCategory::Fertilizers => write!(f, "fertilizers"),
            CostCategory::Defensives => write!(f, "defensives"),
            CostCategory::Seeds => write!(f, "seeds"),
        }
    }
}

/// Baseline vs scenario cost with per-category sensitivity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostComparison {
    pub baseline_cost: f64,
    pub scenario_cost: f64,
    /// Category to share of the delta, in percentage points.
    pub sensitivity: BTreeMap<CostCategory, f64>,
}

/// Historical training row for the productivity model. Missing values are
/// smoothed at fit time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionSample {
    #[serde(default)]
    pub rainfall: Option<f64>,
    #[serde(default)]
    pub ndvi: Option<f64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, rename = "yield")]
    pub yield_bag_ha: Option<f64>,
}

/// A single rainfall observation in mm.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RainfallReading {
    pub rainfall_mm: f64,
}

/// Average and total rainfall over a set of readings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RainfallSummary {
    pub avg: f64,
    pub total: f64,
    pub count: usize,
}

/// Validation errors for malformed engine inputs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Monte Carlo runs need at least one trial.
    #[error("iterations must be > 0, got {0}")]
    NonPositiveIterations(i64),
    /// Iteration count above the configured ceiling.
    #[error("iterations {requested} exceed the limit of {limit}")]
    TooManyIterations { requested: i64, limit: i64 },
    /// Soil sample depth must be strictly positive.
    #[error("sample depth must be > 0 cm, got {0}")]
    NonPositiveDepth(i32),
    /// Price or cost must be non-negative.
    #[error("negative monetary value in `{0}`")]
    NegativeMoney(&'static str),
    /// Numeric field must be finite.
    #[error("non-finite numeric value in `{0}`")]
    NonFinite(&'static str),
    /// Field present with an unusable value.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    /// Policy configuration violates its own invariants.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl ValidationError {
    pub fn invalid_field(field: &str, reason: &str) -> Self {
        ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failures surfaced by the analyzers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Numeric instability, e.g. a regression fit producing non-finite values.
    #[error("computation failure: {0}")]
    Computation(String),
    /// The caller withdrew interest before the run completed.
    #[error("evaluation cancelled")]
    Cancelled,
}

/// Reject NaN and infinities.
pub fn ensure_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite(field))
    }
}

/// Validate a scenario before simulating it.
pub fn validate_scenario(s: &ScenarioInput) -> Result<(), ValidationError> {
    ensure_finite("rainfall_delta_pct", s.rainfall_delta_pct)?;
    ensure_finite("input_cost_delta_pct", s.input_cost_delta_pct)?;
    ensure_finite("fertilizer_delta_pct", s.fertilizer_delta_pct)?;
    ensure_finite("bag_price", s.bag_price)?;
    if s.bag_price < 0.0 {
        return Err(ValidationError::NegativeMoney("bag_price"));
    }
    Ok(())
}

/// Validate a baseline snapshot.
pub fn validate_baseline(b: &Baseline) -> Result<(), ValidationError> {
    ensure_finite("yield_bag_ha", b.yield_bag_ha)?;
    ensure_finite("margin_per_ha", b.margin_per_ha)?;
    ensure_finite("cost_per_ha", b.cost_per_ha)?;
    if b.cost_per_ha < 0.0 {
        return Err(ValidationError::NegativeMoney("cost_per_ha"));
    }
    Ok(())
}

/// Validate a soil reading.
pub fn validate_soil_sample(s: &SoilSample) -> Result<(), ValidationError> {
    if s.depth_cm <= 0 {
        return Err(ValidationError::NonPositiveDepth(s.depth_cm));
    }
    ensure_finite("ph", s.ph)?;
    ensure_finite("organic_matter", s.organic_matter)?;
    ensure_finite("nitrogen", s.nitrogen)?;
    ensure_finite("phosphorus", s.phosphorus)?;
    ensure_finite("potassium", s.potassium)?;
    Ok(())
}

/// Validate a cost analysis request.
pub fn validate_cost_input(c: &CostAnalysisInput) -> Result<(), ValidationError> {
    ensure_finite("cost_per_ha", c.cost_per_ha)?;
    ensure_finite("delta_price_pct", c.delta_price_pct)?;
    if c.cost_per_ha < 0.0 {
        return Err(ValidationError::NegativeMoney("cost_per_ha"));
    }
    if let Some(b) = c.baseline_cost_per_ha {
        ensure_finite("baseline_cost_per_ha", b)?;
        if b < 0.0 {
            return Err(ValidationError::NegativeMoney("baseline_cost_per_ha"));
        }
    }
    Ok(())
}

/// Round to 2 decimal places for presentation, ties to even.
///
/// Goes through `Decimal` so the boundary is decided on the shortest decimal
/// form of the value. Non-finite or out-of-range input is returned unchanged.
///
/// Example:
/// assert_eq!(round2(62.3456), 62.35);
pub fn round2(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}
