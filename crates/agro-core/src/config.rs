//! Policy constants of the engine gathered in one tunable structure.
//!
//! The defaults are the documented agronomic assumptions. A YAML file may
//! override any subset of them; the result is validated on load.

use crate::{CostCategory, ValidationError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading an engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid yaml: {0}")]
    Parse(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

/// Fallbacks used when a field has no historical aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineFallbacks {
    pub yield_bag_ha: f64,
    pub margin_per_ha: f64,
    pub cost_per_ha: f64,
}

impl Default for BaselineFallbacks {
    fn default() -> Self {
        Self {
            yield_bag_ha: 55.0,
            margin_per_ha: 1800.0,
            cost_per_ha: 4200.0,
        }
    }
}

/// Risk heuristic of the deterministic simulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationPolicy {
    /// Lowest reported risk score.
    pub risk_floor: f64,
    /// Summed absolute deltas (pct) that bring the raw score to zero.
    pub risk_divisor: f64,
}

impl Default for SimulationPolicy {
    fn default() -> Self {
        Self {
            risk_floor: 0.1,
            risk_divisor: 200.0,
        }
    }
}

/// Fixed allocation of a cost delta across input categories.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityWeights {
    pub fertilizers: f64,
    pub defensives: f64,
    pub seeds: f64,
}

impl Default for SensitivityWeights {
    fn default() -> Self {
        Self {
            fertilizers: 0.40,
            defensives: 0.35,
            seeds: 0.25,
        }
    }
}

impl SensitivityWeights {
    /// Share of the delta absorbed by `category`.
    pub fn weight(&self, category: CostCategory) -> f64 {
        match category {
            CostCategory::Fertilizers => self.fertilizers,
            CostCategory::Defensives => self.defensives,
            CostCategory::Seeds => self.seeds,
        }
    }

    pub fn total(&self) -> f64 {
        CostCategory::ALL.iter().map(|c| self.weight(*c)).sum()
    }
}

/// Soil correction targets and uptake-efficiency factors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoilPolicy {
    pub target_ph: f64,
    /// Lime in kg/ha per pH unit below target.
    pub lime_kg_per_ph_unit: f64,
    /// Average pH under which a liming warning is emitted.
    pub low_ph_threshold: f64,
    pub n_factor: f64,
    pub p_factor: f64,
    pub k_factor: f64,
}

impl Default for SoilPolicy {
    fn default() -> Self {
        Self {
            target_ph: 6.2,
            lime_kg_per_ph_unit: 250.0,
            low_ph_threshold: 5.5,
            n_factor: 1.2,
            p_factor: 0.8,
            k_factor: 0.6,
        }
    }
}

/// Variance assumptions of the Monte Carlo trial model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloPolicy {
    /// Stddev of the rainfall and input factors.
    pub factor_stddev: f64,
    /// Inclusive range of the per-trial base yield (bag/ha).
    pub yield_range: (f64, f64),
    /// Inclusive range of the per-trial base margin.
    pub margin_range: (f64, f64),
    pub max_iterations: i64,
    /// Trials per parallel block; cancellation is checked between blocks.
    pub block_size: usize,
}

impl Default for MonteCarloPolicy {
    fn default() -> Self {
        Self {
            factor_stddev: 0.05,
            yield_range: (45.0, 65.0),
            margin_range: (1400.0, 2200.0),
            max_iterations: 1_000_000,
            block_size: 1024,
        }
    }
}

impl MonteCarloPolicy {
    /// Both ranges are finite, ordered, and narrow enough that a uniform
    /// sampler can represent their span.
    ///
    /// Example:
    /// let mut p = MonteCarloPolicy::default();
    /// p.margin_range = (-1.0e308, 1.0e308);
    /// assert!(!p.ranges_are_sampleable());
    pub fn ranges_are_sampleable(&self) -> bool {
        [self.yield_range, self.margin_range].iter().all(|&(lo, hi)| {
            lo.is_finite() && hi.is_finite() && lo <= hi && ((hi - lo) * 2.0).is_finite()
        })
    }
}

/// Smoothing defaults applied to incomplete regression samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionPolicy {
    pub default_yield: f64,
    pub default_feature: f64,
}

impl Default for RegressionPolicy {
    fn default() -> Self {
        Self {
            default_yield: 55.0,
            default_feature: 0.0,
        }
    }
}

/// All policy constants of the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub baseline: BaselineFallbacks,
    pub simulation: SimulationPolicy,
    pub sensitivity: SensitivityWeights,
    pub soil: SoilPolicy,
    pub monte_carlo: MonteCarloPolicy,
    pub regression: RegressionPolicy,
}

impl EngineConfig {
    /// Parse a YAML document; missing keys keep their defaults.
    ///
    /// Example:
    /// let cfg = EngineConfig::from_yaml_str("soil:\n  target_ph: 6.0\n").unwrap();
    /// assert_eq!(cfg.soil.target_ph, 6.0);
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading engine config");
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check the internal consistency of every policy section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let finite = [
            self.baseline.yield_bag_ha,
            self.baseline.margin_per_ha,
            self.baseline.cost_per_ha,
            self.simulation.risk_floor,
            self.simulation.risk_divisor,
            self.sensitivity.fertilizers,
            self.sensitivity.defensives,
            self.sensitivity.seeds,
            self.soil.target_ph,
            self.soil.lime_kg_per_ph_unit,
            self.soil.low_ph_threshold,
            self.soil.n_factor,
            self.soil.p_factor,
            self.soil.k_factor,
            self.monte_carlo.factor_stddev,
            self.monte_carlo.yield_range.0,
            self.monte_carlo.yield_range.1,
            self.monte_carlo.margin_range.0,
            self.monte_carlo.margin_range.1,
            self.regression.default_yield,
            self.regression.default_feature,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(invalid("all policy values must be finite"));
        }
        if self.baseline.cost_per_ha < 0.0 {
            return Err(invalid("baseline.cost_per_ha must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.simulation.risk_floor) {
            return Err(invalid("simulation.risk_floor must be within [0,1]"));
        }
        if self.simulation.risk_divisor <= 0.0 {
            return Err(invalid("simulation.risk_divisor must be > 0"));
        }
        if (self.sensitivity.total() - 1.0).abs() > 1e-9 {
            return Err(invalid("sensitivity weights must sum to 1"));
        }
        if self.monte_carlo.factor_stddev < 0.0 {
            return Err(invalid("monte_carlo.factor_stddev must be >= 0"));
        }
        if !self.monte_carlo.ranges_are_sampleable() {
            return Err(invalid(
                "monte_carlo ranges must be ordered (low, high) with a finite span",
            ));
        }
        if self.monte_carlo.max_iterations <= 0 || self.monte_carlo.block_size == 0 {
            return Err(invalid(
                "monte_carlo.max_iterations and block_size must be > 0",
            ));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ValidationError {
    ValidationError::InvalidConfig(reason.to_string())
}
