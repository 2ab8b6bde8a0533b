#![deny(warnings)]

//! Economic scenario models for the agronomic engine.
//!
//! This crate provides pure functions for:
//! - Deterministic what-if projection of yield, margin and risk
//! - Cost comparison with a fixed per-category sensitivity allocation
//! - Monte Carlo expected-value evaluation (see [`monte_carlo`])

use agro_core::{
    round2, validate_cost_input, Baseline, CostAnalysisInput, CostCategory, CostComparison,
    EngineConfig, ScenarioInput, SensitivityWeights, SimulationOutcome, SimulationPolicy,
    ValidationError,
};
use std::collections::BTreeMap;
use tracing::debug;

pub mod monte_carlo;

pub use monte_carlo::{evaluate, run_cancellable, run_monte_carlo, TrialModel, TrialOutcome};

/// Display label of a scenario, e.g. `"SOJA RR-150.0"`.
///
/// Two different scenarios may share a label; it is not an identifier.
pub fn scenario_name(cultivar: &str, bag_price: f64) -> String {
    format!("{cultivar}-{bag_price:?}")
}

/// Heuristic risk in [floor, 1], shrinking with the size of the deltas.
///
/// Example:
/// let p = SimulationPolicy::default();
/// assert_eq!(risk_score(0.0, 0.0, &p), 1.0);
/// assert_eq!(risk_score(300.0, 0.0, &p), 0.1);
pub fn risk_score(rainfall_delta_pct: f64, input_cost_delta_pct: f64, policy: &SimulationPolicy) -> f64 {
    let raw = 1.0 - (rainfall_delta_pct.abs() + input_cost_delta_pct.abs()) / policy.risk_divisor;
    // f64::max discards NaN, so the floor also holds for non-finite deltas.
    raw.max(policy.risk_floor)
}

/// Project a scenario against a baseline with the affine multiplicative model.
///
/// Yield scales with rainfall and fertilizer, margin with rainfall and input
/// cost. Yield and margin are not floored: deltas below -100% give negative
/// projections, only the risk score is clamped. Outputs are rounded to 2
/// decimals; the breakdown keeps the raw factors.
///
/// Example:
/// let out = simulate(&scenario, &baseline, &EngineConfig::default());
/// assert_eq!(out.breakdown["rainfall_effect"], 1.1);
pub fn simulate(scenario: &ScenarioInput, baseline: &Baseline, cfg: &EngineConfig) -> SimulationOutcome {
    let rainfall_factor = 1.0 + scenario.rainfall_delta_pct / 100.0;
    let input_factor = 1.0 - scenario.input_cost_delta_pct / 100.0;
    let fertilizer_factor = 1.0 + scenario.fertilizer_delta_pct / 100.0;

    let projected_yield = baseline.yield_bag_ha * rainfall_factor * fertilizer_factor;
    let projected_margin = baseline.margin_per_ha * rainfall_factor * input_factor;
    let risk = risk_score(
        scenario.rainfall_delta_pct,
        scenario.input_cost_delta_pct,
        &cfg.simulation,
    );

    let mut breakdown = BTreeMap::new();
    breakdown.insert("rainfall_effect".to_string(), rainfall_factor);
    breakdown.insert("input_savings".to_string(), input_factor);
    breakdown.insert("fertilizer_effect".to_string(), fertilizer_factor);
    breakdown.insert("bag_price".to_string(), scenario.bag_price);

    debug!(
        cultivar = %scenario.cultivar,
        projected_yield,
        projected_margin,
        risk,
        "scenario simulated"
    );
    SimulationOutcome {
        scenario_name: scenario_name(&scenario.cultivar, scenario.bag_price),
        projected_yield: round2(projected_yield),
        projected_margin: round2(projected_margin),
        risk_score: round2(risk),
        breakdown,
    }
}

/// Simulate several scenarios against the same baseline, in input order.
pub fn compare(scenarios: &[ScenarioInput], baseline: &Baseline, cfg: &EngineConfig) -> Vec<SimulationOutcome> {
    scenarios.iter().map(|s| simulate(s, baseline, cfg)).collect()
}

/// Split a price delta across input categories by the fixed weights.
///
/// Values are in percentage points and sum to `delta_price_pct`.
pub fn sensitivity(delta_price_pct: f64, weights: &SensitivityWeights) -> BTreeMap<CostCategory, f64> {
    CostCategory::ALL
        .iter()
        .map(|c| (*c, delta_price_pct * weights.weight(*c)))
        .collect()
}

/// Compare the scenario cost against the resolved baseline cost.
///
/// The baseline is the caller's latest historical cost, or the scenario's own
/// declared cost when there is none.
///
/// Example:
/// let input = CostAnalysisInput { cost_per_ha: 4200.0, delta_price_pct: 10.0, baseline_cost_per_ha: None };
/// let out = analyze_cost(&input, &EngineConfig::default()).unwrap();
/// assert_eq!(out.scenario_cost, 4620.0);
pub fn analyze_cost(input: &CostAnalysisInput, cfg: &EngineConfig) -> Result<CostComparison, ValidationError> {
    validate_cost_input(input)?;
    let baseline_cost = input.baseline_cost_per_ha.unwrap_or(input.cost_per_ha);
    let scenario_cost = input.cost_per_ha * (1.0 + input.delta_price_pct / 100.0);
    debug!(baseline_cost, scenario_cost, delta = input.delta_price_pct, "cost analyzed");
    Ok(CostComparison {
        baseline_cost,
        scenario_cost: round2(scenario_cost),
        sensitivity: sensitivity(input.delta_price_pct, &cfg.sensitivity),
    })
}
