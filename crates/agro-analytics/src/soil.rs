//! Lime and fertilizer recommendations from soil sample means.

use agro_core::{round2, validate_soil_sample, EngineConfig, Nutrient, SoilAnalysis, SoilSample, ValidationError};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Sole warning of an analysis over an empty sample set.
pub const NO_DATA_WARNING: &str = "no data";
/// Emitted when the average pH is under the liming threshold.
pub const LOW_PH_WARNING: &str = "pH below ideal, lime application recommended";

/// Analyze a field's soil samples.
///
/// Means are unweighted (depth is ignored) and order does not matter. The
/// lime dose closes the gap to the target pH and is never negative; the plan
/// scales mean N/P/K by the uptake factors. All figures are rounded to 2
/// decimals.
///
/// Example:
/// let a = analyze(&[], &EngineConfig::default()).unwrap();
/// assert_eq!(a.warnings, vec!["no data".to_string()]);
pub fn analyze(samples: &[SoilSample], cfg: &EngineConfig) -> Result<SoilAnalysis, ValidationError> {
    if samples.is_empty() {
        warn!("soil analysis without samples");
        return Ok(SoilAnalysis {
            lime_recommendation_kg_ha: 0.0,
            fertilizer_plan: BTreeMap::new(),
            warnings: vec![NO_DATA_WARNING.to_string()],
        });
    }
    for s in samples {
        validate_soil_sample(s)?;
    }

    let n = samples.len() as f64;
    let mean = |reading: fn(&SoilSample) -> f64| samples.iter().map(reading).sum::<f64>() / n;
    let avg_ph = mean(|s| s.ph);
    let policy = &cfg.soil;

    let lime = ((policy.target_ph - avg_ph) * policy.lime_kg_per_ph_unit).max(0.0);
    let mut plan = BTreeMap::new();
    plan.insert(Nutrient::N, round2(mean(|s| s.nitrogen) * policy.n_factor));
    plan.insert(Nutrient::P, round2(mean(|s| s.phosphorus) * policy.p_factor));
    plan.insert(Nutrient::K, round2(mean(|s| s.potassium) * policy.k_factor));

    let mut warnings = Vec::new();
    if avg_ph < policy.low_ph_threshold {
        warnings.push(LOW_PH_WARNING.to_string());
    }
    debug!(samples = samples.len(), avg_ph, lime, "soil analyzed");
    Ok(SoilAnalysis {
        lime_recommendation_kg_ha: round2(lime),
        fertilizer_plan: plan,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(ph: f64, n: f64, p: f64, k: f64) -> SoilSample {
        SoilSample {
            depth_cm: 20,
            ph,
            organic_matter: 2.5,
            nitrogen: n,
            phosphorus: p,
            potassium: k,
        }
    }

    #[test]
    fn empty_set_degrades_to_no_data() {
        let a = analyze(&[], &EngineConfig::default()).unwrap();
        assert_eq!(a.lime_recommendation_kg_ha, 0.0);
        assert!(a.fertilizer_plan.is_empty());
        assert_eq!(a.warnings, vec![NO_DATA_WARNING.to_string()]);
    }

    #[test]
    fn target_ph_needs_no_lime() {
        let a = analyze(
            &[sample(6.2, 20.0, 10.0, 50.0), sample(6.2, 30.0, 14.0, 70.0)],
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(a.lime_recommendation_kg_ha, 0.0);
        assert!(a.warnings.is_empty());
    }

    #[test]
    fn acidic_soil_gets_lime_and_warning() {
        let a = analyze(
            &[sample(4.8, 20.0, 10.0, 50.0), sample(5.2, 30.0, 14.0, 70.0)],
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(a.lime_recommendation_kg_ha, 300.0);
        assert_eq!(a.warnings, vec![LOW_PH_WARNING.to_string()]);
    }

    #[test]
    fn plan_applies_uptake_factors() {
        let a = analyze(
            &[sample(5.8, 20.0, 10.0, 50.0), sample(6.0, 30.0, 14.0, 70.0)],
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(a.fertilizer_plan[&Nutrient::N], 30.0);
        assert_eq!(a.fertilizer_plan[&Nutrient::P], 9.6);
        assert_eq!(a.fertilizer_plan[&Nutrient::K], 36.0);
        assert!(a.warnings.is_empty());
        assert!(a.lime_recommendation_kg_ha > 0.0);
    }

    #[test]
    fn depth_is_not_weighted() {
        let mut deep = sample(5.0, 40.0, 10.0, 50.0);
        deep.depth_cm = 60;
        let cfg = EngineConfig::default();
        let a = analyze(&[sample(6.0, 20.0, 10.0, 50.0), deep.clone()], &cfg).unwrap();
        let b = analyze(&[deep, sample(6.0, 20.0, 10.0, 50.0)], &cfg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fertilizer_plan[&Nutrient::N], 36.0);
    }

    #[test]
    fn invalid_depth_rejected() {
        let mut bad = sample(6.0, 1.0, 1.0, 1.0);
        bad.depth_cm = -10;
        assert_eq!(
            analyze(&[bad], &EngineConfig::default()),
            Err(ValidationError::NonPositiveDepth(-10))
        );
    }

    proptest! {
        #[test]
        fn lime_is_non_negative_and_falls_with_ph(ph in 3.0f64..9.0, bump in 0.01f64..2.0) {
            let cfg = EngineConfig::default();
            let low = analyze(&[sample(ph, 1.0, 1.0, 1.0)], &cfg).unwrap();
            let high = analyze(&[sample(ph + bump, 1.0, 1.0, 1.0)], &cfg).unwrap();
            prop_assert!(low.lime_recommendation_kg_ha >= 0.0);
            prop_assert!(high.lime_recommendation_kg_ha <= low.lime_recommendation_kg_ha);
        }
    }
}
