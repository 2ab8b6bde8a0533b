//! Baseline resolution from historical aggregates.
//!
//! The engine never queries storage. Callers hand over the single historical
//! read (an aggregate, or the raw records to aggregate) and the resolver fills
//! every missing figure with the configured fallbacks.

use crate::{Baseline, EngineConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One season's productivity record, ordered oldest to newest by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductivityRecord {
    pub yield_bag_ha: f64,
    #[serde(default)]
    pub margin_per_ha: Option<f64>,
    #[serde(default)]
    pub cost_per_ha: Option<f64>,
}

/// Historical figures for a field; `None` means no data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalAggregate {
    pub avg_yield_bag_ha: Option<f64>,
    pub avg_margin_per_ha: Option<f64>,
    /// Cost of the most recent record carrying one.
    pub latest_cost_per_ha: Option<f64>,
}

/// Source of historical aggregates, implemented by the persistence layer.
pub trait BaselineProvider {
    fn historical(&self, field_id: u64) -> HistoricalAggregate;
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Aggregate raw records into the figures a baseline needs.
///
/// Non-finite values are skipped rather than poisoning the mean.
pub fn aggregate_history(records: &[ProductivityRecord]) -> HistoricalAggregate {
    HistoricalAggregate {
        avg_yield_bag_ha: mean(records.iter().map(|r| r.yield_bag_ha)),
        avg_margin_per_ha: mean(records.iter().filter_map(|r| r.margin_per_ha)),
        latest_cost_per_ha: records
            .iter()
            .rev()
            .filter_map(|r| r.cost_per_ha)
            .find(|c| c.is_finite()),
    }
}

/// Resolve a baseline, falling back per figure when history is missing.
///
/// Example:
/// let b = resolve_baseline(&HistoricalAggregate::default(), &EngineConfig::default());
/// assert_eq!(b.yield_bag_ha, 55.0);
/// assert_eq!(b.margin_per_ha, 1800.0);
pub fn resolve_baseline(aggregate: &HistoricalAggregate, cfg: &EngineConfig) -> Baseline {
    let fb = &cfg.baseline;
    let baseline = Baseline {
        yield_bag_ha: aggregate.avg_yield_bag_ha.unwrap_or(fb.yield_bag_ha),
        margin_per_ha: aggregate.avg_margin_per_ha.unwrap_or(fb.margin_per_ha),
        cost_per_ha: aggregate.latest_cost_per_ha.unwrap_or(fb.cost_per_ha),
    };
    debug!(?aggregate, ?baseline, "resolved baseline");
    baseline
}

/// Resolve the baseline of `field_id` through a provider.
pub fn resolve_for_field<P: BaselineProvider + ?Sized>(
    provider: &P,
    field_id: u64,
    cfg: &EngineConfig,
) -> Baseline {
    resolve_baseline(&provider.historical(field_id), cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct InMemory(HashMap<u64, Vec<ProductivityRecord>>);

    impl BaselineProvider for InMemory {
        fn historical(&self, field_id: u64) -> HistoricalAggregate {
            self.0
                .get(&field_id)
                .map(|rows| aggregate_history(rows))
                .unwrap_or_default()
        }
    }

    fn rec(y: f64, m: Option<f64>, c: Option<f64>) -> ProductivityRecord {
        ProductivityRecord {
            yield_bag_ha: y,
            margin_per_ha: m,
            cost_per_ha: c,
        }
    }

    #[test]
    fn no_history_uses_documented_fallbacks() {
        let b = resolve_baseline(&HistoricalAggregate::default(), &EngineConfig::default());
        assert_eq!(b.yield_bag_ha, 55.0);
        assert_eq!(b.margin_per_ha, 1800.0);
        assert_eq!(b.cost_per_ha, 4200.0);
    }

    #[test]
    fn aggregates_means_and_latest_cost() {
        let rows = vec![
            rec(50.0, Some(1700.0), Some(4000.0)),
            rec(60.0, None, Some(4300.0)),
            rec(58.0, Some(1900.0), None),
        ];
        let agg = aggregate_history(&rows);
        assert_eq!(agg.avg_yield_bag_ha, Some(56.0));
        assert_eq!(agg.avg_margin_per_ha, Some(1800.0));
        assert_eq!(agg.latest_cost_per_ha, Some(4300.0));
    }

    #[test]
    fn partial_history_falls_back_per_figure() {
        let agg = aggregate_history(&[rec(62.0, None, None)]);
        let b = resolve_baseline(&agg, &EngineConfig::default());
        assert_eq!(b.yield_bag_ha, 62.0);
        assert_eq!(b.margin_per_ha, 1800.0);
        assert_eq!(b.cost_per_ha, 4200.0);
    }

    #[test]
    fn provider_lookup_by_field() {
        let mut rows = HashMap::new();
        rows.insert(7, vec![rec(48.0, Some(1500.0), Some(3900.0))]);
        let provider = InMemory(rows);
        let cfg = EngineConfig::default();
        let known = resolve_for_field(&provider, 7, &cfg);
        assert_eq!(known.yield_bag_ha, 48.0);
        assert_eq!(known.cost_per_ha, 3900.0);
        let unknown = resolve_for_field(&provider, 8, &cfg);
        assert_eq!(unknown.yield_bag_ha, 55.0);
    }

    #[test]
    fn non_finite_rows_are_skipped() {
        let agg = aggregate_history(&[rec(f64::NAN, Some(f64::INFINITY), None), rec(40.0, None, None)]);
        assert_eq!(agg.avg_yield_bag_ha, Some(40.0));
        assert_eq!(agg.avg_margin_per_ha, None);
    }
}
