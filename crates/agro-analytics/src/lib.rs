#![deny(warnings)]

//! Field analytics: soil nutrient recommendations, productivity regression
//! and rainfall summaries.
//!
//! Every analyzer is a pure function over caller-supplied records. Sparse data
//! degrades to documented defaults instead of failing.

use agro_core::{RainfallReading, RainfallSummary};

pub mod regression;
pub mod soil;

pub use regression::{fit, predict, LinearFit, FEATURES};
pub use soil::{analyze, LOW_PH_WARNING, NO_DATA_WARNING};

/// Average and total rainfall; zeros for an empty set.
///
/// Example:
/// let s = summarize_rainfall(&[RainfallReading { rainfall_mm: 10.0 }, RainfallReading { rainfall_mm: 20.0 }]);
/// assert_eq!(s.avg, 15.0);
pub fn summarize_rainfall(readings: &[RainfallReading]) -> RainfallSummary {
    let total: f64 = readings
        .iter()
        .map(|r| r.rainfall_mm)
        .filter(|v| v.is_finite())
        .sum();
    let count = readings.iter().filter(|r| r.rainfall_mm.is_finite()).count();
    let avg = if count == 0 { 0.0 } else { total / count as f64 };
    RainfallSummary { avg, total, count }
}
