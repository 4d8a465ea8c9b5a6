//! Descriptive statistics over one numeric series.
//!
//! Conventions:
//! - Standard deviation is the sample deviation (n − 1 denominator); a single
//!   sample reports 0.0.
//! - Percentiles interpolate linearly between order statistics
//!   (Hyndman–Fan type 7): `h = (n − 1)·p`, then
//!   `x[⌊h⌋] + (h − ⌊h⌋)·(x[⌊h⌋ + 1] − x[⌊h⌋])`.
//! - An empty series has no summary (`None`), never a zero-filled one.

use serde::Serialize;

/// Percentile reported in every summary.
pub const REPORT_PERCENTILE: f64 = 0.95;

/// Summary of one numeric series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
}

impl StatSummary {
    /// Summarize `samples`. Returns `None` for an empty slice.
    ///
    /// Non-finite samples are ignored.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;

        Some(Self {
            count,
            mean,
            std_dev: sample_std_dev(&sorted, mean),
            min: sorted[0],
            max: sorted[count - 1],
            p95: percentile_sorted(&sorted, REPORT_PERCENTILE)?,
        })
    }

    /// Summarize integer samples (durations, sizes).
    pub fn from_counts(samples: &[u64]) -> Option<Self> {
        let as_f64: Vec<f64> = samples.iter().map(|&v| v as f64).collect();
        Self::from_samples(&as_f64)
    }
}

/// Sample standard deviation around `mean`; 0.0 for fewer than two samples.
fn sample_std_dev(samples: &[f64], mean: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (samples.len() - 1) as f64).sqrt()
}

/// Type-7 percentile of ascending `sorted`, `p` in `[0, 1]`.
///
/// `None` when `sorted` is empty or `p` is out of range.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lower = h.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = h - lower as f64;
    Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

/// Type-7 percentile of unsorted samples.
pub fn percentile(samples: &[f64], p: f64) -> Option<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_p95_of_four_durations_is_pinned() {
        let summary = StatSummary::from_counts(&[10, 20, 30, 40]).unwrap();
        assert!(approx(summary.p95, 38.5), "p95 = {}", summary.p95);
        assert!(approx(summary.mean, 25.0));
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 40.0);
        assert_eq!(summary.count, 4);
    }

    #[test]
    fn test_p95_independent_of_input_order() {
        let summary = StatSummary::from_counts(&[40, 10, 30, 20]).unwrap();
        assert!(approx(summary.p95, 38.5));
    }

    #[test]
    fn test_sample_std_dev() {
        // Sample variance of 10,20,30,40 is 500/3.
        let summary = StatSummary::from_counts(&[10, 20, 30, 40]).unwrap();
        assert!(approx(summary.std_dev, (500.0f64 / 3.0).sqrt()));
    }

    #[test]
    fn test_single_sample_std_dev_is_zero() {
        let summary = StatSummary::from_samples(&[42.5]).unwrap();
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.p95, 42.5);
        assert_eq!(summary.mean, 42.5);
        assert_eq!(summary.count, 1);
    }

    #[test]
    fn test_empty_series_is_undefined() {
        assert_eq!(StatSummary::from_samples(&[]), None);
        assert_eq!(StatSummary::from_counts(&[]), None);
        assert_eq!(StatSummary::from_samples(&[f64::NAN]), None);
    }

    #[test]
    fn test_percentile_bounds() {
        let data = [3.0, 1.0, 2.0];
        assert_eq!(percentile(&data, 0.0), Some(1.0));
        assert_eq!(percentile(&data, 1.0), Some(3.0));
        assert_eq!(percentile(&data, 0.5), Some(2.0));
        assert_eq!(percentile(&data, 1.5), None);
        assert_eq!(percentile(&[], 0.5), None);
    }

    proptest! {
        #[test]
        fn prop_summary_within_bounds(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..64)) {
            let s = StatSummary::from_samples(&values).unwrap();
            prop_assert_eq!(s.count, values.len());
            prop_assert!(s.min <= s.p95 && s.p95 <= s.max);
            prop_assert!(s.min <= s.mean + 1e-6 && s.mean <= s.max + 1e-6);
            prop_assert!(s.std_dev >= 0.0);
        }
    }
}
