//! Streaming moments and log-scale histograms.
//!
//! Each category keeps exact low-order moments (Welford's single-pass
//! update) plus a fixed array of logarithmically spaced buckets used to
//! estimate percentiles. Memory per category is constant no matter how many
//! values are observed; raw samples are never kept.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::HistogramError;

/// Default number of histogram buckets.
pub const DEFAULT_BUCKETS: usize = 1000;
/// Default lower edge of the first bucket.
pub const DEFAULT_MIN_BUCKET_VALUE: f64 = 1e-6;
/// Default upper edge of the last bucket.
pub const DEFAULT_MAX_BUCKET_VALUE: f64 = 1e9;

/// Histogram settings as written in a format file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    pub buckets: usize,
    pub min_bucket_value: f64,
    pub max_bucket_value: f64,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
            min_bucket_value: DEFAULT_MIN_BUCKET_VALUE,
            max_bucket_value: DEFAULT_MAX_BUCKET_VALUE,
        }
    }
}

/// Geometry of a log-scale histogram, shared by every category of a tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLayout {
    count: usize,
    ln_min: f64,
    width: f64,
}

impl Default for BucketLayout {
    fn default() -> Self {
        let config = HistogramConfig::default();
        let ln_min = config.min_bucket_value.ln();
        Self {
            count: config.buckets,
            ln_min,
            width: (config.max_bucket_value.ln() - ln_min) / DEFAULT_BUCKETS as f64,
        }
    }
}

impl BucketLayout {
    /// Validates the settings: at least one bucket and `0 < min < max`.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(config: HistogramConfig) -> Result<Self, HistogramError> {
        let HistogramConfig {
            buckets,
            min_bucket_value: min,
            max_bucket_value: max,
        } = config;
        if buckets == 0 {
            return Err(HistogramError::NoBuckets);
        }
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min < max) {
            return Err(HistogramError::InvalidRange { min, max });
        }
        let ln_min = min.ln();
        Ok(Self {
            count: buckets,
            ln_min,
            width: (max.ln() - ln_min) / buckets as f64,
        })
    }

    pub const fn count(&self) -> usize {
        self.count
    }

    /// Bucket holding `value`. Values below the range (including zero and
    /// negatives) land in the first bucket, values at or above it in the last.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn bucket_index(&self, value: f64) -> usize {
        if value.is_nan() || value <= 0.0 {
            return 0;
        }
        let index = ((value.ln() - self.ln_min) / self.width).floor();
        let last = self.count - 1;
        if index <= 0.0 {
            0
        } else if index >= last as f64 {
            last
        } else {
            index as usize
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn lower_bound(&self, index: usize) -> f64 {
        (self.ln_min + index as f64 * self.width).exp()
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn upper_bound(&self, index: usize) -> f64 {
        (self.ln_min + (index + 1) as f64 * self.width).exp()
    }

    /// The value reported for a bucket: the average of its bounds.
    pub fn representative(&self, index: usize) -> f64 {
        (self.lower_bound(index) + self.upper_bound(index)) / 2.0
    }

    pub fn edge(&self, index: usize, edge: Edge) -> f64 {
        match edge {
            Edge::Lower => self.lower_bound(index),
            Edge::Upper => self.upper_bound(index),
            Edge::Average => self.representative(index),
        }
    }
}

/// Which value of a bucket a percentile query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Lower,
    Upper,
    Average,
}

/// Moments and histogram of one category.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericStats {
    hits: u64,
    sum: f64,
    mean: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
    buckets: Vec<u64>,
}

impl NumericStats {
    pub fn new(layout: &BucketLayout) -> Self {
        Self {
            hits: 0,
            sum: 0.0,
            mean: 0.0,
            sum_of_squares: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            buckets: vec![0; layout.count()],
        }
    }

    /// Adds one observation.
    #[allow(clippy::cast_precision_loss)]
    pub fn update(&mut self, value: f64, layout: &BucketLayout) {
        self.hits += 1;
        let delta = value - self.mean;
        self.mean += delta / self.hits as f64;
        self.sum_of_squares += delta * (value - self.mean);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.buckets[layout.bucket_index(value)] += 1;
    }

    /// Folds another record built with the same layout into this one.
    #[allow(clippy::cast_precision_loss)]
    pub fn merge(&mut self, other: &Self) {
        if other.hits == 0 {
            return;
        }
        if self.hits == 0 {
            self.clone_from(other);
            return;
        }
        let n_a = self.hits as f64;
        let n_b = other.hits as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / n;
        self.sum_of_squares += other.sum_of_squares + delta * delta * n_a * n_b / n;
        self.hits += other.hits;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        for (mine, theirs) in self.buckets.iter_mut().zip(&other.buckets) {
            *mine += theirs;
        }
    }

    pub const fn hits(&self) -> u64 {
        self.hits
    }

    pub const fn sum(&self) -> f64 {
        self.sum
    }

    pub const fn mean(&self) -> f64 {
        self.mean
    }

    pub const fn min(&self) -> f64 {
        self.min
    }

    pub const fn max(&self) -> f64 {
        self.max
    }

    /// Sample variance; zero until there are two observations.
    #[allow(clippy::cast_precision_loss)]
    pub fn variance(&self) -> f64 {
        if self.hits > 1 {
            self.sum_of_squares / (self.hits - 1) as f64
        } else {
            0.0
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Index of the first bucket where the cumulative share of hits exceeds
    /// `percent`. Above 100% the last populated bucket is returned.
    #[allow(clippy::cast_precision_loss)]
    fn percentile_index(&self, percent: f64) -> Option<usize> {
        if self.hits == 0 {
            return None;
        }
        let threshold = percent / 100.0;
        let total = self.hits as f64;
        let mut cumulative = 0u64;
        let mut last_populated = None;
        for (index, &count) in self.buckets.iter().enumerate() {
            if count == 0 {
                continue;
            }
            cumulative += count;
            last_populated = Some(index);
            if cumulative as f64 / total > threshold {
                return Some(index);
            }
        }
        last_populated
    }

    /// Estimated value below which `percent` percent of observations fall.
    pub fn percentile(&self, percent: f64, edge: Edge, layout: &BucketLayout) -> f64 {
        self.percentile_index(percent)
            .map_or(0.0, |index| layout.edge(index, edge))
    }

    pub fn median(&self, layout: &BucketLayout) -> f64 {
        self.percentile(50.0, Edge::Average, layout)
    }

    /// Symmetric range expected to hold `percent` percent of observations.
    pub fn percentile_interval(&self, percent: f64, layout: &BucketLayout) -> (f64, f64) {
        let tail = (100.0 - percent) / 2.0;
        (
            self.percentile(tail, Edge::Lower, layout),
            self.percentile(100.0 - tail, Edge::Upper, layout),
        )
    }

    /// Snapshot for structured export.
    pub fn snapshot(&self, interval: f64, layout: &BucketLayout) -> serde_json::Value {
        let (low, high) = self.percentile_interval(interval, layout);
        json!({
            "hits": self.hits,
            "sum": self.sum,
            "mean": self.mean,
            "stddev": self.stddev(),
            "min": self.min,
            "max": self.max,
            "median": self.median(layout),
            "percentile_interval": [low, high],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_of(values: &[f64], layout: &BucketLayout) -> NumericStats {
        let mut stats = NumericStats::new(layout);
        for &v in values {
            stats.update(v, layout);
        }
        stats
    }

    #[test]
    fn every_bucket_round_trips_its_representative() {
        let layout = BucketLayout::default();
        for i in 0..layout.count() {
            assert_eq!(layout.bucket_index(layout.representative(i)), i, "bucket {i}");
        }
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let layout = BucketLayout::default();
        assert_eq!(layout.bucket_index(0.0), 0);
        assert_eq!(layout.bucket_index(-3.0), 0);
        assert_eq!(layout.bucket_index(1e-9), 0);
        assert_eq!(layout.bucket_index(1e9), 999);
        assert_eq!(layout.bucket_index(1e12), 999);
        assert_eq!(layout.bucket_index(f64::NAN), 0);
    }

    #[test]
    fn bounds_invert_the_log_transform() {
        let layout = BucketLayout::default();
        assert!((layout.lower_bound(0) - 1e-6).abs() < 1e-15);
        assert!((layout.upper_bound(999) - 1e9).abs() / 1e9 < 1e-9);
        for i in [0, 10, 500, 998] {
            assert!((layout.upper_bound(i) - layout.lower_bound(i + 1)).abs() < 1e-9 * layout.upper_bound(i));
        }
    }

    #[test]
    fn one_to_five_scenario() {
        let layout = BucketLayout::default();
        let stats = stats_of(&[1.0, 2.0, 3.0, 4.0, 5.0], &layout);
        assert_eq!(stats.hits(), 5);
        assert!((stats.sum() - 15.0).abs() < 1e-12);
        assert!((stats.mean() - 3.0).abs() < 1e-12);
        assert!((stats.stddev() - 1.581_138_830_084_19).abs() < 1e-9);
        assert!((stats.min() - 1.0).abs() < f64::EPSILON);
        assert!((stats.max() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn moments_do_not_depend_on_order() {
        let layout = BucketLayout::default();
        let values = [0.5, 12.0, 3.25, 1e-3, 7.0, 7.0, 250.0, 0.04];
        let mut reversed = values;
        reversed.reverse();
        let mut shuffled = values;
        shuffled.swap(0, 5);
        shuffled.swap(2, 7);
        let a = stats_of(&values, &layout);
        for other in [stats_of(&reversed, &layout), stats_of(&shuffled, &layout)] {
            assert_eq!(a.hits(), other.hits());
            assert!((a.sum() - other.sum()).abs() < 1e-9);
            assert!((a.mean() - other.mean()).abs() < 1e-9);
            assert!((a.stddev() - other.stddev()).abs() < 1e-9);
            assert_eq!(a.buckets, other.buckets);
        }
    }

    #[test]
    fn single_value_has_zero_variance() {
        let layout = BucketLayout::default();
        let stats = stats_of(&[42.0], &layout);
        assert!(stats.variance().abs() < f64::EPSILON);
    }

    #[test]
    fn percentiles_walk_the_buckets() {
        let layout = BucketLayout::default();
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let stats = stats_of(&values, &layout);

        let median = stats.median(&layout);
        assert!((median - 50.0).abs() / 50.0 < 0.05, "median {median}");

        let p90 = stats.percentile(90.0, Edge::Average, &layout);
        assert!((p90 - 90.0).abs() / 90.0 < 0.05, "p90 {p90}");

        let (low, high) = stats.percentile_interval(90.0, &layout);
        assert!(low <= 5.0 && low > 4.0, "low {low}");
        assert!(high >= 95.0 && high < 97.0, "high {high}");

        let max = stats.percentile(100.0, Edge::Upper, &layout);
        assert!(max >= 100.0 && max < 104.0, "max {max}");
    }

    #[test]
    fn empty_stats_report_zero_percentiles() {
        let layout = BucketLayout::default();
        let stats = NumericStats::new(&layout);
        assert!(stats.median(&layout).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_matches_sequential_updates() {
        let layout = BucketLayout::default();
        let left = [1.0, 2.0, 3.0];
        let right = [4.0, 5.0, 60.0, 0.25];
        let mut merged = stats_of(&left, &layout);
        merged.merge(&stats_of(&right, &layout));
        let all: Vec<f64> = left.iter().chain(&right).copied().collect();
        let sequential = stats_of(&all, &layout);

        assert_eq!(merged.hits(), sequential.hits());
        assert!((merged.mean() - sequential.mean()).abs() < 1e-9);
        assert!((merged.stddev() - sequential.stddev()).abs() < 1e-9);
        assert!((merged.min() - 0.25).abs() < f64::EPSILON);
        assert!((merged.max() - 60.0).abs() < f64::EPSILON);
        assert_eq!(merged.buckets, sequential.buckets);

        let mut empty = NumericStats::new(&layout);
        empty.merge(&sequential);
        assert_eq!(empty, sequential);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        let bad = |buckets, min, max| {
            BucketLayout::new(HistogramConfig {
                buckets,
                min_bucket_value: min,
                max_bucket_value: max,
            })
        };
        assert_eq!(bad(0, 1e-6, 1e9), Err(HistogramError::NoBuckets));
        assert_eq!(
            bad(10, 0.0, 1e9),
            Err(HistogramError::InvalidRange { min: 0.0, max: 1e9 })
        );
        assert!(matches!(
            bad(10, 5.0, 1.0),
            Err(HistogramError::InvalidRange { .. })
        ));
        assert!(matches!(
            bad(10, f64::NAN, 1.0),
            Err(HistogramError::InvalidRange { .. })
        ));
        assert!(bad(10, 1.0, 1000.0).is_ok());
    }
}
