//! Client-side aggregation: function naming, bucketed downsampling with a count column,
//! and step interpolation of raw columns.

use crate::error::DbError;
use crate::types::{Timestamp, Value};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregation function applied per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Sum,
    Sqr,
    Min,
    Max,
    Avg,
    First,
    Last,
    Stddev,
    Stdvar,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 10] = [
        AggregateFunction::Count,
        AggregateFunction::Sum,
        AggregateFunction::Sqr,
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Avg,
        AggregateFunction::First,
        AggregateFunction::Last,
        AggregateFunction::Stddev,
        AggregateFunction::Stdvar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Sqr => "sqr",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Avg => "avg",
            AggregateFunction::First => "first",
            AggregateFunction::Last => "last",
            AggregateFunction::Stddev => "stddev",
            AggregateFunction::Stdvar => "stdvar",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateFunction {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| DbError::InvalidQuery(format!("unknown aggregation function '{}'", s)))
    }
}

/// How a raw column is sampled at step boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolator {
    /// Only samples exactly on the step boundary.
    None,
    /// First sample at or after the boundary.
    #[default]
    Next,
    /// Last sample at or before the boundary.
    Prev,
    /// Linear interpolation between the surrounding samples.
    Linear,
}

impl FromStr for Interpolator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "next" => Ok(Interpolator::Next),
            "none" => Ok(Interpolator::None),
            "prev" => Ok(Interpolator::Prev),
            "linear" => Ok(Interpolator::Linear),
            other => Err(DbError::InvalidQuery(format!(
                "unknown interpolation type '{}'",
                other
            ))),
        }
    }
}

/// Running summary of the samples that fell into one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub count: u64,
    pub sum: Value,
    pub sqr: Value,
    pub min: Value,
    pub max: Value,
    pub first: Value,
    pub last: Value,
}

impl Aggregate {
    pub fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sqr: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            first: f64::NAN,
            last: f64::NAN,
        }
    }

    /// Accumulates one value; NaN ("no data") is ignored.
    pub fn accumulate(&mut self, v: Value) {
        if v.is_nan() {
            return;
        }
        if self.count == 0 {
            self.first = v;
        }
        self.count += 1;
        self.sum += v;
        self.sqr += v * v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.last = v;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self, function: AggregateFunction) -> Value {
        let n = self.count as Value;
        match function {
            AggregateFunction::Count => n,
            AggregateFunction::Sum => self.sum,
            AggregateFunction::Sqr => self.sqr,
            _ if self.count == 0 => f64::NAN,
            AggregateFunction::Min => self.min,
            AggregateFunction::Max => self.max,
            AggregateFunction::Avg => self.sum / n,
            AggregateFunction::First => self.first,
            AggregateFunction::Last => self.last,
            AggregateFunction::Stdvar => self.stdvar(),
            AggregateFunction::Stddev => self.stdvar().sqrt(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn stdvar(&self) -> Value {
        if self.count < 2 {
            return f64::NAN;
        }
        let n = self.count as Value;
        ((n * self.sqr - self.sum * self.sum) / (n * (n - 1.0))).max(0.0)
    }
}

/// Upper bound on the number of buckets one series is split into.
pub const MAX_BUCKETS: usize = 1 << 20;

fn check_layout(step: i64, window: Option<i64>) -> Result<(), DbError> {
    if step < 0 {
        return Err(DbError::InvalidQuery(format!("negative step {}", step)));
    }
    if let Some(w) = window {
        if w <= 0 {
            return Err(DbError::InvalidQuery(format!("window must be > 0, got {}", w)));
        }
    }
    Ok(())
}

/// Bucket layout of one query: `count` buckets starting at `mint`, `step` apart.
///
/// Without a window each bucket covers `[start, start + step)`; with a window `w` it
/// covers the trailing range `(start + step - w, start + step]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buckets {
    pub mint: Timestamp,
    pub step: i64,
    pub count: usize,
    pub window: Option<i64>,
}

impl Buckets {
    /// Buckets covering `[mint, maxt]`. A zero step yields one bucket over the range.
    ///
    /// Fails with [`DbError::InvalidQuery`] when the range would need more than
    /// [`MAX_BUCKETS`] buckets.
    pub fn new(
        mint: Timestamp,
        maxt: Timestamp,
        step: i64,
        window: Option<i64>,
    ) -> Result<Self, DbError> {
        check_layout(step, window)?;
        if step == 0 {
            let width = maxt
                .checked_sub(mint)
                .and_then(|span| span.checked_add(1))
                .unwrap_or(Timestamp::MAX);
            return Ok(Self {
                mint,
                step: width,
                count: 1,
                window,
            });
        }
        let count = maxt
            .checked_sub(mint)
            .and_then(|span| usize::try_from(span / step).ok())
            .and_then(|n| n.checked_add(1))
            .filter(|&n| n <= MAX_BUCKETS)
            .ok_or_else(|| {
                DbError::InvalidQuery(format!(
                    "range [{}, {}] at step {} needs more than {} buckets",
                    mint, maxt, step, MAX_BUCKETS
                ))
            })?;
        Ok(Self {
            mint,
            step,
            count,
            window,
        })
    }

    /// The buckets of the `[mint, maxt]` grid that can hold samples timed within
    /// `extent` (first, last), plus a margin of one step or one window on each side.
    /// Bucket starts stay aligned to `mint`. No extent means no buckets.
    pub fn around(
        mint: Timestamp,
        maxt: Timestamp,
        step: i64,
        window: Option<i64>,
        extent: Option<(Timestamp, Timestamp)>,
    ) -> Result<Self, DbError> {
        if step == 0 {
            return Self::new(mint, maxt, step, window);
        }
        check_layout(step, window)?;
        let empty = Self {
            mint,
            step,
            count: 0,
            window,
        };
        let (first, last) = match extent {
            Some(e) => e,
            None => return Ok(empty),
        };
        let margin = step.max(window.unwrap_or(0));
        let lo = first.saturating_sub(margin).max(mint);
        let hi = last.saturating_add(margin).min(maxt);
        if lo > hi {
            return Ok(empty);
        }
        // mint <= start <= lo, so the aligned start fits in a Timestamp.
        let skipped = (lo as i128 - mint as i128) / step as i128;
        let start = (mint as i128 + skipped * step as i128) as Timestamp;
        Self::new(start, hi, step, window)
    }

    pub fn start_times(&self) -> Vec<Timestamp> {
        (0..self.count)
            .map(|i| self.mint.saturating_add(self.step.saturating_mul(i as i64)))
            .collect()
    }

    /// Index range of `samples` (sorted by time) that falls into bucket `i`.
    fn sample_range(&self, samples: &[(Timestamp, Value)], i: usize) -> (usize, usize) {
        let start = self.mint.saturating_add(self.step.saturating_mul(i as i64));
        let end = start.saturating_add(self.step);
        match self.window {
            None => (
                samples.partition_point(|&(t, _)| t < start),
                samples.partition_point(|&(t, _)| t < end),
            ),
            Some(w) => {
                let from = end.saturating_sub(w);
                (
                    samples.partition_point(|&(t, _)| t <= from),
                    samples.partition_point(|&(t, _)| t <= end),
                )
            }
        }
    }

    /// Summarises `samples` (sorted by time) into one [`Aggregate`] per bucket.
    pub fn aggregate(&self, samples: &[(Timestamp, Value)]) -> Vec<Aggregate> {
        (0..self.count)
            .map(|i| {
                let (lo, hi) = self.sample_range(samples, i);
                let mut agg = Aggregate::empty();
                for &(_, v) in &samples[lo..hi.max(lo)] {
                    agg.accumulate(v);
                }
                agg
            })
            .collect()
    }
}

/// Samples a raw series (sorted by time) at `times`. Cells with no sample within
/// `tolerance` of the boundary are NaN.
pub fn interpolate(
    samples: &[(Timestamp, Value)],
    times: &[Timestamp],
    interpolator: Interpolator,
    tolerance: i64,
) -> Vec<Value> {
    times
        .iter()
        .map(|&t| {
            let next_idx = samples.partition_point(|&(ts, _)| ts < t);
            let next = samples.get(next_idx).filter(|&&(ts, _)| ts - t <= tolerance);
            let prev = samples[..next_idx]
                .last()
                .filter(|&&(ts, _)| t - ts <= tolerance);
            let exact = next.filter(|&&(ts, _)| ts == t);
            match interpolator {
                Interpolator::None => exact.map_or(f64::NAN, |&(_, v)| v),
                Interpolator::Next => next.map_or(f64::NAN, |&(_, v)| v),
                Interpolator::Prev => exact.or(prev).map_or(f64::NAN, |&(_, v)| v),
                Interpolator::Linear => match (exact, prev, next) {
                    (Some(&(_, v)), _, _) => v,
                    (None, Some(&(t0, v0)), Some(&(t1, v1))) => {
                        v0 + (v1 - v0) * ((t - t0) as Value) / ((t1 - t0) as Value)
                    }
                    _ => f64::NAN,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_names_parse_and_display() {
        for f in AggregateFunction::ALL {
            assert_eq!(f.as_str().parse::<AggregateFunction>().unwrap(), f);
        }
        assert_eq!(" AVG ".parse::<AggregateFunction>().unwrap(), AggregateFunction::Avg);
        assert!(matches!(
            "median".parse::<AggregateFunction>(),
            Err(DbError::InvalidQuery(_))
        ));
    }

    #[test]
    fn aggregate_ignores_nan_and_reports_empty() {
        let mut agg = Aggregate::empty();
        assert!(agg.value(AggregateFunction::Avg).is_nan());
        assert_eq!(agg.value(AggregateFunction::Count), 0.0);
        for v in [2.0, f64::NAN, 4.0] {
            agg.accumulate(v);
        }
        assert_eq!(agg.value(AggregateFunction::Count), 2.0);
        assert_eq!(agg.value(AggregateFunction::Avg), 3.0);
        assert_eq!(agg.value(AggregateFunction::Sqr), 20.0);
        assert_eq!(agg.value(AggregateFunction::First), 2.0);
        assert_eq!(agg.value(AggregateFunction::Stdvar), 2.0);
    }

    #[test]
    fn buckets_cover_range_with_empty_gaps() {
        let b = Buckets::new(0, 29, 10, None).unwrap();
        assert_eq!(b.start_times(), vec![0, 10, 20]);
        let aggs = b.aggregate(&[(1, 1.0), (5, 2.0), (25, 3.0)]);
        let counts: Vec<u64> = aggs.iter().map(|a| a.count).collect();
        assert_eq!(counts, vec![2, 0, 1]);
        assert_eq!(aggs[0].value(AggregateFunction::Sum), 3.0);
    }

    #[test]
    fn zero_step_is_a_single_bucket() {
        let b = Buckets::new(100, 100, 0, None).unwrap();
        assert_eq!(b.count, 1);
        assert_eq!(b.aggregate(&[(100, 7.0)])[0].count, 1);
    }

    #[test]
    fn zero_step_over_the_whole_timeline_is_one_bucket() {
        assert_eq!(Buckets::new(0, i64::MAX, 0, None).unwrap().count, 1);
        let b = Buckets::new(i64::MIN, i64::MAX, 0, None).unwrap();
        assert_eq!(b.count, 1);
        assert_eq!(b.start_times(), vec![i64::MIN]);
    }

    #[test]
    fn oversized_grids_are_rejected() {
        for (mint, maxt, step) in [(0, i64::MAX, 1000), (i64::MIN, i64::MAX, 1)] {
            assert!(matches!(
                Buckets::new(mint, maxt, step, None),
                Err(DbError::InvalidQuery(_))
            ));
        }
        let at_limit = Buckets::new(0, MAX_BUCKETS as i64 - 1, 1, None).unwrap();
        assert_eq!(at_limit.count, MAX_BUCKETS);
    }

    #[test]
    fn grid_around_samples_stays_aligned() {
        let b = Buckets::around(0, i64::MAX, 1000, None, Some((2_500, 4_200))).unwrap();
        assert_eq!(b.start_times(), vec![1_000, 2_000, 3_000, 4_000, 5_000]);
        let aggs = b.aggregate(&[(2_500, 1.0), (4_200, 2.0)]);
        let counts: Vec<u64> = aggs.iter().map(|a| a.count).collect();
        assert_eq!(counts, vec![0, 1, 0, 1, 0]);

        // Clamped to the requested range on both sides.
        let b = Buckets::around(0, 3_000, 1000, None, Some((500, 2_900))).unwrap();
        assert_eq!(b.start_times(), vec![0, 1_000, 2_000, 3_000]);

        // A window widens the margin so trailing ranges still see every sample.
        let b = Buckets::around(0, 100_000, 10, Some(50), Some((1_000, 1_000))).unwrap();
        assert_eq!(b.mint, 950);
        let hits = b.aggregate(&[(1_000, 1.0)]).iter().filter(|a| a.count == 1).count();
        assert_eq!(hits, 5);

        assert_eq!(Buckets::around(0, 100, 10, None, None).unwrap().count, 0);
    }

    #[test]
    fn window_aggregates_trailing_range() {
        let b = Buckets::new(0, 20, 10, Some(20)).unwrap();
        // Bucket 1 ends at 20 and looks back to (0, 20].
        let aggs = b.aggregate(&[(0, 1.0), (5, 2.0), (15, 3.0), (25, 4.0)]);
        assert_eq!(aggs[1].count, 2);
        assert_eq!(aggs[1].value(AggregateFunction::Sum), 5.0);
    }

    #[test]
    fn interpolation_modes() {
        let samples = [(10, 1.0), (20, 3.0)];
        let times = [10, 15, 30];
        let next = interpolate(&samples, &times, Interpolator::Next, 10);
        assert_eq!(next[0], 1.0);
        assert_eq!(next[1], 3.0);
        assert!(next[2].is_nan());

        let prev = interpolate(&samples, &times, Interpolator::Prev, 10);
        assert_eq!(prev, vec![1.0, 1.0, 3.0]);

        let linear = interpolate(&samples, &times, Interpolator::Linear, 10);
        assert_eq!(linear[1], 2.0);

        let none = interpolate(&samples, &times, Interpolator::None, 10);
        assert_eq!(none[0], 1.0);
        assert!(none[1].is_nan());
    }
}
