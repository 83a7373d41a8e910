//! Histogram with fixed log-scale buckets, exported as VictoriaMetrics
//! `vmrange` series.
//!
//! Every decade between `1e-9` and `1e18` is split into 18 buckets. Values
//! below the first bound land in `0...1.000e-09`, values past the last in
//! `1.000e+18...+Inf`.

use parking_lot::Mutex;
use std::sync::LazyLock;

const E10_MIN: i32 = -9;
const E10_MAX: i32 = 18;
const BUCKETS_PER_DECIMAL: usize = 18;
const BUCKETS_COUNT: usize = (E10_MAX - E10_MIN) as usize * BUCKETS_PER_DECIMAL;

static BUCKET_RANGES: LazyLock<Vec<String>> = LazyLock::new(|| {
    let multiplier = 10f64.powf(1.0 / BUCKETS_PER_DECIMAL as f64);
    let mut value = 10f64.powi(E10_MIN);
    let mut start = format_bound(value);
    (0..BUCKETS_COUNT)
        .map(|_| {
            value *= multiplier;
            let end = format_bound(value);
            let range = format!("{start}...{end}");
            start = end;
            range
        })
        .collect()
});

static LOWER_RANGE: LazyLock<String> =
    LazyLock::new(|| format!("0...{}", format_bound(10f64.powi(E10_MIN))));

static UPPER_RANGE: LazyLock<String> =
    LazyLock::new(|| format!("{}...+Inf", format_bound(10f64.powi(E10_MAX))));

/// `d.ddde±XX`, the bound format VictoriaMetrics uses for `vmrange` labels.
fn format_bound(value: f64) -> String {
    let formatted = format!("{value:.3e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

#[derive(Debug)]
struct HistogramState {
    buckets: Box<[u64; BUCKETS_COUNT]>,
    lower: u64,
    upper: u64,
    sum: f64,
    count: u64,
}

impl Default for HistogramState {
    fn default() -> Self {
        Self {
            buckets: Box::new([0; BUCKETS_COUNT]),
            lower: 0,
            upper: 0,
            sum: 0.0,
            count: 0,
        }
    }
}

/// Point-in-time view of a [`Histogram`]: non-empty buckets in ascending
/// order, plus the running sum and count.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<(&'static str, u64)>,
    pub sum: f64,
    pub count: u64,
}

/// Histogram for non-negative values. Negative and NaN observations are
/// dropped.
#[derive(Debug, Default)]
pub struct Histogram {
    state: Mutex<HistogramState>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, value: f64) {
        if value.is_nan() || value < 0.0 {
            return;
        }

        let index = (value.log10() - f64::from(E10_MIN)) * BUCKETS_PER_DECIMAL as f64;
        let mut state = self.state.lock();
        state.sum += value;
        state.count += 1;
        if index < 0.0 {
            state.lower += 1;
        } else if index >= BUCKETS_COUNT as f64 {
            state.upper += 1;
        } else {
            state.buckets[index as usize] += 1;
        }
    }

    /// Observe the seconds elapsed since `start`.
    pub fn observe_since(&self, start: std::time::Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    pub fn reset(&self) {
        *self.state.lock() = HistogramState::default();
    }

    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    pub fn sum(&self) -> f64 {
        self.state.lock().sum
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock();
        let mut buckets = Vec::new();
        if state.lower > 0 {
            buckets.push((LOWER_RANGE.as_str(), state.lower));
        }
        buckets.extend(
            state
                .buckets
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(index, count)| (BUCKET_RANGES[index].as_str(), *count)),
        );
        if state.upper > 0 {
            buckets.push((UPPER_RANGE.as_str(), state.upper));
        }

        HistogramSnapshot {
            buckets,
            sum: state.sum,
            count: state.count,
        }
    }
}
