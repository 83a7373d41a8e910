use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_QUANTILES: [f64; 5] = [0.5, 0.9, 0.97, 0.99, 1.0];
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_AGE_BUCKETS: usize = 2;

/// Quantiles over a sliding time window, plus an all-time sum and count.
///
/// Every observation goes into each of `age_buckets` windows. Every
/// `max_age / age_buckets` the oldest window is cleared and moved to the back,
/// and quantiles are read from whichever window is oldest. NaN observations
/// are dropped.
#[derive(Debug)]
pub struct Summary {
    quantiles: Vec<f64>,
    rotation: Duration,
    state: Mutex<SummaryState>,
}

#[derive(Debug)]
struct SummaryState {
    windows: Vec<Vec<f64>>,
    head: usize,
    last_rotation: Instant,
    sum: f64,
    count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    /// `(quantile, value)` in configured order; `NaN` while the window is empty.
    pub quantiles: Vec<(f64, f64)>,
    pub sum: f64,
    pub count: u64,
}

impl Summary {
    /// Callers check `quantiles` and `age_buckets` first; see
    /// [`Summary::validate`].
    pub(crate) fn new(quantiles: Vec<f64>, max_age: Duration, age_buckets: usize) -> Self {
        Self::new_at(quantiles, max_age, age_buckets, Instant::now())
    }

    fn new_at(quantiles: Vec<f64>, max_age: Duration, age_buckets: usize, now: Instant) -> Self {
        let age_buckets = age_buckets.max(1);
        Self {
            quantiles,
            rotation: max_age / age_buckets as u32,
            state: Mutex::new(SummaryState {
                windows: vec![Vec::new(); age_buckets],
                head: 0,
                last_rotation: now,
                sum: 0.0,
                count: 0,
            }),
        }
    }

    /// Quantiles within `[0, 1]`, at least one window and a non-zero age.
    pub(crate) fn validate(
        quantiles: &[f64],
        max_age: Duration,
        age_buckets: usize,
    ) -> Result<(), String> {
        if let Some(q) = quantiles.iter().find(|q| !(0.0..=1.0).contains(*q)) {
            return Err(format!("quantile {q} is outside [0, 1]"));
        }
        if age_buckets == 0 || u32::try_from(age_buckets).is_err() {
            return Err(format!("age_buckets must be in 1..=u32::MAX, got {age_buckets}"));
        }
        if max_age.is_zero() {
            return Err("max_age must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    pub fn observe(&self, value: f64) {
        self.observe_at(value, Instant::now());
    }

    fn observe_at(&self, value: f64, now: Instant) {
        if value.is_nan() {
            return;
        }
        let mut state = self.state.lock();
        self.rotate(&mut state, now);
        state.sum += value;
        state.count += 1;
        for window in &mut state.windows {
            window.push(value);
        }
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> SummarySnapshot {
        let mut state = self.state.lock();
        self.rotate(&mut state, now);

        let mut sorted = state.windows[state.head].clone();
        sorted.sort_unstable_by(f64::total_cmp);

        SummarySnapshot {
            quantiles: self
                .quantiles
                .iter()
                .map(|&q| (q, nearest_rank(&sorted, q)))
                .collect(),
            sum: state.sum,
            count: state.count,
        }
    }

    fn rotate(&self, state: &mut SummaryState, now: Instant) {
        if self.rotation.is_zero() {
            return;
        }
        while now.saturating_duration_since(state.last_rotation) >= self.rotation {
            let head = state.head;
            state.windows[head].clear();
            state.head = (head + 1) % state.windows.len();
            state.last_rotation += self.rotation;
        }
    }
}

fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
