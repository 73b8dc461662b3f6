use std::{
    collections::BTreeMap,
    fmt::Debug,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::metric::{Metric, StepMetric};

/// The `Aggregate` trait defines how raw [`Metric`] values are collected and combined
/// into an intermediate, mergeable representation that preserves the information
/// necessary for later analysis.
///
/// Aggregates store counts, sums and histograms. Derived values such as
/// percentiles and ratios are computed on demand or by a [`crate::Report`].
///
/// # Implementor notes
/// - `merge` must be **associative** and **commutative** so that merging shard-local
///   aggregates in any order yields the same result.
/// - Keep `consume` cheap: it runs inside the aggregator's critical section.
pub trait Aggregate
where
    Self: Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    ///
    /// This default implementation calls [`Aggregate::consume`] for each metric.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Streaming latency and success statistics for one step, or for the whole run.
///
/// Latencies are kept exactly for min, max and mean, and in a 3-significant-digit
/// microsecond histogram for percentiles.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    requests: u64,
    successes: u64,
    sampled: u64,
    min: Option<Duration>,
    max: Option<Duration>,
    total: Duration,
    histogram: Histogram<u64>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            requests: 0,
            successes: 0,
            sampled: 0,
            min: None,
            max: None,
            total: Duration::ZERO,
            // Auto-resizing, so memory grows with the observed range only.
            histogram: Histogram::new(3).expect("3 significant figures is a valid precision"),
        }
    }
}

impl LatencyStats {
    pub fn record(&mut self, latency: Option<Duration>, success: bool) {
        self.requests += 1;
        if success {
            self.successes += 1;
        }
        let Some(latency) = latency else {
            return;
        };

        self.sampled += 1;
        self.total += latency;
        self.min = Some(self.min.map_or(latency, |m| m.min(latency)));
        self.max = Some(self.max.map_or(latency, |m| m.max(latency)));
        self.histogram
            .saturating_record(latency.as_micros().min(u64::MAX as u128) as u64);
    }

    /// Count a request that never got a response, e.g. a user cut off by the deadline.
    pub fn record_unanswered(&mut self) {
        self.record(None, false);
    }

    pub fn merge(&mut self, other: &Self) {
        self.requests += other.requests;
        self.successes += other.successes;
        self.sampled += other.sampled;
        self.total += other.total;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = self.max.max(other.max);
        if let Err(e) = self.histogram.add(&other.histogram) {
            tracing::warn!("Failed to merge latency histograms: {e:?}");
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.requests - self.successes
    }

    /// Number of requests that contributed a latency sample.
    pub fn sampled(&self) -> u64 {
        self.sampled
    }

    /// Successful requests as a percentage of all requests.
    pub fn success_rate(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.successes as f64 * 100.0 / self.requests as f64)
    }

    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    pub fn mean(&self) -> Option<Duration> {
        (self.sampled > 0)
            .then(|| Duration::from_nanos((self.total.as_nanos() / self.sampled as u128) as u64))
    }

    /// Latency at percentile `p` (0–100), read from the histogram.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        (self.sampled > 0).then(|| {
            let q = (p / 100.0).clamp(0.0, 1.0);
            Duration::from_micros(self.histogram.value_at_quantile(q))
        })
    }
}

/// How a dispatched virtual user ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFate {
    Completed,
    /// Stopped early by a transport error, an unresolved variable, an
    /// exhausted feeder or a failed check with `exit_on_check_failure`.
    Aborted,
    /// Still running when the run deadline hit.
    TimedOut,
    /// The user's task panicked.
    Crashed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTally {
    pub dispatched: u64,
    pub completed: u64,
    pub aborted: u64,
    pub timed_out: u64,
    pub crashed: u64,
    /// Scheduled starts never dispatched because the deadline hit first.
    pub skipped: u64,
}

impl UserTally {
    fn merge(&mut self, other: &Self) {
        self.dispatched += other.dispatched;
        self.completed += other.completed;
        self.aborted += other.aborted;
        self.timed_out += other.timed_out;
        self.crashed += other.crashed;
        self.skipped += other.skipped;
    }
}

/// Everything a run measured: global statistics, a per-step breakdown and
/// how each virtual user ended.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub global: LatencyStats,
    pub steps: BTreeMap<Arc<str>, LatencyStats>,
    pub users: UserTally,
}

impl RunStats {
    pub fn step(&self, name: &str) -> Option<&LatencyStats> {
        self.steps.get(name)
    }

    /// Tally a user's end. Users that never finished count as one failed
    /// request each, with no latency sample.
    pub fn record_user(&mut self, fate: UserFate) {
        match fate {
            UserFate::Completed => self.users.completed += 1,
            UserFate::Aborted => self.users.aborted += 1,
            UserFate::TimedOut => {
                self.users.timed_out += 1;
                self.global.record_unanswered();
            }
            UserFate::Crashed => {
                self.users.crashed += 1;
                self.global.record_unanswered();
            }
        }
    }
}

impl Aggregate for RunStats {
    type Metric = StepMetric;

    fn new() -> Self {
        Self::default()
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.global.record(metric.latency, metric.success);
        self.steps
            .entry(metric.step.clone())
            .or_default()
            .record(metric.latency, metric.success);
    }

    fn merge(&mut self, other: Self) {
        self.global.merge(&other.global);
        for (step, stats) in other.steps {
            self.steps.entry(step).or_default().merge(&stats);
        }
        self.users.merge(&other.users);
    }
}

/// Thread-safe [`RunStats`] collector shared by every virtual user of a run.
///
/// Updates go to one of several lock-guarded shards picked by user id, so
/// concurrent users rarely contend, and each critical section is a single
/// `consume`. [`MetricsAggregator::snapshot`] merges the shards and can be
/// called at any time, including while the run is in progress.
#[derive(Debug)]
pub struct MetricsAggregator {
    shards: Vec<Mutex<RunStats>>,
    active: AtomicUsize,
}

impl MetricsAggregator {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::default()).collect(),
            active: AtomicUsize::new(0),
        }
    }

    fn shard(&self, user_id: u64) -> impl DerefMut<Target = RunStats> + '_ {
        self.shards[(user_id % self.shards.len() as u64) as usize].lock()
    }

    pub fn record(&self, user_id: u64, metric: &StepMetric) {
        self.shard(user_id).consume(metric);
    }

    pub fn record_user(&self, user_id: u64, fate: UserFate) {
        self.shard(user_id).record_user(fate);
    }

    pub fn record_skipped(&self, starts: u64) {
        self.shard(0).users.skipped += starts;
    }

    /// Count a dispatched user and hold the active-users gauge up until the
    /// returned guard is dropped.
    pub fn dispatch(self: &Arc<Self>, user_id: u64) -> ActiveUser {
        self.shard(user_id).users.dispatched += 1;
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveUser {
            metrics: self.clone(),
        }
    }

    /// Users dispatched and not yet terminated.
    pub fn active_users(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RunStats {
        let mut stats = RunStats::new();
        for shard in &self.shards {
            let local = shard.lock().clone();
            stats.merge(local);
        }
        stats
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(num_cpus::get() * 4)
    }
}

/// Keeps one user counted in [`MetricsAggregator::active_users`].
#[derive(Debug)]
pub struct ActiveUser {
    metrics: Arc<MetricsAggregator>,
}

impl Deref for ActiveUser {
    type Target = MetricsAggregator;

    fn deref(&self) -> &Self::Target {
        &self.metrics
    }
}

impl Drop for ActiveUser {
    fn drop(&mut self) {
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
    }
}
