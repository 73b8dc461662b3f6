use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use crate::aggregate::{Aggregate, LatencyStats, RunStats, UserTally};

/// A [`Report`] represents the processed form of an [`Aggregate`].
///
/// Reports transform aggregated data into final figures such as means,
/// percentiles and ratios. They are pure data: no I/O, deterministic, and
/// serializable so a [`Reporter`] can ship them anywhere.
///
/// Implementors define how to construct the report from an [`Aggregate`] via
/// a [`From<A>`] implementation.
///
/// See also: [`Reporter`].
pub trait Report<A>
where
    Self: Send + Sync + Debug + From<A> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// A [`Reporter`] consumes a [`Report`] and performs side effects: displaying it,
/// sending it to a service, or persisting it somewhere.
///
/// # Example
/// ```rust
/// use volley::{Aggregate, Report, Reporter};
/// struct MyReporter;
/// impl<A: Aggregate, R: Report<A>> Reporter<A, R> for MyReporter {
///     async fn report(&self, report: &R) -> Result<(), Box<dyn std::error::Error>> {
///         println!("{:?}", report);
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter<A: Aggregate, R: Report<A>> {
    fn report(&self, report: &R) -> impl Future<Output = Result<(), Box<dyn std::error::Error>>>;
}

/// Final figures for one step, or for the whole run. Times are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

fn millis(d: Option<Duration>) -> Option<f64> {
    d.map(|d| d.as_nanos() as f64 / 1e6)
}

impl From<&LatencyStats> for StatsReport {
    fn from(s: &LatencyStats) -> Self {
        Self {
            requests: s.requests(),
            successes: s.successes(),
            failures: s.failures(),
            success_rate: s.success_rate(),
            min: millis(s.min()),
            max: millis(s.max()),
            mean: millis(s.mean()),
            p50: millis(s.percentile(50.0)),
            p75: millis(s.percentile(75.0)),
            p95: millis(s.percentile(95.0)),
            p99: millis(s.percentile(99.0)),
        }
    }
}

/// The report of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub global: StatsReport,
    pub steps: BTreeMap<String, StatsReport>,
    pub users: UserTally,
}

impl From<RunStats> for RunReport {
    fn from(stats: RunStats) -> Self {
        Self::from(&stats)
    }
}

impl From<&RunStats> for RunReport {
    fn from(stats: &RunStats) -> Self {
        Self {
            global: StatsReport::from(&stats.global),
            steps: stats
                .steps
                .iter()
                .map(|(name, s)| (name.to_string(), StatsReport::from(s)))
                .collect(),
            users: stats.users,
        }
    }
}

impl Report<RunStats> for RunReport {}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use super::*;

    /// Prints reports to stdout as pretty JSON.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct StdoutReporter;

    impl<A: Aggregate, R: Report<A>> Reporter<A, R> for StdoutReporter {
        async fn report(&self, report: &R) -> Result<(), Box<dyn std::error::Error>> {
            println!("{}", serde_json::to_string_pretty(report)?);
            Ok(())
        }
    }
}
