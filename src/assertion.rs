//! Pass/fail thresholds evaluated once against the final [`RunStats`].
//!
//! Response times are compared in milliseconds, success rates in percent and
//! counts as plain numbers. An assertion over a metric that has no value
//! (no latency samples, no requests, or an unknown step) never passes.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::{LatencyStats, RunStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Step(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatMetric {
    MaxResponseTime,
    MinResponseTime,
    MeanResponseTime,
    Percentile(f64),
    SuccessRate,
    FailedRequests,
    RequestCount,
}

impl StatMetric {
    fn read(&self, stats: &LatencyStats) -> Option<f64> {
        let millis = |d: std::time::Duration| d.as_nanos() as f64 / 1e6;
        match self {
            StatMetric::MaxResponseTime => stats.max().map(millis),
            StatMetric::MinResponseTime => stats.min().map(millis),
            StatMetric::MeanResponseTime => stats.mean().map(millis),
            StatMetric::Percentile(p) => stats.percentile(*p).map(millis),
            StatMetric::SuccessRate => stats.success_rate(),
            StatMetric::FailedRequests => Some(stats.failures() as f64),
            StatMetric::RequestCount => Some(stats.requests() as f64),
        }
    }
}

impl fmt::Display for StatMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatMetric::MaxResponseTime => f.write_str("max response time"),
            StatMetric::MinResponseTime => f.write_str("min response time"),
            StatMetric::MeanResponseTime => f.write_str("mean response time"),
            StatMetric::Percentile(p) => write!(f, "p{p} response time"),
            StatMetric::SuccessRate => f.write_str("success rate"),
            StatMetric::FailedRequests => f.write_str("failed requests"),
            StatMetric::RequestCount => f.write_str("request count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparator {
    pub fn holds(&self, actual: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => actual < threshold,
            Comparator::Lte => actual <= threshold,
            Comparator::Gt => actual > threshold,
            Comparator::Gte => actual >= threshold,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
        }
    }
}

/// `{scope, metric, comparator, threshold}`.
///
/// # Example
/// ```rust
/// use volley::assertion::Assertion;
///
/// let assertions = [
///     Assertion::global().success_rate().gt(99.0),
///     Assertion::global().max_response_time().lt(1000.0),
///     Assertion::step("checkout").mean_response_time().lt(200.0),
/// ];
/// assert_eq!(assertions.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(default = "global_scope")]
    pub scope: Scope,
    pub metric: StatMetric,
    pub comparator: Comparator,
    pub threshold: f64,
}

fn global_scope() -> Scope {
    Scope::Global
}

impl Assertion {
    pub fn global() -> AssertionScope {
        AssertionScope(Scope::Global)
    }

    pub fn step(name: impl Into<String>) -> AssertionScope {
        AssertionScope(Scope::Step(name.into()))
    }

    /// Evaluate against `stats` without touching them.
    pub fn evaluate(&self, stats: &RunStats) -> AssertionResult {
        let target = match &self.scope {
            Scope::Global => Some(&stats.global),
            Scope::Step(name) => stats.step(name),
        };
        let actual = target.and_then(|s| self.metric.read(s));
        AssertionResult {
            assertion: self.clone(),
            actual,
            passed: actual.is_some_and(|a| self.comparator.holds(a, self.threshold)),
        }
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Global => f.write_str("global: ")?,
            Scope::Step(name) => write!(f, "{name}: ")?,
        }
        write!(
            f,
            "{} {} {}",
            self.metric,
            self.comparator.symbol(),
            self.threshold
        )
    }
}

/// Picks the metric of an assertion under construction.
#[derive(Debug, Clone)]
pub struct AssertionScope(Scope);

impl AssertionScope {
    pub fn metric(self, metric: StatMetric) -> AssertionMetric {
        AssertionMetric {
            scope: self.0,
            metric,
        }
    }

    pub fn max_response_time(self) -> AssertionMetric {
        self.metric(StatMetric::MaxResponseTime)
    }

    pub fn min_response_time(self) -> AssertionMetric {
        self.metric(StatMetric::MinResponseTime)
    }

    pub fn mean_response_time(self) -> AssertionMetric {
        self.metric(StatMetric::MeanResponseTime)
    }

    pub fn percentile(self, p: f64) -> AssertionMetric {
        self.metric(StatMetric::Percentile(p))
    }

    pub fn success_rate(self) -> AssertionMetric {
        self.metric(StatMetric::SuccessRate)
    }

    pub fn failed_requests(self) -> AssertionMetric {
        self.metric(StatMetric::FailedRequests)
    }

    pub fn request_count(self) -> AssertionMetric {
        self.metric(StatMetric::RequestCount)
    }
}

/// Picks the comparator and threshold of an assertion under construction.
#[derive(Debug, Clone)]
pub struct AssertionMetric {
    scope: Scope,
    metric: StatMetric,
}

impl AssertionMetric {
    pub fn compare(self, comparator: Comparator, threshold: f64) -> Assertion {
        Assertion {
            scope: self.scope,
            metric: self.metric,
            comparator,
            threshold,
        }
    }

    pub fn lt(self, threshold: f64) -> Assertion {
        self.compare(Comparator::Lt, threshold)
    }

    pub fn lte(self, threshold: f64) -> Assertion {
        self.compare(Comparator::Lte, threshold)
    }

    pub fn gt(self, threshold: f64) -> Assertion {
        self.compare(Comparator::Gt, threshold)
    }

    pub fn gte(self, threshold: f64) -> Assertion {
        self.compare(Comparator::Gte, threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub assertion: Assertion,
    /// `None` when the metric had no value to compare.
    pub actual: Option<f64>,
    pub passed: bool,
}

impl fmt::Display for AssertionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "OK" } else { "KO" };
        match self.actual {
            Some(actual) => write!(f, "[{mark}] {} (actual {actual})", self.assertion),
            None => write!(f, "[{mark}] {} (no data)", self.assertion),
        }
    }
}

/// Per-assertion results and their conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub results: Vec<AssertionResult>,
    pub passed: bool,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{result}")?;
        }
        write!(f, "{}", if self.passed { "PASSED" } else { "FAILED" })
    }
}

/// Evaluate every assertion independently. No assertions means a pass.
pub fn evaluate(assertions: &[Assertion], stats: &RunStats) -> Verdict {
    let results: Vec<_> = assertions.iter().map(|a| a.evaluate(stats)).collect();
    let passed = results.iter().all(|r| r.passed);
    Verdict { results, passed }
}
