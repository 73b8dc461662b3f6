use std::{sync::Arc, time::Duration};

/// A `Metric` represents a single observed measurement produced by a virtual user.
///
/// Metrics are the most granular level of data in a run. They are collected and
/// summarized by an [`crate::Aggregate`], then turned into a [`crate::Report`].
///
/// Metrics must be comparable, `Send`, `Sync` and `Clone` so they can travel
/// between user tasks and the shared aggregator.
///
/// ## Example
/// ```rust
/// use volley::Metric;
/// use std::time::Duration;
///
/// #[derive(Clone, PartialOrd, PartialEq)]
/// struct MyMetric {
///     latency: Duration,
///     success: bool,
/// }
/// impl Metric for MyMetric {}
/// ```
pub trait Metric
where
    Self: PartialOrd + PartialEq + Send + Sync + Clone,
{
}

/// The outcome of one request step executed by one virtual user.
///
/// `latency` is `None` when no response was ever received (transport error or
/// an unrenderable request). Such samples count as failures but do not feed
/// latency statistics.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct StepMetric {
    pub step: Arc<str>,
    pub latency: Option<Duration>,
    pub success: bool,
}

impl StepMetric {
    pub fn completed(step: Arc<str>, latency: Duration, success: bool) -> Self {
        Self {
            step,
            latency: Some(latency),
            success,
        }
    }

    pub fn unanswered(step: Arc<str>) -> Self {
        Self {
            step,
            latency: None,
            success: false,
        }
    }
}

impl Metric for StepMetric {}
