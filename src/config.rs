use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{assertion::Assertion, utils::duration};

/// Run-wide settings, fixed once the run starts.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use volley::{assertion::Assertion, config::RunConfig};
///
/// let config = RunConfig::builder()
///     .base_url("http://localhost:5000")
///     .deadline(Duration::from_secs(60))
///     .seed(7)
///     .assertions(vec![Assertion::global().success_rate().gt(99.0)])
///     .build()
///     .with_header("accept", "application/json");
///
/// assert_eq!(config.grace_period, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, TypedBuilder, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Prefix for request paths that are not absolute URLs.
    #[builder(default, setter(into))]
    pub base_url: String,
    /// Sent with every request unless the request sets the same header.
    #[builder(default)]
    #[serde(deserialize_with = "header_map")]
    pub headers: Vec<(String, String)>,
    /// Hard stop for dispatching, measured from run start.
    #[builder(default, setter(strip_option))]
    #[serde(deserialize_with = "duration::deserialize_option")]
    pub deadline: Option<Duration>,
    /// How long users still running at the deadline may take to finish their
    /// current step before they are cut off.
    #[builder(default = Duration::from_secs(5))]
    #[serde(deserialize_with = "duration::deserialize")]
    pub grace_period: Duration,
    #[builder(default)]
    pub assertions: Vec<Assertion>,
    /// Seeds every user's pause randomness. OS-seeded when absent.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
    /// Upper bound on concurrently running users. Starts beyond it wait.
    #[builder(default, setter(strip_option))]
    pub max_concurrent_users: Option<usize>,
    /// Lock shards of the metrics aggregator.
    #[builder(default = num_cpus::get() * 4)]
    pub metric_shards: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_concurrent_users must be at least 1")]
    ZeroConcurrencyCap,
}

impl RunConfig {
    /// Reject settings no run could make progress with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_users == Some(0) {
            return Err(ConfigError::ZeroConcurrencyCap);
        }
        Ok(())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn header_map<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, String)>, D::Error> {
    Ok(BTreeMap::<String, String>::deserialize(deserializer)?
        .into_iter()
        .collect())
}
