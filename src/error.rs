use thiserror::Error;

use crate::{
    config::ConfigError, feeder::FeederExhausted, profile::ProfileError, transport::TransportError,
};

/// Why a virtual user stopped before the end of its scenario.
///
/// These never escape the user that hit them; they end up as counts in the
/// run statistics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("no session value bound to `{0}`")]
    UnresolvedVariable(String),
    #[error(transparent)]
    FeederExhausted(#[from] FeederExhausted),
    #[error("request `{step}` failed: {source}")]
    Transport {
        step: String,
        #[source]
        source: TransportError,
    },
    #[error("request `{step}` failed its checks")]
    CheckFailed { step: String },
}

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid injection profile: {0}")]
    Profile(#[from] ProfileError),
    #[error("invalid run configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("scenario `{0}` has no steps")]
    EmptyScenario(String),
}
