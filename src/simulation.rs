//! Glue: one scenario, one executor, one configuration, one verdict.
use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::{
    aggregate::{MetricsAggregator, RunStats},
    assertion::{self, Verdict},
    config::RunConfig,
    error::RunError,
    executor::{ExecSummary, Executor, RunContext},
    report::RunReport,
    scenario::Scenario,
    transport::Transport,
};

/// A runnable load test.
///
/// # Example
/// ```rust,no_run
/// use std::time::Duration;
/// use volley::{
///     executor::ProfileScheduler,
///     profile::{InjectionProfile, Segment},
///     scenario::{RequestStep, Scenario},
///     transport::HttpTransport,
///     Simulation,
/// };
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let simulation = Simulation::builder()
///     .scenario(
///         Scenario::builder("home")
///             .request(RequestStep::get("home", "http://localhost:5000/")?)
///             .build(),
///     )
///     .executor(
///         ProfileScheduler::builder()
///             .profile(InjectionProfile::new().then(Segment::ramp(10, Duration::from_secs(10))))
///             .build(),
///     )
///     .build();
///
/// let result = simulation.run(HttpTransport::default()).await?;
/// println!("{}", result.verdict);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, TypedBuilder)]
pub struct Simulation<E> {
    #[builder(setter(into))]
    pub scenario: Arc<Scenario>,
    pub executor: E,
    #[builder(default)]
    pub config: RunConfig,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Conjunction of every assertion.
    pub passed: bool,
    pub verdict: Verdict,
    pub stats: RunStats,
    pub report: RunReport,
    pub summary: ExecSummary,
}

impl<E> Simulation<E>
where
    E: Executor,
    RunError: From<E::Error>,
{
    /// Run against `transport` with a fresh aggregator.
    pub async fn run<T: Transport>(&self, transport: T) -> Result<RunResult, RunError> {
        let metrics = Arc::new(MetricsAggregator::new(self.config.metric_shards));
        self.run_with(Arc::new(transport), metrics).await
    }

    /// Run with a caller-provided aggregator, which can be observed (for
    /// example its active-user gauge) while the run is in progress.
    pub async fn run_with<T: Transport>(
        &self,
        transport: Arc<T>,
        metrics: Arc<MetricsAggregator>,
    ) -> Result<RunResult, RunError> {
        if self.scenario.steps().is_empty() {
            return Err(RunError::EmptyScenario(self.scenario.name.clone()));
        }
        self.config.validate()?;

        tracing::info!("Running scenario: {}!", self.scenario.name);
        let run = RunContext::new(
            self.scenario.clone(),
            transport,
            Arc::new(self.config.clone()),
            metrics.clone(),
        );
        let summary = self.executor.exec(run).await?;

        tracing::info!("Processing results...");
        let stats = metrics.snapshot();
        let verdict = assertion::evaluate(&self.config.assertions, &stats);
        for result in verdict.results.iter().filter(|r| !r.passed) {
            tracing::warn!("Assertion failed: {result}");
        }

        Ok(RunResult {
            passed: verdict.passed,
            report: RunReport::from(&stats),
            verdict,
            stats,
            summary,
        })
    }
}
