//! Executor: orchestration of virtual users at runtime.
//!
//! The `Executor` trait is the runtime that drives a [`Scenario`]. Different
//! executors implement different workload models:
//!
//! - [`ProfileScheduler`]: open model. Users arrive on the schedule of an
//!   [`crate::profile::InjectionProfile`], whether or not earlier users finished.
//! - [`ConstantUsers`]: closed model. A fixed number of users loop the scenario.
//!
//! Both share the same shutdown protocol: when the run deadline hits, no new
//! users start, users still running get the configured grace period to finish
//! their current step, and whatever is left is aborted and counted as failed.
pub mod constant;
pub mod injection;
pub use constant::ConstantUsers;
pub use injection::ProfileScheduler;

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    aggregate::MetricsAggregator, config::RunConfig, scenario::Scenario, transport::Transport,
};

/// Everything a run shares between its virtual users.
pub struct RunContext<T> {
    pub scenario: Arc<Scenario>,
    pub transport: Arc<T>,
    pub config: Arc<RunConfig>,
    pub metrics: Arc<MetricsAggregator>,
}

impl<T> RunContext<T> {
    pub fn new(
        scenario: Arc<Scenario>,
        transport: Arc<T>,
        config: Arc<RunConfig>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            scenario,
            transport,
            config,
            metrics,
        }
    }
}

impl<T> Clone for RunContext<T> {
    fn clone(&self) -> Self {
        Self {
            scenario: self.scenario.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// What the executor observed about the run itself, as opposed to the
/// system under test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecSummary {
    /// The run deadline cut the run short.
    pub timed_out: bool,
    /// Worst delay between a start's scheduled offset and its dispatch.
    pub max_dispatch_lag: Duration,
    pub elapsed: Duration,
}

/// The runtime hook that executes a run.
///
/// Results are written to the run's [`MetricsAggregator`]; the executor only
/// returns what it knows about scheduling.
pub trait Executor
where
    Self: Send + Sync + Sized,
{
    type Error;

    /// Drive the run to completion, or until the configured deadline.
    fn exec<T: Transport>(
        &self,
        run: RunContext<T>,
    ) -> impl Future<Output = Result<ExecSummary, Self::Error>> + Send;
}

#[cfg(feature = "internals")]
pub use internals::*;
#[cfg(not(feature = "internals"))]
pub(crate) use internals::*;

/// Internal components shared by the executors.
/// Encapsulated in a module to allow conditional exposure via `#[cfg(feature = "internals")]`.
mod internals {
    use super::*;
    use crate::aggregate::UserFate;
    use tokio::{
        sync::watch::{channel, Receiver, Sender},
        task::{JoinError, JoinSet},
        time::{sleep_until, Instant},
    };

    /// Shared execution state handed to every virtual user.
    pub struct ExecutionContext<T> {
        pub run: RunContext<T>,
        /// Flips to `true` when the run deadline hits.
        pub shutdown: Receiver<bool>,
    }

    impl<T> Clone for ExecutionContext<T> {
        fn clone(&self) -> Self {
            Self {
                run: self.run.clone(),
                shutdown: self.shutdown.clone(),
            }
        }
    }

    impl<T> ExecutionContext<T> {
        pub fn new(run: RunContext<T>) -> (Self, Sender<bool>) {
            let (tx, rx) = channel(false);
            (Self { run, shutdown: rx }, tx)
        }

        pub fn is_shutting_down(&self) -> bool {
            *self.shutdown.borrow()
        }
    }

    /// Sleep until `deadline`, or forever when there is none.
    pub async fn sleep_until_opt(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Account for a user task that did not return normally.
    ///
    /// Users that return record their own outcome; a cancelled task was cut off
    /// by the deadline, and a panicked one is logged instead of taking the run
    /// down with it.
    pub fn reap(joined: Result<(), JoinError>, metrics: &MetricsAggregator) {
        match joined {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => metrics.record_user(0, UserFate::TimedOut),
            Err(e) => {
                tracing::error!("User task panicked with error: {e}");
                metrics.record_user(0, UserFate::Crashed);
            }
        }
    }

    /// Wait for every user to finish. Returns `false` if the deadline hit first.
    pub async fn drain(
        tasks: &mut JoinSet<()>,
        deadline: Option<Instant>,
        metrics: &MetricsAggregator,
    ) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = sleep_until_opt(deadline) => return false,
                joined = tasks.join_next() => match joined {
                    Some(joined) => reap(joined, metrics),
                    None => return true,
                },
            }
        }
    }

    /// Signal shutdown, give running users `grace` to finish their current
    /// step, then abort the rest.
    pub async fn shut_down(
        tasks: &mut JoinSet<()>,
        shutdown: &Sender<bool>,
        grace: Duration,
        metrics: &MetricsAggregator,
    ) {
        tracing::info!(
            "Run deadline reached with {} users in flight, granting {grace:?} to finish...",
            tasks.len()
        );
        // Users hold receivers until they finish; none left means nothing to tell.
        let _ = shutdown.send(true);

        let grace_end = Instant::now() + grace;
        loop {
            tokio::select! {
                biased;
                joined = tasks.join_next() => match joined {
                    Some(joined) => reap(joined, metrics),
                    None => return,
                },
                _ = sleep_until(grace_end) => break,
            }
        }

        tracing::warn!(
            "Aborting {} users still running after the grace period",
            tasks.len()
        );
        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            reap(joined, metrics);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinSet;

    #[tokio::test(start_paused = true)]
    async fn drain_stops_at_the_deadline() {
        let metrics = MetricsAggregator::new(1);
        let mut tasks = JoinSet::new();
        tasks.spawn(async { tokio::time::sleep(Duration::from_secs(1)).await });
        tasks.spawn(async { tokio::time::sleep(Duration::from_secs(60)).await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        assert!(!drain(&mut tasks, Some(deadline), &metrics).await);
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shut_down_aborts_after_grace_and_counts_timeouts() {
        let metrics = MetricsAggregator::new(1);
        let (tx, _rx) = tokio::sync::watch::channel(false);
        let mut tasks = JoinSet::new();
        tasks.spawn(async { tokio::time::sleep(Duration::from_millis(10)).await });
        tasks.spawn(async { tokio::time::sleep(Duration::from_secs(60)).await });

        shut_down(&mut tasks, &tx, Duration::from_secs(1), &metrics).await;

        assert!(tasks.is_empty());
        assert!(*tx.borrow());
        let stats = metrics.snapshot();
        assert_eq!(stats.users.timed_out, 1);
        assert_eq!(stats.global.failures(), 1);
    }

    #[tokio::test]
    async fn panicking_user_is_counted_not_propagated() {
        let metrics = MetricsAggregator::new(1);
        let mut tasks = JoinSet::new();
        tasks.spawn(async { panic!("boom") });

        assert!(drain(&mut tasks, None, &metrics).await);
        assert_eq!(metrics.snapshot().users.crashed, 1);
    }
}
