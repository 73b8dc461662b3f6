//! The [`ConstantUsers`] executor: a closed workload model.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{task::JoinSet, time::Instant};
use typed_builder::TypedBuilder;

use super::{internals::*, ExecSummary, Executor, RunContext};
use crate::{error::RunError, transport::Transport, user::VirtualUser};

/// Keeps `users` virtual users busy for `duration`.
///
/// Each slot runs the scenario with a fresh session, then immediately starts
/// over as a new user, until `duration` has elapsed. Iterations already under
/// way when it elapses run to completion. The run deadline, if configured,
/// still applies on top.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ConstantUsers {
    pub users: usize,
    pub duration: Duration,
}

impl Executor for ConstantUsers {
    type Error = RunError;

    async fn exec<T: Transport>(&self, run: RunContext<T>) -> Result<ExecSummary, RunError> {
        let scenario = run.scenario.clone();
        let config = run.config.clone();
        let metrics = run.metrics.clone();
        let (ctx, shutdown_tx) = ExecutionContext::new(run);

        let started = Instant::now();
        let deadline = config.deadline.map(|d| started + d);
        let stop_at = started + self.duration;
        let next_id = Arc::new(AtomicU64::new(0));

        tracing::info!(
            "Spawning {} looping users for {:?} on scenario: {}",
            self.users,
            self.duration,
            scenario.name
        );
        let mut tasks = JoinSet::new();
        for slot in 0..self.users {
            let ctx = ctx.clone();
            let next_id = next_id.clone();
            tasks.spawn(async move {
                tracing::debug!("Slot {slot} started.");
                while Instant::now() < stop_at && !ctx.is_shutting_down() {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    let _active = ctx.run.metrics.dispatch(id);
                    VirtualUser::new(id, ctx.clone()).run().await;
                }
                tracing::debug!("Slot {slot} shutting down.");
            });
        }

        let timed_out = !drain(&mut tasks, deadline, &metrics).await;
        if timed_out {
            shut_down(&mut tasks, &shutdown_tx, config.grace_period, &metrics).await;
        }

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(ExecSummary {
            timed_out,
            max_dispatch_lag: Duration::ZERO,
            elapsed: started.elapsed(),
        })
    }
}
