//! The [`ProfileScheduler`]: open-model execution driven by an injection profile.
//!
//! This design separates **start generation** (the profile's pure schedule)
//! from **user execution** (one tokio task per virtual user), and keeps the
//! dispatch loop focused on hitting each start's offset.
//!
//! # High-level flow
//! 1. The profile is validated and turned into its schedule of start events.
//! 2. For each event, the dispatcher sleeps until `run_start + offset`, reaping
//!    finished users while it waits.
//! 3. If a concurrency cap is configured, the start then waits for a free slot.
//!    Starts are delayed by a saturated pool, never dropped.
//! 4. The user is spawned with a fresh session and counted as active until its
//!    task ends.
//! 5. Once every start is dispatched, the scheduler waits for users to finish.
//!    If the run deadline hits first, the shutdown protocol of
//!    [`crate::executor`] takes over.
//!
//! Offsets are measured from the run start, never from the previous dispatch,
//! so a late dispatch does not push later starts back.
use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::{sleep_until, Instant},
};
use typed_builder::TypedBuilder;

use super::{internals::*, ExecSummary, Executor, RunContext};
use crate::{error::RunError, profile::InjectionProfile, transport::Transport, user::VirtualUser};

/// Executor that dispatches one virtual user per start event of an
/// [`InjectionProfile`].
///
/// # Tuning knobs
///
/// - `lag_warning`: dispatch lag above which a warning is logged. Lag grows
///   when the runtime is overloaded or the concurrency cap is saturated.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ProfileScheduler {
    /// The load shape to inject.
    pub profile: InjectionProfile,
    #[builder(default = Duration::from_millis(50))]
    pub lag_warning: Duration,
}

impl Executor for ProfileScheduler {
    type Error = RunError;

    async fn exec<T: Transport>(&self, run: RunContext<T>) -> Result<ExecSummary, RunError> {
        self.profile.validate()?;
        run.config.validate()?;
        let scenario = run.scenario.clone();
        let config = run.config.clone();
        let metrics = run.metrics.clone();
        let (ctx, shutdown_tx) = ExecutionContext::new(run);

        let mut schedule = self.profile.schedule();
        tracing::info!(
            "Scheduling {} users over {:?} for scenario: {}",
            schedule.len(),
            self.profile.duration(),
            scenario.name
        );

        let started = Instant::now();
        let deadline = config.deadline.map(|d| started + d);
        let slots = config
            .max_concurrent_users
            .map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();
        let mut max_lag = Duration::ZERO;
        let mut segment = None;
        let mut cut_off = false;

        while let Some(event) = schedule.next() {
            if segment != Some(event.segment) {
                tracing::info!(
                    "Starting segment {}/{}",
                    event.segment + 1,
                    self.profile.segments().len()
                );
                segment = Some(event.segment);
            }

            let due = started + event.offset;
            let on_time = loop {
                tokio::select! {
                    biased;
                    _ = sleep_until_opt(deadline) => break false,
                    _ = sleep_until(due) => break true,
                    Some(joined) = tasks.join_next() => reap(joined, &metrics),
                }
            };

            let permit = match (&slots, on_time) {
                (_, false) => None,
                (None, true) => Some(None),
                (Some(slots), true) => loop {
                    tokio::select! {
                        biased;
                        _ = sleep_until_opt(deadline) => break None,
                        permit = slots.clone().acquire_owned() => break permit.ok().map(Some),
                        Some(joined) = tasks.join_next() => reap(joined, &metrics),
                    }
                },
            };
            let Some(permit) = permit else {
                let skipped = 1 + schedule.len() as u64;
                tracing::warn!("Run deadline reached before dispatch; skipping {skipped} starts");
                metrics.record_skipped(skipped);
                cut_off = true;
                break;
            };

            let lag = Instant::now().saturating_duration_since(due);
            if lag > self.lag_warning && lag > max_lag {
                tracing::warn!("User {} dispatched {lag:?} late", event.user_id);
            }
            max_lag = max_lag.max(lag);

            let active = metrics.dispatch(event.user_id);
            let user = VirtualUser::new(event.user_id, ctx.clone());
            tasks.spawn(async move {
                let _active = active;
                let _permit = permit;
                user.run().await;
            });
        }

        if !cut_off {
            tracing::info!("All starts dispatched, waiting for users to finish...");
            cut_off = !drain(&mut tasks, deadline, &metrics).await;
        }
        if cut_off {
            shut_down(&mut tasks, &shutdown_tx, config.grace_period, &metrics).await;
        }

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(ExecSummary {
            timed_out: cut_off,
            max_dispatch_lag: max_lag,
            elapsed: started.elapsed(),
        })
    }
}
