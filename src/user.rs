//! The virtual user: one walk through a scenario with its own session.
use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    aggregate::UserFate,
    check::{self, ResponseView},
    error::StepError,
    executor::ExecutionContext,
    metric::StepMetric,
    scenario::{RequestStep, Step},
    session::Session,
    transport::{join_url, Request, Response, Transport},
};

/// Spreads per-user seeds derived from one run seed.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// How a virtual user's walk through the scenario ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UserOutcome {
    Completed,
    Aborted(StepError),
    /// The run was shutting down before the scenario was over.
    TimedOut,
}

impl UserOutcome {
    pub fn fate(&self) -> UserFate {
        match self {
            UserOutcome::Completed => UserFate::Completed,
            UserOutcome::Aborted(_) => UserFate::Aborted,
            UserOutcome::TimedOut => UserFate::TimedOut,
        }
    }
}

/// Runs the steps of the shared scenario, strictly in order, against a
/// session nobody else can see.
pub struct VirtualUser<T> {
    id: u64,
    session: Session,
    rng: StdRng,
    ctx: ExecutionContext<T>,
}

impl<T: Transport> VirtualUser<T> {
    pub fn new(id: u64, ctx: ExecutionContext<T>) -> Self {
        let rng = match ctx.run.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id.wrapping_mul(SEED_STRIDE))),
            None => StdRng::from_os_rng(),
        };
        Self {
            id,
            session: Session::new(id),
            rng,
            ctx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Walk the scenario and report the outcome to the run's metrics.
    pub async fn run(mut self) -> UserOutcome {
        let outcome = self.walk().await;
        match &outcome {
            UserOutcome::Aborted(e) => tracing::warn!("User {} aborted: {e}", self.id),
            _ => tracing::debug!("User {} finished: {outcome:?}", self.id),
        }
        self.ctx.run.metrics.record_user(self.id, outcome.fate());
        outcome
    }

    async fn walk(&mut self) -> UserOutcome {
        let scenario = self.ctx.run.scenario.clone();
        tracing::debug!("User {} started scenario: {}", self.id, scenario.name);

        for step in scenario.steps() {
            if self.ctx.is_shutting_down() {
                return UserOutcome::TimedOut;
            }
            let result = match step {
                Step::Request(request) => self.request(request).await,
                Step::Pause { min, max } => {
                    self.pause(*min, *max).await;
                    Ok(())
                }
                Step::Feed(feeder) => feeder
                    .next()
                    .map(|row| self.session.merge(row))
                    .map_err(StepError::from),
            };
            if let Err(e) = result {
                return UserOutcome::Aborted(e);
            }
        }
        UserOutcome::Completed
    }

    async fn request(&mut self, step: &RequestStep) -> Result<(), StepError> {
        let metrics = self.ctx.run.metrics.clone();
        let unanswered = || StepMetric::unanswered(step.name.clone());

        let request = match self.render(step) {
            Ok(request) => request,
            Err(e) => {
                metrics.record(self.id, &unanswered());
                return Err(e);
            }
        };

        let response = match self.ctx.run.transport.send(request).await {
            Ok(response) => response,
            Err(source) => {
                metrics.record(self.id, &unanswered());
                return Err(StepError::Transport {
                    step: step.name.to_string(),
                    source,
                });
            }
        };

        let passed = self.check(step, &response);
        metrics.record(
            self.id,
            &StepMetric::completed(step.name.clone(), response.latency, passed),
        );

        if !passed && self.ctx.run.scenario.exit_on_check_failure() {
            return Err(StepError::CheckFailed {
                step: step.name.to_string(),
            });
        }
        Ok(())
    }

    fn render(&self, step: &RequestStep) -> Result<Request, StepError> {
        let config = &self.ctx.run.config;
        let path = step.path.render(&self.session)?;

        let mut headers = Vec::with_capacity(config.headers.len() + step.headers.len());
        for (name, value) in &step.headers {
            headers.push((name.clone(), value.render(&self.session)?));
        }
        for (name, value) in &config.headers {
            if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                headers.push((name.clone(), value.clone()));
            }
        }

        Ok(Request {
            method: step.method,
            url: join_url(&config.base_url, &path),
            headers,
            body: step
                .body
                .as_ref()
                .map(|body| body.render(&self.session))
                .transpose()?,
        })
    }

    /// Run every check of the step, in order, binding `save_as` values of
    /// the ones that pass. Returns whether the request counts as successful.
    fn check(&mut self, step: &RequestStep, response: &Response) -> bool {
        let view = ResponseView::new(response);
        let mut passed = true;

        for check in &step.checks {
            match check::evaluate(&view, check) {
                Ok(value) => {
                    if let Some(name) = &check.save_as {
                        self.session.set(name.clone(), value);
                    }
                }
                Err(e) => {
                    tracing::debug!("User {} check `{check}` on {} failed: {e}", self.id, step.name);
                    passed = false;
                }
            }
        }

        // Without an explicit status check, anything but 2xx/3xx fails.
        if !step.checks.iter().any(|c| c.is_status_check()) && !(200..400).contains(&response.status)
        {
            tracing::debug!(
                "User {} got status {} on {}",
                self.id,
                response.status,
                step.name
            );
            passed = false;
        }
        passed
    }

    async fn pause(&mut self, min: Duration, max: Duration) {
        let nanos = |d: Duration| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        let pause = if min >= max {
            min
        } else {
            Duration::from_nanos(self.rng.random_range(nanos(min)..=nanos(max)))
        };
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

impl<T> std::fmt::Debug for VirtualUser<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUser")
            .field("id", &self.id)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
