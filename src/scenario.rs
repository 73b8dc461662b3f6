//! Scenarios: the ordered steps every virtual user walks through.
//!
//! A [`Scenario`] is built once and then shared read-only, behind an `Arc`,
//! by every virtual user of a run. All templates and field paths are parsed
//! at construction time.
use std::{fmt, sync::Arc, time::Duration};

use crate::{
    check::Check,
    feeder::Feeder,
    template::{Template, TemplateError},
    transport::Method,
};

/// An HTTP request with its checks.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestStep {
    /// Name used to group the request's statistics.
    pub name: Arc<str>,
    pub method: Method,
    pub path: Template,
    pub body: Option<Template>,
    pub headers: Vec<(String, Template)>,
    pub checks: Vec<Check>,
}

impl RequestStep {
    pub fn new(name: &str, method: Method, path: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            name: Arc::from(name),
            method,
            path: Template::parse(path)?,
            body: None,
            headers: Vec::new(),
            checks: Vec::new(),
        })
    }

    pub fn get(name: &str, path: &str) -> Result<Self, TemplateError> {
        Self::new(name, Method::Get, path)
    }

    pub fn post(name: &str, path: &str) -> Result<Self, TemplateError> {
        Self::new(name, Method::Post, path)
    }

    pub fn body(mut self, body: &str) -> Result<Self, TemplateError> {
        self.body = Some(Template::parse(body)?);
        Ok(self)
    }

    /// Add a header. Request headers override the run's default headers.
    pub fn header(mut self, name: impl Into<String>, value: &str) -> Result<Self, TemplateError> {
        self.headers.push((name.into(), Template::parse(value)?));
        Ok(self)
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }
}

/// One unit of scenario work.
#[derive(Debug, Clone)]
pub enum Step {
    Request(RequestStep),
    /// Sleep for a duration drawn uniformly from `[min, max]`.
    Pause { min: Duration, max: Duration },
    /// Pull the next row of a feeder into the session.
    Feed(Arc<dyn Feeder>),
}

impl Step {
    /// A pause with its bounds put in order.
    pub fn pause(a: Duration, b: Duration) -> Self {
        Step::Pause {
            min: a.min(b),
            max: a.max(b),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Request(r) => write!(f, "{} {} {}", r.name, r.method, r.path),
            Step::Pause { min, max } => write!(f, "pause {min:?}..{max:?}"),
            Step::Feed(feeder) => write!(f, "feed {}", feeder.name()),
        }
    }
}

/// An immutable, ordered sequence of steps.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use volley::{check::Check, scenario::{RequestStep, Scenario}};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let scenario = Scenario::builder("browse")
///     .request(RequestStep::get("home", "/")?.check(Check::status(200)))
///     .pause(Duration::from_millis(500), Duration::from_secs(2))
///     .request(RequestStep::get("product", "/api/products/1")?)
///     .build();
///
/// assert_eq!(scenario.steps().len(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    steps: Vec<Step>,
    exit_on_check_failure: bool,
}

impl Scenario {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            exit_on_check_failure: false,
        }
    }

    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            scenario: Scenario::new(name, Vec::new()),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Whether a failed check ends the virtual user after its step.
    pub fn exit_on_check_failure(&self) -> bool {
        self.exit_on_check_failure
    }
}

/// Fluent construction of a [`Scenario`].
#[derive(Debug)]
pub struct ScenarioBuilder {
    scenario: Scenario,
}

impl ScenarioBuilder {
    pub fn step(mut self, step: Step) -> Self {
        self.scenario.steps.push(step);
        self
    }

    pub fn request(self, request: RequestStep) -> Self {
        self.step(Step::Request(request))
    }

    pub fn pause(self, min: Duration, max: Duration) -> Self {
        self.step(Step::pause(min, max))
    }

    pub fn feed(self, feeder: Arc<dyn Feeder>) -> Self {
        self.step(Step::Feed(feeder))
    }

    pub fn exit_on_check_failure(mut self) -> Self {
        self.scenario.exit_on_check_failure = true;
        self
    }

    pub fn build(self) -> Scenario {
        self.scenario
    }
}
