//! Volley — the scheduling and execution core of an HTTP load-testing tool.
//!
//! Volley turns a declarative description of load (an injection profile) into
//! a stream of virtual users, runs each user through a scenario of HTTP steps
//! with its own session, and reduces every observed response into statistics
//! that pass/fail assertions are evaluated against.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`InjectionProfile`]: an ordered list of [`Segment`]s (ramps, constant
//!   arrival rates, holds) whose pure schedule says when each user starts.
//! - [`Scenario`]: the ordered steps a virtual user walks through. Request
//!   steps are rendered from `${name}` templates against the user's
//!   [`Session`], and their [`Check`]s can save response fields back into it.
//! - [`Executor`]: the runtime that dispatches users. [`ProfileScheduler`]
//!   follows an injection profile; [`ConstantUsers`] keeps a fixed pool busy.
//! - [`Transport`]: how a rendered request reaches the system under test.
//! - [`Metric`]: one observation produced by a user, folded by an
//!   [`Aggregate`] into run statistics inside the [`MetricsAggregator`].
//! - [`Assertion`]: a threshold over the final statistics. All of them
//!   together decide whether the run passed.
//! - [`Report`] / [`Reporter`]: turn statistics into output and send it
//!   somewhere.
//!
//! [`Simulation`] glues one scenario, one executor and one [`RunConfig`]
//! together. [`SimulationDefinition`] offers the same model as a JSON document.
//!
//! # Feature flags
//! - `builtins` (default): [`transport::HttpTransport`] over `reqwest` and
//!   [`report::StdoutReporter`].
//! - `internals`: enable access to internal (and unstable) scheduling helpers
//!   and the execution context shared by executors.
//!
//! # Where to start
//!
//! - Read the docs for [`Simulation`], [`InjectionProfile`] and [`Scenario`],
//!   then `demos/ecommerce.rs` for a complete user journey.

/// Run statistics and the shared aggregator
pub mod aggregate;
/// Pass/fail thresholds over run statistics
pub mod assertion;
/// Response checks
pub mod check;
/// Run-wide settings
pub mod config;
/// JSON definition of a whole simulation
pub mod definition;
/// Errors that stop a run or a single step
pub mod error;
/// Orchestrators that define how things will actually run
pub mod executor;
/// Row sources for data-driven scenarios
pub mod feeder;
/// Single metrics
pub mod metric;
/// Field paths into JSON response bodies
pub mod path;
/// Load shapes and their start schedules
pub mod profile;
/// Reports and Reporters
pub mod report;
/// Scenarios and their steps
pub mod scenario;
/// Per-user variables
pub mod session;
/// Glue that runs a scenario end to end
pub mod simulation;
/// `${name}` substitution in paths, headers and bodies
pub mod template;
/// The seam to the system under test
pub mod transport;
/// One virtual user walking a scenario
pub mod user;
/// Duration parsing and serde helpers
pub mod utils;
/// Dynamic values held by sessions and feeders
pub mod value;

pub use aggregate::{Aggregate, MetricsAggregator, RunStats};
pub use assertion::{Assertion, Verdict};
pub use check::Check;
pub use config::RunConfig;
pub use definition::SimulationDefinition;
pub use error::{RunError, StepError};
pub use executor::{ConstantUsers, Executor, ProfileScheduler};
pub use feeder::{Feeder, RecordFeeder};
pub use metric::Metric;
pub use profile::{InjectionProfile, Segment};
pub use report::{Report, Reporter, RunReport};
pub use scenario::{RequestStep, Scenario, Step};
pub use session::Session;
pub use simulation::{RunResult, Simulation};
pub use transport::Transport;
