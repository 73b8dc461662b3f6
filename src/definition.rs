//! Declarative JSON surface.
//!
//! A [`SimulationDefinition`] describes feeders, a scenario, an injection
//! profile and the run configuration in one JSON document. [`compile`]
//! validates it and produces the same core model the builders produce; the
//! engine itself never sees the JSON.
//!
//! ```json
//! {
//!   "feeders": { "customers": { "strategy": "circular", "file": "customers.json" } },
//!   "scenario": {
//!     "name": "Complete User Journey",
//!     "steps": [
//!       { "type": "feed", "feeder": "customers" },
//!       { "type": "request", "name": "Create Customer", "method": "POST",
//!         "path": "/api/customers", "body": "{\"name\": \"${name}\"}",
//!         "checks": [ { "check": "status", "equals": 201 },
//!                     { "check": "field_exists", "path": "$.id", "save_as": "customerId" } ] },
//!       { "type": "pause", "min": "1s", "max": "3s" }
//!     ]
//!   },
//!   "injection": [ { "type": "ramp", "users": 5, "duration": "10s" } ],
//!   "config": { "base_url": "http://localhost:5000",
//!               "assertions": [ { "metric": "success_rate", "comparator": "gt", "threshold": 50 } ] }
//! }
//! ```
//!
//! [`compile`]: SimulationDefinition::compile
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    check::Check,
    config::{ConfigError, RunConfig},
    executor::ProfileScheduler,
    feeder::{FeedStrategy, Feeder, FeederLoadError, RecordFeeder},
    path::PathError,
    profile::{InjectionProfile, ProfileError, Segment},
    scenario::{RequestStep, Scenario, Step},
    simulation::Simulation,
    template::TemplateError,
    transport::{Method, UnknownMethod},
    utils::duration,
    value::Value,
};

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid definition: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("step {step} feeds from unknown feeder `{feeder}`")]
    UnknownFeeder { step: usize, feeder: String },
    #[error("feeder `{0}` needs either `records` or `file`")]
    MissingRecords(String),
    #[error(transparent)]
    Feeder(#[from] FeederLoadError),
    #[error("step {step}: {source}")]
    Template {
        step: usize,
        #[source]
        source: TemplateError,
    },
    #[error("step {step}: {source}")]
    Path {
        step: usize,
        #[source]
        source: PathError,
    },
    #[error("step {step}: {source}")]
    Method {
        step: usize,
        #[source]
        source: UnknownMethod,
    },
    #[error("step {step}: pause needs `duration` or `min` <= `max`")]
    InvalidPause { step: usize },
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationDefinition {
    #[serde(default)]
    pub feeders: BTreeMap<String, FeederDef>,
    pub scenario: ScenarioDef,
    pub injection: Vec<Segment>,
    #[serde(default)]
    pub config: RunConfig,
    /// Directory relative feeder files are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// A named row source. Rows come inline through `records` or from `file`.
///
/// `format` defaults to CSV for files ending in `.csv` and to JSON otherwise.
/// Inline CSV is given as a single string in `records`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeederDef {
    #[serde(default)]
    pub strategy: FeedStrategy,
    pub format: Option<FeederFormat>,
    pub records: Option<serde_json::Value>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeederFormat {
    Json,
    Csv,
}

impl FeederDef {
    fn format(&self) -> FeederFormat {
        let csv_file = self
            .file
            .as_deref()
            .and_then(Path::extension)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        match self.format {
            Some(format) => format,
            None if csv_file => FeederFormat::Csv,
            None => FeederFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioDef {
    pub name: String,
    pub steps: Vec<StepDef>,
    #[serde(default)]
    pub exit_on_check_failure: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDef {
    Request {
        name: String,
        #[serde(default = "default_method")]
        method: String,
        path: String,
        body: Option<String>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        checks: Vec<CheckDef>,
    },
    Pause {
        #[serde(default, deserialize_with = "duration::deserialize_option")]
        duration: Option<Duration>,
        #[serde(default, deserialize_with = "duration::deserialize_option")]
        min: Option<Duration>,
        #[serde(default, deserialize_with = "duration::deserialize_option")]
        max: Option<Duration>,
    },
    Feed {
        feeder: String,
    },
}

fn default_method() -> String {
    "GET".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CheckDef {
    Status {
        equals: u16,
        save_as: Option<String>,
    },
    FieldExists {
        path: String,
        save_as: Option<String>,
    },
    FieldEquals {
        path: String,
        expected: serde_json::Value,
        save_as: Option<String>,
    },
}

/// The core model a definition compiles to.
#[derive(Debug, Clone)]
pub struct CompiledSimulation {
    pub scenario: Scenario,
    pub profile: InjectionProfile,
    pub config: RunConfig,
}

impl CompiledSimulation {
    pub fn into_simulation(self) -> Simulation<ProfileScheduler> {
        Simulation::builder()
            .scenario(self.scenario)
            .executor(ProfileScheduler::builder().profile(self.profile).build())
            .config(self.config)
            .build()
    }
}

impl SimulationDefinition {
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a definition file; relative feeder files resolve next to it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let mut definition = Self::from_json(&std::fs::read_to_string(path)?)?;
        definition.base_dir = path.parent().map(Path::to_path_buf);
        Ok(definition)
    }

    pub fn compile(&self) -> Result<CompiledSimulation, DefinitionError> {
        let feeders = self.load_feeders()?;
        let steps = self
            .scenario
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| compile_step(i, step, &feeders))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = Scenario::builder(self.scenario.name.clone());
        for step in steps {
            builder = builder.step(step);
        }
        if self.scenario.exit_on_check_failure {
            builder = builder.exit_on_check_failure();
        }

        let profile: InjectionProfile = self.injection.iter().copied().collect();
        profile.validate()?;
        self.config.validate()?;

        Ok(CompiledSimulation {
            scenario: builder.build(),
            profile,
            config: self.config.clone(),
        })
    }

    fn load_feeders(&self) -> Result<BTreeMap<&str, Arc<dyn Feeder>>, DefinitionError> {
        let mut feeders = BTreeMap::new();
        for (name, def) in &self.feeders {
            let feeder = match (&def.records, &def.file, def.format()) {
                (Some(serde_json::Value::String(text)), _, FeederFormat::Csv) => {
                    RecordFeeder::from_csv(name.clone(), text)?
                }
                (Some(records), _, _) => RecordFeeder::new(
                    name.clone(),
                    crate::feeder::records_from_json(name, records.clone())?,
                ),
                (None, Some(file), format) => {
                    let file = match &self.base_dir {
                        Some(dir) if file.is_relative() => dir.join(file),
                        _ => file.clone(),
                    };
                    match format {
                        FeederFormat::Csv => RecordFeeder::from_csv_file(name.clone(), file)?,
                        FeederFormat::Json => RecordFeeder::from_json_file(name.clone(), file)?,
                    }
                }
                (None, None, _) => return Err(DefinitionError::MissingRecords(name.clone())),
            };
            tracing::debug!("Loaded feeder {name} with {} rows", feeder.len());
            let feeder: Arc<dyn Feeder> = Arc::new(feeder.strategy(def.strategy));
            feeders.insert(name.as_str(), feeder);
        }
        Ok(feeders)
    }
}

fn compile_step(
    step: usize,
    def: &StepDef,
    feeders: &BTreeMap<&str, Arc<dyn Feeder>>,
) -> Result<Step, DefinitionError> {
    let template = |source| DefinitionError::Template { step, source };
    match def {
        StepDef::Request {
            name,
            method,
            path,
            body,
            headers,
            checks,
        } => {
            let method: Method = method
                .parse()
                .map_err(|source| DefinitionError::Method { step, source })?;
            let mut request = RequestStep::new(name, method, path).map_err(template)?;
            if let Some(body) = body {
                request = request.body(body).map_err(template)?;
            }
            for (name, value) in headers {
                request = request.header(name.clone(), value).map_err(template)?;
            }
            for check in checks {
                request = request.check(
                    compile_check(check).map_err(|source| DefinitionError::Path { step, source })?,
                );
            }
            Ok(Step::Request(request))
        }
        StepDef::Pause { duration, min, max } => match (duration, min, max) {
            (Some(d), None, None) => Ok(Step::pause(*d, *d)),
            (None, Some(min), Some(max)) if min <= max => Ok(Step::pause(*min, *max)),
            _ => Err(DefinitionError::InvalidPause { step }),
        },
        StepDef::Feed { feeder } => feeders
            .get(feeder.as_str())
            .map(|f| Step::Feed(f.clone()))
            .ok_or_else(|| DefinitionError::UnknownFeeder {
                step,
                feeder: feeder.clone(),
            }),
    }
}

fn compile_check(def: &CheckDef) -> Result<Check, PathError> {
    let (check, save_as) = match def {
        CheckDef::Status { equals, save_as } => (Check::status(*equals), save_as),
        CheckDef::FieldExists { path, save_as } => (Check::field_exists(path)?, save_as),
        CheckDef::FieldEquals {
            path,
            expected,
            save_as,
        } => (
            Check::field_equals(path, Value::from(expected.clone()))?,
            save_as,
        ),
    };
    Ok(match save_as {
        Some(name) => check.save_as(name.clone()),
        None => check,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckSpec;

    const JOURNEY: &str = r#"{
        "feeders": {
            "customers": {
                "strategy": "circular",
                "records": [{"name": "Ada", "email": "ada@example.com", "quantity": 2}]
            }
        },
        "scenario": {
            "name": "Complete User Journey",
            "steps": [
                {"type": "feed", "feeder": "customers"},
                {"type": "request", "name": "Create Customer", "method": "post",
                 "path": "/api/customers",
                 "body": "{\"name\": \"${name}\", \"email\": \"${email}\"}",
                 "checks": [
                    {"check": "status", "equals": 201},
                    {"check": "field_exists", "path": "$.id", "save_as": "customerId"}
                 ]},
                {"type": "pause", "min": "1s", "max": "3s"},
                {"type": "request", "name": "Get Product Details", "path": "/api/products/1",
                 "checks": [{"check": "field_equals", "path": "$.id", "expected": "1"}]},
                {"type": "pause", "duration": 500}
            ]
        },
        "injection": [
            {"type": "ramp", "users": 5, "duration": "10s"},
            {"type": "constant_rate", "rate": 5, "duration": "30s"},
            {"type": "ramp", "users": 0, "duration": "10s"}
        ],
        "config": {
            "base_url": "http://localhost:5000",
            "headers": {"accept": "application/json"},
            "assertions": [
                {"metric": "max_response_time", "comparator": "lt", "threshold": 10000},
                {"metric": "success_rate", "comparator": "gt", "threshold": 50}
            ]
        }
    }"#;

    #[test]
    fn compiles_a_full_journey() {
        let compiled = SimulationDefinition::from_json(JOURNEY)
            .unwrap()
            .compile()
            .unwrap();

        assert_eq!(compiled.scenario.name, "Complete User Journey");
        assert_eq!(compiled.scenario.steps().len(), 5);
        assert!(matches!(compiled.scenario.steps()[0], Step::Feed(_)));

        let Step::Request(create) = &compiled.scenario.steps()[1] else {
            panic!("expected a request step");
        };
        assert_eq!(create.method, Method::Post);
        assert_eq!(create.checks[0].spec, CheckSpec::StatusEquals(201));
        assert_eq!(create.checks[1].save_as.as_deref(), Some("customerId"));

        assert!(matches!(
            compiled.scenario.steps()[4],
            Step::Pause { min, max } if min == max && min == Duration::from_millis(500)
        ));

        assert_eq!(compiled.profile.total_users(), 155);
        assert_eq!(compiled.profile.duration(), Duration::from_secs(50));
        assert_eq!(compiled.config.assertions.len(), 2);
        assert_eq!(compiled.config.base_url, "http://localhost:5000");
    }

    #[test]
    fn unknown_feeder_is_rejected() {
        let json = r#"{
            "scenario": {"name": "s", "steps": [{"type": "feed", "feeder": "nope"}]},
            "injection": []
        }"#;
        let err = SimulationDefinition::from_json(json)
            .unwrap()
            .compile()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownFeeder { step: 0, ref feeder } if feeder == "nope"));
    }

    #[test]
    fn malformed_pieces_are_reported_with_their_step() {
        let compile = |step: &str| {
            let json = format!(
                r#"{{"scenario": {{"name": "s", "steps": [{step}]}}, "injection": []}}"#
            );
            SimulationDefinition::from_json(&json)
                .unwrap()
                .compile()
                .unwrap_err()
        };

        assert!(matches!(
            compile(r#"{"type": "request", "name": "r", "path": "/${id"}"#),
            DefinitionError::Template { step: 0, .. }
        ));
        assert!(matches!(
            compile(r#"{"type": "request", "name": "r", "method": "FETCH", "path": "/"}"#),
            DefinitionError::Method { step: 0, .. }
        ));
        assert!(matches!(
            compile(
                r#"{"type": "request", "name": "r", "path": "/", "checks": [{"check": "field_exists", "path": "$..x"}]}"#
            ),
            DefinitionError::Path { step: 0, .. }
        ));
        assert!(matches!(
            compile(r#"{"type": "pause", "min": "3s", "max": "1s"}"#),
            DefinitionError::InvalidPause { step: 0 }
        ));
        assert!(matches!(
            compile(r#"{"type": "pause"}"#),
            DefinitionError::InvalidPause { step: 0 }
        ));
    }

    #[test]
    fn bad_durations_and_rates_fail() {
        for duration in ["soon", "1e30h"] {
            let json = format!(
                r#"{{
                    "scenario": {{"name": "s", "steps": []}},
                    "injection": [{{"type": "hold", "duration": "{duration}"}}]
                }}"#
            );
            assert!(matches!(
                SimulationDefinition::from_json(&json),
                Err(DefinitionError::Json(_))
            ));
        }

        let json = r#"{
            "scenario": {"name": "s", "steps": []},
            "injection": [{"type": "constant_rate", "rate": -2, "duration": "1s"}]
        }"#;
        assert!(matches!(
            SimulationDefinition::from_json(json).unwrap().compile(),
            Err(DefinitionError::Profile(_))
        ));
    }

    #[test]
    fn zero_concurrency_cap_is_rejected() {
        let json = r#"{
            "scenario": {"name": "s", "steps": []},
            "injection": [],
            "config": {"max_concurrent_users": 0}
        }"#;
        assert!(matches!(
            SimulationDefinition::from_json(json).unwrap().compile(),
            Err(DefinitionError::Config(ConfigError::ZeroConcurrencyCap))
        ));
    }

    #[test]
    fn feeder_without_source_is_rejected() {
        let json = r#"{
            "feeders": {"empty": {}},
            "scenario": {"name": "s", "steps": []},
            "injection": []
        }"#;
        assert!(matches!(
            SimulationDefinition::from_json(json).unwrap().compile(),
            Err(DefinitionError::MissingRecords(name)) if name == "empty"
        ));
    }

    #[test]
    fn feeder_format_follows_the_file_extension() {
        let def = |json: &str| serde_json::from_str::<FeederDef>(json).unwrap().format();
        assert_eq!(def(r#"{"file": "customers.csv"}"#), FeederFormat::Csv);
        assert_eq!(def(r#"{"file": "CUSTOMERS.CSV"}"#), FeederFormat::Csv);
        assert_eq!(def(r#"{"file": "customers.json"}"#), FeederFormat::Json);
        assert_eq!(def(r#"{"file": "customers"}"#), FeederFormat::Json);
        assert_eq!(
            def(r#"{"file": "customers.txt", "format": "csv"}"#),
            FeederFormat::Csv
        );
    }

    #[test]
    fn inline_csv_feeders_are_loaded() {
        let json = r#"{
            "feeders": {
                "products": {"format": "csv", "strategy": "circular",
                             "records": "productId,quantity\n1,2\n5,1\n"}
            },
            "scenario": {"name": "s", "steps": []},
            "injection": []
        }"#;
        let definition = SimulationDefinition::from_json(json).unwrap();
        let feeders = definition.load_feeders().unwrap();
        let products = &feeders["products"];

        let first = products.next().unwrap();
        assert!(first.contains(&("productId".to_owned(), Value::from("1"))));
        assert!(first.contains(&("quantity".to_owned(), Value::from("2"))));
        products.next().unwrap();
        assert_eq!(products.next().unwrap(), first);
    }
}
