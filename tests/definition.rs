use std::{fs, sync::Mutex, time::Duration};

use tempfile::TempDir;
use volley::{
    definition::DefinitionError,
    transport::{Request, Response, Transport, TransportError},
    SimulationDefinition,
};

/// Serves a product catalogue and remembers request bodies.
#[derive(Default)]
struct Catalogue {
    bodies: Mutex<Vec<String>>,
}

impl Transport for Catalogue {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        if let Some(body) = &request.body {
            self.bodies.lock().unwrap().push(body.clone());
        }
        let body = if request.url.ends_with("/api/products/1") {
            r#"{"id": "1", "name": "Widget", "price": 9.5, "category": "tools"}"#
        } else {
            r#"{"id": 7}"#
        };
        Ok(Response {
            status: if request.url.ends_with("/api/customers") { 201 } else { 200 },
            body: body.to_owned(),
            latency: Duration::from_millis(20),
        })
    }
}

const DEFINITION: &str = r#"{
    "feeders": {
        "customers": { "strategy": "circular", "file": "customers.json" }
    },
    "scenario": {
        "name": "Product details",
        "steps": [
            { "type": "feed", "feeder": "customers" },
            { "type": "request", "name": "Create Customer", "method": "POST",
              "path": "/api/customers",
              "body": "{\"name\": \"${name}\"}",
              "checks": [
                { "check": "status", "equals": 201 },
                { "check": "field_exists", "path": "$.id", "save_as": "customerId" }
              ] },
            { "type": "pause", "min": "1s", "max": "3s" },
            { "type": "request", "name": "Get Product Details", "path": "/api/products/1",
              "checks": [
                { "check": "status", "equals": 200 },
                { "check": "field_equals", "path": "$.id", "expected": 1 },
                { "check": "field_exists", "path": "$.name" },
                { "check": "field_exists", "path": "$.price" },
                { "check": "field_exists", "path": "$.category" }
              ] },
            { "type": "request", "name": "Add to Cart", "method": "POST", "path": "/api/cart",
              "body": "{\"customerId\": ${customerId}, \"quantity\": ${quantity:-1}}" }
        ]
    },
    "injection": [
        { "type": "constant_rate", "rate": 2, "duration": "2s" },
        { "type": "hold", "duration": "1s" },
        { "type": "at_once", "users": 1 }
    ],
    "config": {
        "base_url": "http://localhost:5000",
        "seed": 99,
        "assertions": [
            { "metric": "max_response_time", "comparator": "lt", "threshold": 1000 },
            { "metric": "mean_response_time", "comparator": "lt", "threshold": 200 },
            { "metric": "success_rate", "comparator": "gt", "threshold": 99 },
            { "scope": { "step": "Get Product Details" },
              "metric": { "percentile": 95.0 }, "comparator": "lte", "threshold": 25 }
        ]
    }
}"#;

fn write_definition() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("customers.json"),
        r#"[{"name": "Ada"}, {"name": "Grace"}]"#,
    )
    .unwrap();
    let path = dir.path().join("simulation.json");
    fs::write(&path, DEFINITION).unwrap();
    (dir, path)
}

#[tokio::test(start_paused = true)]
async fn a_definition_file_runs_end_to_end() {
    let (_dir, path) = write_definition();
    let simulation = SimulationDefinition::from_file(&path)
        .unwrap()
        .compile()
        .unwrap()
        .into_simulation();

    let catalogue = Catalogue::default();
    let result = simulation.run(catalogue).await.unwrap();

    assert!(result.passed, "{}", result.verdict);
    assert_eq!(result.report.users.dispatched, 5);
    assert_eq!(result.report.users.completed, 5);
    assert_eq!(result.report.global.requests, 15);
    assert_eq!(result.report.steps["Get Product Details"].requests, 5);
}

#[tokio::test(start_paused = true)]
async fn session_values_reach_request_bodies() {
    let (_dir, path) = write_definition();
    let simulation = SimulationDefinition::from_file(&path)
        .unwrap()
        .compile()
        .unwrap()
        .into_simulation();

    let catalogue = std::sync::Arc::new(Catalogue::default());
    simulation
        .run_with(catalogue.clone(), Default::default())
        .await
        .unwrap();

    let bodies = catalogue.bodies.lock().unwrap();
    assert!(bodies.contains(&r#"{"name": "Ada"}"#.to_owned()));
    assert!(bodies.contains(&r#"{"name": "Grace"}"#.to_owned()));
    assert!(bodies.contains(&r#"{"customerId": 7, "quantity": 1}"#.to_owned()));
}

#[test]
fn missing_feeder_files_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("simulation.json");
    fs::write(&path, DEFINITION).unwrap();

    let err = SimulationDefinition::from_file(&path)
        .unwrap()
        .compile()
        .unwrap_err();
    assert!(matches!(err, DefinitionError::Feeder(_)));
}

#[tokio::test(start_paused = true)]
async fn csv_feeder_files_are_read_by_extension() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("customers.csv"), "name\nAda\nGrace\n").unwrap();
    let path = dir.path().join("simulation.json");
    fs::write(&path, DEFINITION.replace("customers.json", "customers.csv")).unwrap();

    let simulation = SimulationDefinition::from_file(&path)
        .unwrap()
        .compile()
        .unwrap()
        .into_simulation();
    let catalogue = std::sync::Arc::new(Catalogue::default());
    simulation
        .run_with(catalogue.clone(), Default::default())
        .await
        .unwrap();

    let bodies = catalogue.bodies.lock().unwrap();
    assert!(bodies.contains(&r#"{"name": "Ada"}"#.to_owned()));
    assert!(bodies.contains(&r#"{"name": "Grace"}"#.to_owned()));
}
