use std::{sync::Arc, time::Duration};

use volley::{
    check::Check,
    executor::ProfileScheduler,
    profile::{InjectionProfile, Segment},
    report::StdoutReporter,
    scenario::{RequestStep, Scenario},
    transport::HttpTransport,
    Assertion, RecordFeeder, Reporter, RunConfig, Simulation,
};

const CUSTOMERS: &str = "\
name,email
Ada Lovelace,ada@example.com
Alan Turing,alan@example.com
Grace Hopper,grace@example.com
";

const PRODUCTS: &str = "\
productId,quantity
1,1
2,3
3,2
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let customers = Arc::new(RecordFeeder::from_csv("customers", CUSTOMERS)?.circular());
    let products = Arc::new(RecordFeeder::from_csv("products", PRODUCTS)?.circular());

    let journey = Scenario::builder("Complete User Journey")
        .feed(customers)
        .feed(products)
        .request(
            RequestStep::post("Create Customer", "/api/customers")?
                .body(r#"{"name": "${name}", "email": "${email}"}"#)?
                .check(Check::status(201))
                .check(Check::field_exists("$.id")?.save_as("customerId")),
        )
        .pause(Duration::from_secs(1), Duration::from_secs(3))
        .request(
            RequestStep::get("Get Product Details", "/api/products/${productId}")?
                .check(Check::status(200))
                .check(Check::field_exists("$.id")?.save_as("productId")),
        )
        .pause(Duration::from_secs(1), Duration::from_secs(3))
        .request(
            RequestStep::post("Add to Cart", "/api/cart")?
                .body(
                    r#"{"customerId": "${customerId}", "productId": ${productId}, "quantity": ${quantity:-1}}"#,
                )?
                .check(Check::status(200)),
        )
        .pause(Duration::from_secs(1), Duration::from_secs(3))
        .request(
            RequestStep::get("Get Cart", "/api/cart/${customerId}")?.check(Check::status(200)),
        )
        .pause(Duration::from_secs(2), Duration::from_secs(5))
        .request(
            RequestStep::post("Checkout", "/api/cart/${customerId}/checkout")?
                .check(Check::status(200)),
        )
        .build();

    let config = RunConfig::builder()
        .base_url("http://localhost:5000")
        .deadline(Duration::from_secs(120))
        .assertions(vec![
            Assertion::global().max_response_time().lt(10_000.0),
            Assertion::global().mean_response_time().lt(2_000.0),
            Assertion::global().success_rate().gt(50.0),
        ])
        .build()
        .with_header("accept", "application/json")
        .with_header("content-type", "application/json")
        .with_header("user-agent", "volley load test");

    let simulation = Simulation::builder()
        .scenario(journey)
        .executor(
            ProfileScheduler::builder()
                .profile(
                    InjectionProfile::new()
                        .then(Segment::ramp(5, Duration::from_secs(10)))
                        .then(Segment::constant_rate(5.0, Duration::from_secs(30)))
                        .then(Segment::ramp(0, Duration::from_secs(10))),
                )
                .build(),
        )
        .config(config)
        .build();

    let result = simulation.run(HttpTransport::default()).await?;

    StdoutReporter.report(&result.report).await?;
    println!("{}", result.verdict);
    if !result.passed {
        std::process::exit(1);
    }
    Ok(())
}

