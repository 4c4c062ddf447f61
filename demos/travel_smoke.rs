//! Smoke test against the travel-plans API.
//!
//! ```text
//! BASE_URL=http://127.0.0.1:8000 cargo run --example travel_smoke [config.yaml] [result.json]
//! ```
//!
//! Without a config file it runs 1 VU for 1 minute with the usual smoke thresholds.

use anyhow::Context;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use volley::{Orchestrator, RunConfig, VuContext};

const SMOKE: &str = r#"
vus: 1
duration: 1m
sleep: 1s
thresholds:
  http_req_duration: ["p(95)<500"]
  http_req_failed: ["rate<0.01"]
"#;

const TITLES: &[&str] = &[
    "Summer Vacation in Europe",
    "Winter Ski Trip",
    "Beach Holiday",
    "City Break",
    "Adventure Travel",
    "Cultural Tour",
    "Road Trip",
    "Mountain Hiking",
];
const CITIES: &[&str] = &[
    "Paris", "London", "Rome", "Barcelona", "Amsterdam", "Berlin", "Prague", "Vienna", "Budapest", "Krakow",
];
const CURRENCIES: &[&str] = &["USD", "EUR", "UAH", "GBP"];

fn suffix(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

fn travel_plan() -> Value {
    let mut rng = rand::thread_rng();
    let start = rng.gen_range(1..=14);
    json!({
        "title": format!("{} {}", TITLES.choose(&mut rng).unwrap_or(&"Trip"), suffix(&mut rng, 5)),
        "description": "An amazing journey through beautiful places",
        "start_date": format!("2030-06-{:02}", start),
        "end_date": format!("2030-06-{:02}", start + rng.gen_range(3..=14)),
        "budget": rng.gen_range(500..=10_000),
        "currency": CURRENCIES.choose(&mut rng).unwrap_or(&"USD"),
        "is_public": rng.gen_bool(0.5),
    })
}

fn location(plan_id: &Value) -> Value {
    let mut rng = rand::thread_rng();
    let arrival = rng.gen_range(1..=20);
    json!({
        "travel_plan_id": plan_id,
        "name": format!("{} {}", CITIES.choose(&mut rng).unwrap_or(&"Lviv"), suffix(&mut rng, 3)),
        "address": "123 Main Street",
        "latitude": format!("{:.6}", rng.gen_range(-90.0..90.0)),
        "longitude": format!("{:.6}", rng.gen_range(-180.0..180.0)),
        "visit_order": rng.gen_range(1..=10),
        "arrival_date": format!("2030-07-{:02}T10:00:00Z", arrival),
        "departure_date": format!("2030-07-{:02}T10:00:00Z", arrival + rng.gen_range(1..=5)),
        "budget": rng.gen_range(100..=2000),
        "notes": format!("Test location notes {}", suffix(&mut rng, 10)),
    })
}

/// Path segment for a created plan id; the API may return it as a number or a string.
fn plan_path(id: &Value) -> Option<String> {
    match id {
        Value::Number(n) => n.as_i64().map(|n| n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn smoke(base: &str, vu: &mut VuContext) -> anyhow::Result<()> {
    let health = vu.check_status("health check", 200, |c| c.get(format!("{base}/health")).send());
    vu.rate("errors", health.is_err());

    let created = vu.check_status("create travel plan", 201, |c| {
        c.post(format!("{base}/api/travel-plans/"))
            .json(&travel_plan())
            .send()
    });
    vu.rate("errors", created.is_err());

    let id = match created.ok().and_then(|r| r.json::<Value>().ok()) {
        Some(body) => body["id"].clone(),
        None => return Ok(()),
    };
    let Some(plan) = plan_path(&id) else {
        return Ok(());
    };

    let steps = [
        vu.check_status("get travel plan", 200, |c| {
            c.get(format!("{base}/api/travel-plans/{plan}")).send()
        }),
        vu.check_status("list travel plans", 200, |c| {
            c.get(format!("{base}/api/travel-plans/")).send()
        }),
        vu.check_status("create location", 201, |c| {
            c.post(format!("{base}/api/locations/")).json(&location(&id)).send()
        }),
        vu.check_status("list locations", 200, |c| c.get(format!("{base}/api/locations/")).send()),
    ];
    for step in &steps {
        vu.rate("errors", step.is_err());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => RunConfig::from_path(&PathBuf::from(path))?,
        None => RunConfig::from_yaml_str(SMOKE)?,
    };
    let base = std::env::var("BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());

    let mut orchestrator = Orchestrator::new(config, move |vu: &mut VuContext| smoke(&base, vu));
    let result = orchestrator.run();

    println!("{}", result.to_json()?);
    if let Some(path) = args.next() {
        result
            .write_json(&PathBuf::from(&path))
            .with_context(|| format!("writing {}", path))?;
    }

    if !result.passed() {
        anyhow::bail!("run did not pass: {:?}", result.abort_reason);
    }
    Ok(())
}
