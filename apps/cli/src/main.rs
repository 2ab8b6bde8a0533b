#![deny(warnings)]

//! Headless CLI running engine analyses over JSON request files.
//!
//! Usage: `agro-cli <command> <request.json> [--config engine.yaml]`
//! Commands: simulate, compare, cost, soil, predict, monte-carlo, rainfall, version.

use agro_core::{
    aggregate_history, resolve_baseline, validate_baseline, validate_scenario, Baseline,
    CostAnalysisInput, EngineConfig, ProductivityRecord, RainfallReading, RegressionSample,
    ScenarioInput, SoilSample,
};
use agro_runtime::{MonteCarloQueue, QueueConfig};
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: agro-cli <simulate|compare|cost|soil|predict|monte-carlo|rainfall|version> <request.json> [--config engine.yaml]";

struct Args {
    command: String,
    input: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut command: Option<String> = None;
    let mut input: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => match it.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => bail!("--config needs a file path\n{USAGE}"),
            },
            "-h" | "--help" => bail!(USAGE),
            _ if command.is_none() => command = Some(arg),
            _ if input.is_none() => input = Some(PathBuf::from(arg)),
            other => bail!("unexpected argument `{other}`\n{USAGE}"),
        }
    }
    let command = command.context(USAGE)?;
    Ok(Args {
        command,
        input,
        config,
    })
}

/// Scenario request: explicit baseline, or history to resolve one from.
#[derive(Deserialize)]
struct SimulateRequest {
    scenario: ScenarioInput,
    #[serde(default)]
    baseline: Option<Baseline>,
    #[serde(default)]
    history: Vec<ProductivityRecord>,
}

#[derive(Deserialize)]
struct CompareRequest {
    scenarios: Vec<ScenarioInput>,
    #[serde(default)]
    baseline: Option<Baseline>,
    #[serde(default)]
    history: Vec<ProductivityRecord>,
}

fn baseline_for(explicit: Option<Baseline>, history: &[ProductivityRecord], cfg: &EngineConfig) -> Result<Baseline> {
    let baseline = explicit.unwrap_or_else(|| resolve_baseline(&aggregate_history(history), cfg));
    validate_baseline(&baseline)?;
    Ok(baseline)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn execute(command: &str, input: &Path, cfg: EngineConfig) -> Result<Value> {
    let out = match command {
        "simulate" => {
            let req: SimulateRequest = read_json(input)?;
            validate_scenario(&req.scenario)?;
            let baseline = baseline_for(req.baseline, &req.history, &cfg)?;
            serde_json::to_value(agro_econ::simulate(&req.scenario, &baseline, &cfg))?
        }
        "compare" => {
            let req: CompareRequest = read_json(input)?;
            for s in &req.scenarios {
                validate_scenario(s)?;
            }
            let baseline = baseline_for(req.baseline, &req.history, &cfg)?;
            serde_json::to_value(agro_econ::compare(&req.scenarios, &baseline, &cfg))?
        }
        "cost" => {
            let req: CostAnalysisInput = read_json(input)?;
            serde_json::to_value(agro_econ::analyze_cost(&req, &cfg)?)?
        }
        "soil" => {
            let samples: Vec<SoilSample> = read_json(input)?;
            serde_json::to_value(agro_analytics::analyze(&samples, &cfg)?)?
        }
        "predict" => {
            let samples: Vec<RegressionSample> = read_json(input)?;
            serde_json::to_value(agro_analytics::predict(&samples, &cfg)?)?
        }
        "rainfall" => {
            let readings: Vec<RainfallReading> = read_json(input)?;
            serde_json::to_value(agro_analytics::summarize_rainfall(&readings))?
        }
        "monte-carlo" => {
            let payload: Map<String, Value> = read_json(input)?;
            let queue = MonteCarloQueue::start(
                QueueConfig {
                    workers: 1,
                    capacity: 1,
                },
                cfg,
            );
            let report = queue.submit_payload(&payload).await?.wait().await;
            queue.shutdown().await;
            serde_json::to_value(report?)?
        }
        other => bail!("unknown command `{other}`\n{USAGE}"),
    };
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON result.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.command == "version" {
        println!(
            "agro-cli {} ({} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }

    let cfg = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let input = args.input.context(USAGE)?;
    info!(command = %args.command, input = %input.display(), "running analysis");

    let out = execute(&args.command, &input, cfg).await?;
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("requests").join(name)
    }

    #[test]
    fn history_resolves_baseline_when_none_given() {
        let history = vec![
            ProductivityRecord {
                yield_bag_ha: 58.0,
                margin_per_ha: Some(1900.0),
                cost_per_ha: Some(4100.0),
            },
            ProductivityRecord {
                yield_bag_ha: 54.0,
                margin_per_ha: Some(1700.0),
                cost_per_ha: Some(4250.0),
            },
        ];
        let b = baseline_for(None, &history, &EngineConfig::default()).unwrap();
        assert_eq!(b.yield_bag_ha, 56.0);
        assert_eq!(b.margin_per_ha, 1800.0);
        assert_eq!(b.cost_per_ha, 4250.0);
        let fallback = baseline_for(None, &[], &EngineConfig::default()).unwrap();
        assert_eq!(fallback.yield_bag_ha, 55.0);
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn config_flag_requires_a_path() {
        let err = parse_args(argv(&["simulate", "req.json", "--config"]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("--config needs a file path"), "{err}");

        let args = parse_args(argv(&["soil", "--config", "engine.yaml", "req.json"])).unwrap();
        assert_eq!(args.command, "soil");
        assert_eq!(args.input, Some(PathBuf::from("req.json")));
        assert_eq!(args.config, Some(PathBuf::from("engine.yaml")));
    }

    #[test]
    fn stray_argument_is_rejected() {
        assert!(parse_args(argv(&["soil", "a.json", "b.json"])).is_err());
        assert!(parse_args(Vec::new()).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bundled_requests_run() {
        let cfg = EngineConfig::load(sample("engine.yaml")).unwrap();
        let sim = execute("simulate", &sample("simulate.json"), cfg.clone()).await.unwrap();
        assert_eq!(sim["scenario_name"], "SOJA RR-150.0");
        let cmp = execute("compare", &sample("compare.json"), cfg.clone()).await.unwrap();
        assert_eq!(cmp.as_array().map(Vec::len), Some(2));
        let soil = execute("soil", &sample("soil.json"), cfg.clone()).await.unwrap();
        assert_eq!(soil["lime_recommendation_kg_ha"], 250.0);
        let pred = execute("predict", &sample("predict.json"), cfg.clone()).await.unwrap();
        assert_eq!(pred.as_array().map(Vec::len), Some(4));
        let rain = execute("rainfall", &sample("rainfall.json"), cfg.clone()).await.unwrap();
        assert_eq!(rain["count"], 3);
        let cost = execute("cost", &sample("cost.json"), cfg.clone()).await.unwrap();
        assert_eq!(cost["baseline_cost"], 3950.0);
        let mc = execute("monte-carlo", &sample("monte_carlo.json"), cfg).await.unwrap();
        assert_eq!(mc["summary"]["iterations"], 5000);
    }

    #[tokio::test]
    async fn unknown_command_is_an_error() {
        let err = execute("harvest", &sample("simulate.json"), EngineConfig::default()).await;
        assert!(err.is_err());
    }
}
