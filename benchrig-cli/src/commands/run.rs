// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `benchrig run` command - Run a scenario file through the experiment matrix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use benchrig_core::{
    ConfigResolver, Device, ExperimentMatrix, ExperimentMatrixBuilder, Orchestrator, RigResult,
    RunOptions, RunSummary, Scenario, VmConfig,
};
use clap::Args;
use serde::Deserialize;

use crate::error::{CliError, CliResult, EXIT_TRIAL_FAILURE};

/// Instrument used when none is requested.
const DEFAULT_INSTRUMENT: &str = "runtime";

#[derive(Debug, Args)]
pub struct RunArgs {
    /// YAML file listing the scenarios to run
    #[arg(short, long)]
    pub scenarios: PathBuf,

    /// Device to run on (defaults to `local`)
    #[arg(short = 'e', long)]
    pub device: Option<String>,

    /// VM configuration to run under (repeatable)
    #[arg(long = "vm")]
    pub vms: Vec<String>,

    /// Instrument to measure with (repeatable)
    #[arg(short, long = "instrument")]
    pub instruments: Vec<String>,

    /// Trials per experiment
    #[arg(long, default_value_t = 1)]
    pub trials: u32,

    /// Retries after a worker crash or timeout
    #[arg(long, default_value_t = 1)]
    pub retries: u32,

    /// Per-attempt timeout in milliseconds
    #[arg(long, default_value_t = 60_000)]
    pub timeout_ms: u64,

    /// Concurrent workers, at most the device's `workers` option
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Print the experiment matrix without running it
    #[arg(long)]
    pub dry_run: bool,
}

/// One entry of a scenario file.
#[derive(Debug, Deserialize)]
struct ScenarioEntry {
    name: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_yaml::Value>,
}

pub async fn execute(resolver: Arc<ConfigResolver>, args: RunArgs) -> CliResult<i32> {
    let scenarios = load_scenarios(&args.scenarios)?;
    let device = Arc::new(Device::resolve(Arc::clone(&resolver), args.device.as_deref())?);
    let matrix = build_matrix(&resolver, &device, scenarios, &args)?;

    if args.dry_run {
        println!("Experiment matrix ({} experiment(s)):", matrix.len());
        for experiment in matrix.iter() {
            println!("  - {}", experiment);
        }
        return Ok(0);
    }

    let options = RunOptions {
        trial_timeout: Duration::from_millis(args.timeout_ms),
        max_retries: args.retries,
        trials: args.trials,
        worker_slots: args.jobs,
        ..RunOptions::default()
    };
    options
        .validate()
        .map_err(|e| CliError::Usage(e.to_string()))?;

    let sinks = super::processor_registry().build_all(&resolver, options.sink_timeout)?;
    let orchestrator = Orchestrator::new(Arc::clone(&device), options, sinks)?;

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    println!(
        "Running {} experiment(s) on device '{}' (run {})",
        matrix.len(),
        device.name(),
        orchestrator.run_id()
    );
    let summary = orchestrator.run(matrix).await?;
    print_summary(&summary);

    Ok(if summary.success() { 0 } else { EXIT_TRIAL_FAILURE })
}

fn build_matrix(
    resolver: &ConfigResolver,
    device: &Device,
    scenarios: Vec<Scenario>,
    args: &RunArgs,
) -> RigResult<ExperimentMatrix> {
    let vms = if args.vms.is_empty() {
        vec![device.default_vm_config()?]
    } else {
        args.vms
            .iter()
            .map(|name| resolver.vm_config(name))
            .collect::<RigResult<Vec<VmConfig>>>()?
    };

    let instruments = if args.instruments.is_empty() {
        vec![DEFAULT_INSTRUMENT.to_string()]
    } else {
        args.instruments.clone()
    };

    ExperimentMatrixBuilder::new()
        .scenarios(scenarios)
        .vms(vms)
        .instruments(instruments)
        .build(resolver)
}

/// Parse a YAML list of `{name, parameters}`. Scalar parameter values are
/// converted to strings.
pub fn load_scenarios(path: &Path) -> CliResult<Vec<Scenario>> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::ScenarioFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_scenarios(path, &content)
}

fn parse_scenarios(path: &Path, content: &str) -> CliResult<Vec<Scenario>> {
    let parse_err = |reason: String| CliError::ScenarioParse {
        path: path.to_path_buf(),
        reason,
    };

    let entries: Vec<ScenarioEntry> =
        serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))?;

    let mut scenarios = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.name.trim().is_empty() {
            return Err(parse_err("scenario name must not be empty".to_string()));
        }
        let mut scenario = Scenario::new(entry.name.trim());
        for (key, value) in entry.parameters {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(parse_err(format!(
                        "parameter '{}' of scenario '{}' must be a scalar, got {:?}",
                        key, scenario.name, other
                    )))
                }
            };
            scenario = scenario.with_parameter(key, value);
        }
        scenarios.push(scenario);
    }
    Ok(scenarios)
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run {}", summary.run_id);
    println!("  Experiments: {}", summary.experiments);
    println!("  Trials:      {}", summary.trials);
    println!("  Succeeded:   {}", summary.succeeded);
    println!("  Failed:      {}", summary.failed);
    println!("  Timed out:   {}", summary.timed_out);
    println!("  Retries:     {}", summary.retries);
    if summary.skipped > 0 {
        println!("  Skipped:     {}", summary.skipped);
    }
    if summary.cancelled {
        println!("  Run was cancelled");
    }

    if !summary.failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &summary.failures {
            println!(
                "  ✗ {} #{} [{}] {}",
                failure.experiment,
                failure.trial_number,
                failure.outcome,
                failure.diagnostics.as_deref().unwrap_or("")
            );
        }
    }
    println!();
    if summary.success() {
        println!("✓ All trials succeeded");
    } else {
        println!("✗ Run finished with failures");
    }
}
