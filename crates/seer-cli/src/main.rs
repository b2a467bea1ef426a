//! `seer`: runs the world-model core loop from the command line.
//!
//! ```text
//! seer run --config server.toml --world kitchen.json --measurements feed.jsonl --cycles 200
//! seer check --config server.toml
//! seer plugins
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use seer_core::model::ModelLibrary;
use seer_core::sensor::MeasurementFeed;
use seer_core::{Measurement, PluginRegistry, Server, ServerConfig};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "seer", version, about = "Seer world-model server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the core loop for a fixed number of cycles
    Run(RunArgs),
    /// Validate a configuration and instantiate its plugins
    Check(CheckArgs),
    /// List the built-in plugin kinds
    Plugins,
}

#[derive(Args)]
struct RunArgs {
    /// Server configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Model library (JSON object of model name to description)
    #[arg(long)]
    library: Option<PathBuf>,
    /// World description to load before the first cycle (JSON)
    #[arg(long)]
    world: Option<PathBuf>,
    /// Recorded measurements, one JSON object per line
    #[arg(long)]
    measurements: Option<PathBuf>,
    /// Number of cycles to run
    #[arg(long, default_value_t = 100)]
    cycles: u64,
    /// Seconds between cycles
    #[arg(long, default_value_t = 0.1)]
    dt: f64,
    /// Write the final world model here (JSON)
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Args)]
struct CheckArgs {
    /// Server configuration (TOML)
    #[arg(long)]
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run(&args),
        Commands::Check(args) => check(&args),
        Commands::Plugins => {
            for kind in PluginRegistry::with_builtins().kinds() {
                println!("{kind}");
            }
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    match path {
        Some(path) => {
            ServerConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => Ok(ServerConfig::default()),
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("parsing {}", path.display()))
}

/// Reads a JSON-lines measurement log, sorted by timestamp.
fn read_measurements(path: &Path) -> Result<Vec<Measurement>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut measurements = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let measurement: Measurement = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid measurement", path.display(), line_no + 1))?;
        measurements.push(measurement);
    }
    measurements.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
    Ok(measurements)
}

fn run(args: &RunArgs) -> Result<()> {
    if args.dt.is_nan() || args.dt <= 0.0 {
        bail!("--dt must be positive");
    }

    let config = load_config(args.config.as_deref())?;
    let mut server = Server::from_config(config, &PluginRegistry::with_builtins())?;

    if let Some(path) = &args.library {
        let library = ModelLibrary::from_json(&read_json(path)?)
            .with_context(|| format!("loading model library {}", path.display()))?;
        tracing::info!(models = library.len(), "model library loaded");
        server.set_model_library(library);
    }

    if let Some(path) = &args.world {
        let report = server.load_world(&read_json(path)?, 0.0);
        for diagnostic in &report.diagnostics {
            tracing::warn!(%diagnostic, "model entity skipped");
        }
    }

    let mut pending = match &args.measurements {
        Some(path) => read_measurements(path)?,
        None => Vec::new(),
    }
    .into_iter()
    .peekable();
    let (tx, feed) = MeasurementFeed::channel();
    server.add_sensor(Box::new(feed));

    let mut now = 0.0;
    for _ in 0..args.cycles {
        while let Some(measurement) = pending.next_if(|m| m.timestamp() <= now) {
            tx.send(measurement).context("measurement feed closed")?;
        }
        let report = server.step(now);
        if !report.apply.is_clean() {
            tracing::warn!(
                cycle = report.cycle,
                absorbed = report.apply.absorbed.len(),
                rejected = report.apply.rejected.len(),
                "update requests partially applied"
            );
        }
        now += args.dt;
    }

    let shutdown = server.shutdown();
    if !shutdown.is_clean() {
        tracing::warn!(
            abandoned = ?shutdown.abandoned,
            perception = shutdown.perception_abandoned,
            "executions abandoned at shutdown"
        );
    }

    let world = server.snapshot().to_json()?;
    match &args.export {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &world)?;
            tracing::info!(path = %path.display(), entities = server.store().len(), "world exported");
        }
        None => println!("{}", serde_json::to_string_pretty(&world)?),
    }
    Ok(())
}

fn check(args: &CheckArgs) -> Result<()> {
    let config = load_config(Some(&args.config))?;
    let mut server = Server::from_config(config, &PluginRegistry::with_builtins())?;
    for (name, state, _, _) in server.plugin_status() {
        println!("{name}: {state:?}");
    }
    println!("{} properties registered", server.properties().len());
    let _ = server.shutdown();
    Ok(())
}
