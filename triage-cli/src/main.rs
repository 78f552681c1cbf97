//! Triage CLI — runs a configured RCA framework against fixture data,
//! one-off or as an interactive REPL.

mod fixture;
mod output;
mod repl;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use triage_core::{
    EngineConfig, Entity, RangeKind, RcaEngine, StageRegistry, urn,
};

use fixture::Fixture;

/// Triage: root-cause analysis for metric anomalies
#[derive(Parser, Debug)]
#[command(name = "triage", version, about, long_about = None)]
struct Cli {
    /// Framework configuration file (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// Fixture data file (YAML)
    #[arg(short, long)]
    data: PathBuf,

    /// Framework to run
    #[arg(short, long, default_value = "metric_rca")]
    framework: String,

    /// Anomaly window size in ms (end defaults to now)
    #[arg(long)]
    window_size: Option<i64>,

    /// Anomaly window start, epoch ms (overrides --window-size)
    #[arg(long)]
    time_start: Option<i64>,

    /// Anomaly window end, epoch ms
    #[arg(long)]
    time_end: Option<i64>,

    /// Also seed a baseline window shifted back by this many ms
    #[arg(long)]
    baseline_offset: Option<i64>,

    /// Additional seed URNs, comma-separated
    #[arg(short, long)]
    entities: Option<String>,

    /// Results shown per entity type in the grouped view
    #[arg(long, default_value_t = 5)]
    group_k: usize,

    /// Interactive REPL mode (seed URNs read from stdin)
    #[arg(short, long)]
    interactive: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn seeds(&self) -> anyhow::Result<Vec<Entity>> {
        let mut seeds = Vec::new();

        let end = self
            .time_end
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let start = match (self.time_start, self.window_size) {
            (Some(start), _) => start,
            (None, Some(size)) => end - size,
            (None, None) => bail!("one of --time-start or --window-size is required"),
        };
        if start >= end {
            bail!("anomaly window is empty: start {start} >= end {end}");
        }
        seeds.push(Entity::time_range(RangeKind::Anomaly, start, end, 1.0));
        if let Some(offset) = self.baseline_offset {
            seeds.push(Entity::time_range(
                RangeKind::Baseline,
                start - offset,
                end - offset,
                1.0,
            ));
        }

        if let Some(entities) = &self.entities {
            for u in entities.split(',').map(str::trim).filter(|u| !u.is_empty()) {
                seeds.push(urn::parse(u, 1.0)?);
            }
        }
        Ok(seeds)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_file(&cli.config)
        .with_context(|| format!("loading framework config {}", cli.config.display()))?;
    let collaborators = Fixture::from_file(&cli.data)?.into_collaborators();
    let engine = RcaEngine::from_config(&config, &StageRegistry::with_builtins(), &collaborators)
        .context("building frameworks")?;

    if cli.interactive {
        return repl::run(&engine, &cli.framework, cli.group_k).await;
    }

    let result = engine.run(&cli.framework, cli.seeds()?).await?;
    print!("{}", output::render(&result.results, cli.group_k));
    Ok(())
}
