use anyhow::Context;
use clap::{Parser, Subcommand};
use latchkey::analysis::Analysis;
use latchkey::analysis::cpa::shutdown::ShutdownNotifier;
use latchkey::analysis::pointer::{PointerAnalysis, PointsToDump};
use latchkey::analysis::race::{AssumeTrueRefiner, UsageAlgorithm};
use latchkey::analysis::rcu::{RcuAnalysis, RcuReport, RcuSearchAnalysis};
use latchkey::cfa::Cfa;
use latchkey::LatchkeyConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct LatchkeyParams {
    #[command(subcommand)]
    pub command: Commands,
    /// Configuration file; defaults to the per-user latchkey configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Stop the race analysis after this many seconds, keeping partial results
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Detect data races and print the usage report
    Races { cfa: PathBuf },
    /// Print the points-to map of the whole program
    PointsTo { cfa: PathBuf },
    /// Find RCU pointers and print what aliases them
    Rcu { cfa: PathBuf },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let params = LatchkeyParams::parse();
    let config = load_config(params.config.as_deref())?;
    config.validate().context("invalid configuration")?;
    match params.command {
        Commands::Races { cfa } => races(config, &load_cfa(&cfa)?, params.timeout),
        Commands::PointsTo { cfa } => points_to(config, &load_cfa(&cfa)?),
        Commands::Rcu { cfa } => rcu(config, &load_cfa(&cfa)?),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LatchkeyConfig> {
    let config = match path {
        Some(path) => confy::load_path(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => confy::load("latchkey", None).context("loading the latchkey configuration")?,
    };
    Ok(config)
}

fn load_cfa(path: &Path) -> anyhow::Result<Cfa> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Cfa::from_json(&text).with_context(|| format!("loading the CFA in {}", path.display()))
}

/// Raises `shutdown` once `seconds` have passed.
fn start_watchdog(shutdown: &ShutdownNotifier, seconds: u64) {
    let shutdown = shutdown.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(seconds));
        tracing::warn!(seconds, "timeout reached, stopping the analysis");
        shutdown.request_shutdown();
    });
}

fn races(config: LatchkeyConfig, cfa: &Cfa, timeout: Option<u64>) -> anyhow::Result<()> {
    let shutdown = ShutdownNotifier::new();
    if let Some(seconds) = timeout {
        start_watchdog(&shutdown, seconds);
    }
    let mut algorithm = UsageAlgorithm::new(config, AssumeTrueRefiner, shutdown);
    let report = algorithm.run(cfa)?;
    println!("{}", report.to_json()?);
    Ok(())
}

fn points_to(config: LatchkeyConfig, cfa: &Cfa) -> anyhow::Result<()> {
    let mut analysis = PointerAnalysis::new(config.pointer);
    let result = analysis.run(cfa)?;
    let dump = PointsToDump::from_state(&analysis.summarize(&result.reached));
    tracing::info!(
        reached = result.reached.len(),
        map_size = dump.statistics().map_size,
        "points-to analysis finished"
    );
    println!("{}", dump.to_json()?);
    Ok(())
}

fn rcu(config: LatchkeyConfig, cfa: &Cfa) -> anyhow::Result<()> {
    let search = RcuSearchAnalysis::new(config.rcu.clone(), config.pointer).run(cfa)?;
    let analysis = RcuAnalysis::new(config.rcu).run(cfa)?;
    let report = RcuReport::new(&search.reached, &analysis.reached);
    println!("{}", report.to_json()?);
    Ok(())
}
