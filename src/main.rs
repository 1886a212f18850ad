use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tradelens::{AppConfig, Execution};

#[derive(Parser)]
#[command(name = "tradelens")]
#[command(about = "Post-trade analysis: FIFO matching, price reconciliation and exit simulation")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match executions, fetch prices and simulate alternative exits
    Analyze {
        /// JSON array of normalized executions
        #[arg(short, long)]
        executions: PathBuf,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the configured price sources in the order they are tried
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Analyze { executions, output } => analyze(&config, executions, output).await,
        Commands::Sources => list_sources(&config),
    }
}

async fn analyze(config: &AppConfig, executions: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let raw = std::fs::read_to_string(&executions)
        .with_context(|| format!("Failed to read {}", executions.display()))?;
    let executions: Vec<Execution> =
        serde_json::from_str(&raw).context("Failed to parse executions JSON")?;

    let orchestrator = Arc::new(
        config
            .build_orchestrator()
            .context("Failed to build price sources")?,
    );
    if orchestrator.source_names().is_empty() {
        tracing::warn!("No price sources configured, every position will be skipped");
    }

    tracing::info!(
        "Analyzing {} executions with sources: {}",
        executions.len(),
        orchestrator.source_names().join(", ")
    );

    let analyzer = config.build_analyzer(orchestrator);
    let report = analyzer.analyze(&executions).await;

    let stats = &report.stats;
    tracing::info!(
        "{} trades, win rate {:.1}%, total P&L {:.2}",
        stats.total_trades,
        stats.win_rate,
        stats.total_pnl
    );
    for (position, reason) in report.skipped() {
        tracing::warn!("No price data for {} ({}): {}", position.symbol, position.exit_time, reason);
    }

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

fn list_sources(config: &AppConfig) -> Result<()> {
    let orchestrator = config
        .build_orchestrator()
        .context("Failed to build price sources")?;

    let names = orchestrator.source_names();
    if names.is_empty() {
        println!("No price sources available");
    }
    for (rank, name) in names.iter().enumerate() {
        println!("{}. {}", rank + 1, name);
    }
    Ok(())
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tradelens=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
