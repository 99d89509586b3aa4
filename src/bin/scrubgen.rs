//! scrubgen CLI: operator interface to the preview batch.

use clap::{Parser, Subcommand};
use scrubgen::catalog::{Catalog, DirectoryCatalog};
use scrubgen::config::Config;
use scrubgen::engine::{
    ArtifactGate, ArtifactLayout, IdempotenceGate, LogProgress, Orchestrator, ProgressSink,
};
use scrubgen::generator::CommandGenerator;
use scrubgen::model::{RunStatus, RunSummary};
use scrubgen::schedule::{self, DailyTrigger};
use scrubgen::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "scrubgen", about = "Generate scrubbing preview files for a video library")]
struct Cli {
    /// TOML config file. Falls back to SCRUBGEN_* environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one batch now
    Run {
        /// Override the configured parallelism ceiling
        #[arg(long)]
        parallelism: Option<usize>,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the batch daily at the configured time
    Serve,
    /// List eligible items and whether each still needs an artifact
    Scan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "scrubgen".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Run { parallelism, json } => {
            if let Some(n) = parallelism {
                config.parallelism = n;
            }
            cmd_run(&config, json).await
        }
        Command::Serve => cmd_serve(&config).await,
        Command::Scan => cmd_scan(&config).await,
    }
}

fn layout(config: &Config) -> ArtifactLayout {
    match config.artifact_dir {
        Some(ref dir) => ArtifactLayout::under(dir),
        None => ArtifactLayout::beside_media(),
    }
}

fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    Ok(Orchestrator::new(
        Arc::new(DirectoryCatalog::new(&config.library_dir)),
        Arc::new(ArtifactGate::new(layout(config))),
        Arc::new(
            CommandGenerator::new(&config.generator_command).args(config.generator_args.clone()),
        ),
        config.run_config()?,
    ))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        token.cancel();
    });
}

async fn cmd_run(config: &Config, json: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let progress: Arc<dyn ProgressSink> = Arc::new(LogProgress);
    let summary = orchestrator.run(progress, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    if summary.status == RunStatus::Cancelled {
        anyhow::bail!("run cancelled");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} item(s): {} generated, {} skipped, {} failed, {} cancelled in {:.1}s",
        summary.total,
        summary.completed(),
        summary.skipped(),
        summary.failed(),
        summary.cancelled(),
        summary.elapsed.as_secs_f64()
    );
    for job in summary.jobs.iter().filter(|j| j.outcome.label() == "failed") {
        println!("  {}  {}", job.item.path.display(), job.outcome);
    }
}

async fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);

    schedule::serve(orchestrator, DailyTrigger::new(config.daily_at), shutdown).await?;
    Ok(())
}

async fn cmd_scan(config: &Config) -> anyhow::Result<()> {
    let catalog = DirectoryCatalog::new(&config.library_dir);
    let gate = ArtifactGate::new(layout(config));
    let interval = config.run_config()?.interval;

    let items = catalog.list_eligible().await?;
    if items.is_empty() {
        println!("No videos found under {}.", config.library_dir.display());
        return Ok(());
    }

    println!("{:<8}  {:<7}  PATH", "ID", "STATE");
    println!("{}", "-".repeat(80));

    let mut pending = 0;
    for item in &items {
        if gate.is_fresh(item, interval).await {
            println!("{:<8}  {:<7}  {}", item.id, "fresh", item.path.display());
        } else {
            pending += 1;
            println!("{:<8}  {:<7}  {}", item.id, "pending", item.path.display());
            println!("{:<8}  {:<7}  -> {}", "", "", gate.target_path(item, interval).display());
        }
    }

    println!("\n{} item(s), {} pending", items.len(), pending);
    Ok(())
}
