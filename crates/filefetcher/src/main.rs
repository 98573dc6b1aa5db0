use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use filefetcher::lock::PidLock;
use filefetcher::supervisor;
use filefetcher_core::{Config, OsEnvironment};
use filefetcher_fetch::{ReqwestClient, TransferEngine};

/// Retrieve daily datalogger files, backfilling until each retrieval goal
/// is met.
#[derive(Parser)]
#[command(name = "filefetcher", version)]
struct Cli {
    /// YAML configuration describing queues and dataloggers.
    #[arg(long, env = "FF_CONFIG_FILE")]
    config: PathBuf,

    /// Directory for in-progress downloads and lock files. Defaults to
    /// placing temp files next to their output files.
    #[arg(long, env = "FF_TMP_DIR")]
    tmp_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => {
            info!("that's all for now, bye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = format!("{e:#}"), "fetcher run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let started = Instant::now();

    let config = Config::load(&cli.config, &OsEnvironment)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let _lock = match &cli.tmp_dir {
        Some(dir) => Some(
            PidLock::acquire(dir)
                .with_context(|| format!("acquiring lock in {}", dir.display()))?,
        ),
        None => None,
    };

    let client = ReqwestClient::new().context("building http client")?;
    let engine = TransferEngine::new(client, cli.tmp_dir.clone());

    supervisor::run_all(Arc::new(config), Arc::new(engine), started).await;
    Ok(())
}
