//! Companion binary: terminate fetcher processes that have outlived the
//! hard age limit, and clean up lock files left behind by dead ones.
//!
//! Meant to run from cron alongside the fetcher itself.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use filefetcher::lock;

/// A fetcher still running after a full day is stuck, not slow.
const MAX_RUN_TIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Kill fetcher processes older than the age limit and sweep stale locks.
#[derive(Parser)]
#[command(name = "fetcherreaper", version)]
struct Cli {
    /// Directory holding the fetcher's `<pid>.lock` files.
    #[arg(long, env = "FF_TMP_DIR")]
    tmp_dir: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "reaper run failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let locks = lock::scan_locks(&cli.tmp_dir)
        .with_context(|| format!("scanning {}", cli.tmp_dir.display()))?;
    if locks.is_empty() {
        info!("no lock files, nothing to do");
        return Ok(());
    }

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    for (pid, path) in locks {
        match system.process(Pid::from_u32(pid)) {
            None => {
                info!(pid, "process is gone, removing its stale lock");
                remove_lock(&path);
            }
            Some(process) => {
                let age = Duration::from_secs(process.run_time());
                if age > MAX_RUN_TIME {
                    warn!(pid, age_secs = age.as_secs(), "terminating overdue fetcher");
                    if process.kill() {
                        remove_lock(&path);
                    } else {
                        error!(pid, "could not terminate process");
                    }
                } else {
                    info!(pid, age_secs = age.as_secs(), "fetcher still within its age limit");
                }
            }
        }
    }
    Ok(())
}

fn remove_lock(path: &std::path::Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "cannot remove lock file"),
    }
}
