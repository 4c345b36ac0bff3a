/// File logging. stdout belongs to the shell session, so logs go to
/// `$XDG_DATA_HOME/shellpilot/shellpilot.log` instead.
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("shellpilot.log")
}

/// `RUST_LOG` wins when set; otherwise warn, or info with `--verbose`.
pub fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "info" } else { "warn" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn init(data_dir: &Path, verbose: bool) -> Result<PathBuf> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let path = log_path(data_dir);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))?;
    Ok(path)
}
