use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` takes precedence; otherwise
/// this crate logs at `info`, or `debug` with `verbose`, and dependencies
/// only warn.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,sldsc=debug" } else { "warn,sldsc=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Opens the run log in append mode so successive stages share one file.
pub fn open_log(path: &Path) -> Result<File> {
    crate::io::ensure_parent(path)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))
}

/// Appends `message` to the run log. Lines not printed at `info` still
/// reach tracing at `debug`.
pub fn log_line(log: &mut File, message: &str, print: bool) -> Result<()> {
    if print {
        info!("{message}");
    } else {
        debug!("{message}");
    }
    writeln!(log, "{message}").context("write run log")
}

pub fn warn_line(log: &mut File, message: &str) -> Result<()> {
    warn!("{message}");
    writeln!(log, "WARNING: {message}").context("write run log")
}

/// Logs how long `what` took since `start`.
pub fn log_elapsed(log: &mut File, what: &str, start: Instant) -> Result<()> {
    log_line(
        log,
        &format!("{what} finished in {:.3}s", start.elapsed().as_secs_f64()),
        true,
    )
}
