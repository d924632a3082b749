use std::fmt::Display;
use std::fs::File;

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::logging::warn_line;

/// Runs `f` in a dedicated pool of `threads` workers named after `label`, or
/// in the global rayon pool when no bound is set.
pub fn run_in_pool<T, F>(threads: Option<usize>, label: &str, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    let Some(threads) = threads else {
        return Ok(f());
    };
    let prefix = label.replace(' ', "-");
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{prefix}-{i}"))
        .build()
        .with_context(|| format!("{label} thread pool"))?;
    Ok(pool.install(f))
}

/// Caps requested cores at the number of units.
pub fn resolve_threads(cores: Option<usize>, units: usize, label: &str) -> Option<usize> {
    let cores = cores?;
    let capped = cores.clamp(1, units.max(1));
    if capped < cores {
        tracing::warn!("{cores} cores requested for {units} {label} units; using {capped}");
    }
    Some(capped)
}

/// Gathers the outcome of independent units (chromosomes, tissues). Every
/// failure is logged with its unit name; the call fails once all units
/// have been reported.
pub fn collect_unit_results<T>(results: Vec<(String, Result<T>)>, log: &mut File) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (unit, res) in results {
        match res {
            Ok(value) => out.push(value),
            Err(err) => {
                warn_line(log, &format!("{unit} failed: {err:#}"))?;
                failed.push(unit);
            }
        }
    }
    if !failed.is_empty() {
        return Err(anyhow::anyhow!(
            "{} of {} units failed: {}",
            failed.len(),
            failed.len() + out.len(),
            failed.join(", ")
        ));
    }
    Ok(out)
}

/// Applies `f` to every unit, one unit per task in a pool of at most
/// `cores` workers, and returns the results in unit order.
pub fn for_each_unit<U, T, F>(
    cores: Option<usize>,
    label: &str,
    units: &[U],
    log: &mut File,
    f: F,
) -> Result<Vec<T>>
where
    U: Display + Sync,
    T: Send,
    F: Fn(&U) -> Result<T> + Sync,
{
    let threads = resolve_threads(cores, units.len(), label);
    let results = run_in_pool(threads, label, || {
        units
            .par_iter()
            .map(|unit| {
                let name = format!("{label} {unit}");
                let outcome = f(unit).with_context(|| name.clone());
                (name, outcome)
            })
            .collect::<Vec<_>>()
    })?;
    collect_unit_results(results, log)
}
