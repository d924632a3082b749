use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::warn;

use crate::config::PathConfig;
use crate::inputs::read_weights;
use crate::io::{create_gz, f64_column, open_maybe_compressed, read_table_with_separator, string_column};
use crate::logging::log_line;

/// Column holding the effect size.
#[derive(Debug, Clone)]
pub enum EffectColumn {
    Beta(String),
    OddsRatio(String),
}

/// Raw column names for the fields the munger needs.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub chromosome: String,
    pub position: String,
    pub reference: String,
    pub alt: String,
    pub p_value: String,
    pub effect: EffectColumn,
    pub n: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MungeConfig {
    pub dataset: String,
    /// Raw GWAS file, relative to `{data_root}/raw` unless absolute.
    pub file: PathBuf,
    pub ancestry: String,
    pub genome_build: String,
    pub separator: Option<u8>,
    pub columns: ColumnMap,
    pub effective_n: Option<f64>,
    pub chromosomes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MungeCounts {
    pub total: usize,
    pub translated: usize,
    pub flipped: usize,
    /// Lines with a missing id field, an unparsable value or p outside (0, 1].
    pub errors: usize,
}

/// `chr:pos:REF:ALT` with upper-cased alleles.
pub fn variant_id(chromosome: &str, position: &str, reference: &str, alt: &str) -> String {
    format!(
        "{chromosome}:{position}:{}:{}",
        reference.to_ascii_uppercase(),
        alt.to_ascii_uppercase()
    )
}

/// Signed z-score for a two-sided p-value; negative when `beta < 0`.
pub fn p_to_z(p: f64, beta: f64) -> f64 {
    let magnitude = match Normal::new(0.0, 1.0) {
        Ok(norm) => norm.inverse_cdf(p / 2.0).abs(),
        Err(_) => f64::NAN,
    };
    if beta < 0.0 { -magnitude } else { magnitude }
}

/// Linear-interpolated quantile of unsorted values.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Keeps SNPs whose sample size is at least the 90th percentile over 1.5.
pub fn filter_sample_size(records: Vec<(String, f64, f64)>) -> HashMap<String, (f64, f64)> {
    let sizes: Vec<f64> = records.iter().map(|r| r.2).collect();
    let Some(n90) = quantile(&sizes, 0.9) else {
        return HashMap::new();
    };
    records
        .into_iter()
        .filter(|r| r.2 >= n90 / 1.5)
        .map(|(rsid, z, n)| (rsid, (z, n)))
        .collect()
}

/// `var_id \t rsid` rows.
pub fn read_snpmap(path: &Path) -> Result<HashMap<String, String>> {
    let reader = open_maybe_compressed(path)?;
    let mut out = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split('\t');
        if let (Some(var_id), Some(rsid)) = (fields.next(), fields.next()) {
            out.insert(var_id.trim().to_string(), rsid.trim().to_string());
        }
    }
    Ok(out)
}

/// Translates a raw GWAS file to `SNP Z N` rows keyed by rsid.
pub fn translate(
    path: &Path,
    config: &MungeConfig,
    standard: &HashMap<String, String>,
    flipped: &HashMap<String, String>,
) -> Result<(Vec<(String, f64, f64)>, MungeCounts)> {
    let df = read_table_with_separator(path, config.separator)?;
    let cols = &config.columns;
    let chromosome = string_column(&df, &cols.chromosome)?;
    let position = string_column(&df, &cols.position)?;
    let reference = string_column(&df, &cols.reference)?;
    let alt = string_column(&df, &cols.alt)?;
    let p_value = f64_column(&df, &cols.p_value)?;
    let effect = match &cols.effect {
        EffectColumn::Beta(name) => f64_column(&df, name)?,
        EffectColumn::OddsRatio(name) => f64_column(&df, name)?
            .into_iter()
            .map(|v| v.map(f64::ln))
            .collect(),
    };
    let n = match (&cols.n, config.effective_n) {
        (_, Some(effective)) => vec![Some(effective); df.height()],
        (Some(name), None) => f64_column(&df, name)?,
        (None, None) => vec![None; df.height()],
    };

    let mut counts = MungeCounts {
        total: df.height(),
        ..MungeCounts::default()
    };
    let mut out = Vec::new();
    for i in 0..df.height() {
        if [&chromosome[i], &position[i], &reference[i], &alt[i]]
            .iter()
            .any(|v| v.is_empty())
        {
            counts.errors += 1;
            continue;
        }
        // Unparsable numeric fields arrive as nulls.
        let (Some(p), Some(beta), Some(sample_size)) = (p_value[i], effect[i], n[i]) else {
            counts.errors += 1;
            continue;
        };
        if !(p > 0.0 && p <= 1.0) || !beta.is_finite() || !sample_size.is_finite() {
            counts.errors += 1;
            continue;
        }
        let var_id = variant_id(&chromosome[i], &position[i], &reference[i], &alt[i]);
        let (rsid, beta, is_flipped) = if let Some(rsid) = standard.get(&var_id) {
            (rsid, beta, false)
        } else if let Some(rsid) = flipped.get(&var_id) {
            (rsid, -beta, true)
        } else {
            continue;
        };
        out.push((rsid.clone(), p_to_z(p, beta), sample_size));
        if is_flipped {
            counts.flipped += 1;
        }
    }
    counts.translated = out.len();
    Ok((out, counts))
}

/// Writes `SNP Z N` rows in reference order; SNPs absent from the dataset
/// get empty Z and N.
pub fn write_sumstats<'a>(
    data: &HashMap<String, (f64, f64)>,
    reference: impl IntoIterator<Item = &'a String>,
    path: &Path,
) -> Result<usize> {
    let mut out = create_gz(path)?;
    writeln!(out, "SNP\tZ\tN")?;
    let mut written = 0usize;
    for rsid in reference {
        match data.get(rsid) {
            Some((z, n)) => {
                writeln!(out, "{rsid}\t{}\t{n}", (z * 1000.0).round() / 1000.0)?;
                written += 1;
            }
            None => writeln!(out, "{rsid}\t\t")?,
        }
    }
    out.finish()?.flush()?;
    Ok(written)
}

pub fn munge(paths: &PathConfig, config: &MungeConfig, log: &mut File) -> Result<MungeCounts> {
    let raw = paths.raw(&config.file);
    log_line(log, &format!("Munging file: {}", raw.display()), true)?;

    let standard = read_snpmap(&paths.snpmap("standard", &config.genome_build, &config.ancestry))
        .context("standard SNP map")?;
    let flipped = read_snpmap(&paths.snpmap("flipped", &config.genome_build, &config.ancestry))
        .context("flipped SNP map")?;

    let (records, counts) = translate(&raw, config, &standard, &flipped)?;
    log_line(
        log,
        &format!(
            "{} SNPs translated from a total of {} ({} invalid lines, {} flipped)",
            counts.translated, counts.total, counts.errors, counts.flipped
        ),
        true,
    )?;
    if records.is_empty() {
        warn!("no SNPs of {} could be translated", config.dataset);
        return Ok(counts);
    }

    let data = filter_sample_size(records);
    let reference = read_weights(paths, &config.ancestry, &config.chromosomes)?;
    let out_path = paths.sumstats(&config.dataset, &config.ancestry);
    let written = write_sumstats(&data, &reference.rsids, &out_path)?;
    log_line(
        log,
        &format!(
            "Wrote {written} of {} reference SNPs to {}",
            reference.rsids.len(),
            out_path.display()
        ),
        true,
    )?;
    Ok(counts)
}
