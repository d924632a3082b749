use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use tracing::{info, warn};

use crate::annotation::read_annotation;
use crate::config::{LdScoreConfig, PathConfig};
use crate::error::SldscError;
use crate::genotype::{GenotypePanel, MISSING, PanelId};
use crate::io::{create_gz, open_maybe_compressed, write_scalar};
use crate::logging::log_line;
use crate::parallel::for_each_unit;
use crate::types::{AlignmentReport, LdScoreRecord, SnpCountStat};
use crate::window::{Window, window_bounds};

const MAF_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct ChromosomeLdScores {
    pub chromosome: u8,
    pub records: Vec<LdScoreRecord>,
    pub counts: SnpCountStat,
    pub alignment: AlignmentReport,
    /// Hapmap SNPs left without a score because their calls do not vary.
    pub invariant: AlignmentReport,
}

/// Rows whose observed calls are not all identical.
pub fn variable_rows(genotypes: ArrayView2<u8>) -> Vec<bool> {
    genotypes
        .rows()
        .into_iter()
        .map(|row| {
            let mut observed = row.iter().filter(|&&g| g != MISSING);
            match observed.next() {
                Some(first) => observed.any(|g| g != first),
                None => false,
            }
        })
        .collect()
}

/// Centres and scales each row to mean 0 and population standard deviation 1.
/// Missing calls take the row mean of the observed calls.
pub fn normalize_rows(genotypes: ArrayView2<u8>) -> crate::error::Result<Array2<f64>> {
    let mut out = Array2::<f64>::zeros(genotypes.raw_dim());
    for (i, (row, mut target)) in genotypes
        .rows()
        .into_iter()
        .zip(out.rows_mut())
        .enumerate()
    {
        let (sum, count) = row
            .iter()
            .filter(|&&g| g != MISSING)
            .fold((0.0, 0usize), |(s, c), &g| (s + g as f64, c + 1));
        if count == 0 {
            return Err(SldscError::Precondition(format!(
                "row {i} has no observed genotype calls"
            )));
        }
        let mean = sum / count as f64;
        for (t, &g) in target.iter_mut().zip(row.iter()) {
            *t = if g == MISSING { 0.0 } else { g as f64 - mean };
        }
        let var = target.iter().map(|v| v * v).sum::<f64>() / target.len() as f64;
        let std = var.sqrt();
        if !(std > 0.0) {
            return Err(SldscError::Precondition(format!(
                "row {i} has zero variance and cannot be normalised"
            )));
        }
        target.mapv_inplace(|v| v / std);
    }
    Ok(out)
}

/// M and M_5_50 for the annotation SNPs that survived filtering.
pub fn snp_count_stat(genotypes: ArrayView2<u8>) -> SnpCountStat {
    let m_5_50 = genotypes
        .rows()
        .into_iter()
        .filter(|row| {
            let (sum, count) = row
                .iter()
                .filter(|&&g| g != MISSING)
                .fold((0.0, 0usize), |(s, c), &g| (s + g as f64, c + 1));
            if count == 0 {
                return false;
            }
            let af = sum / 2.0 / count as f64;
            af.min(1.0 - af) > MAF_THRESHOLD
        })
        .count();
    SnpCountStat {
        m: genotypes.nrows(),
        m_5_50,
    }
}

/// Bias-adjusted windowed sum of squared correlations between each query
/// row of `x` and the reference rows of `y` inside its window.
pub fn ld_scores(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    windows: &[Window],
    n: usize,
) -> crate::error::Result<Array1<f64>> {
    if n < 3 {
        return Err(SldscError::Precondition(format!(
            "LD score adjustment needs at least 3 individuals, got {n}"
        )));
    }
    if windows.len() != x.nrows() {
        return Err(SldscError::InvalidArgument(format!(
            "{} windows for {} query SNPs",
            windows.len(),
            x.nrows()
        )));
    }
    if x.ncols() != n || y.ncols() != n {
        return Err(SldscError::InvalidArgument(format!(
            "matrices have {} and {} columns, expected {n}",
            x.ncols(),
            y.ncols()
        )));
    }
    let nf = n as f64;
    let mut out = Array1::<f64>::zeros(x.nrows());
    for (i, window) in windows.iter().enumerate() {
        if window.is_empty() {
            continue;
        }
        if window.end > y.nrows() {
            return Err(SldscError::InvalidArgument(format!(
                "window {}..{} exceeds {} reference SNPs",
                window.left,
                window.end,
                y.nrows()
            )));
        }
        let v = y.slice(s![window.range(), ..]).dot(&x.row(i)) / nf;
        out[i] = ((nf - 1.0) * v.dot(&v) - window.len() as f64) / (nf - 2.0);
    }
    Ok(out)
}

/// LD scores of the hapmap SNPs against the annotated SNPs of one panel.
pub fn compute_chromosome(
    panel: &GenotypePanel,
    hapmap: &HashSet<String>,
    annotation: &[bool],
    window_cm: f64,
) -> crate::error::Result<ChromosomeLdScores> {
    if annotation.len() != panel.num_snps() {
        return Err(SldscError::InvalidArgument(format!(
            "{}: annotation has {} rows for {} panel SNPs",
            panel.id,
            annotation.len(),
            panel.num_snps()
        )));
    }

    let query_idx: Vec<usize> = panel
        .snps
        .iter()
        .enumerate()
        .filter(|(_, snp)| hapmap.contains(&snp.rsid))
        .map(|(i, _)| i)
        .collect();
    let mut alignment = AlignmentReport::new("hapmap", "reference panel");
    alignment.missing = hapmap.len().saturating_sub(query_idx.len());
    let query_total = query_idx.len();

    let annot_idx: Vec<usize> = annotation
        .iter()
        .enumerate()
        .filter(|(_, flag)| **flag)
        .map(|(i, _)| i)
        .collect();

    let (x, query_idx) = variable_subset(panel.decode(&query_idx)?, query_idx);
    let mut invariant = AlignmentReport::new("hapmap", "variable panel SNPs");
    invariant.missing = query_total - query_idx.len();
    let (y, annot_idx) = variable_subset(panel.decode(&annot_idx)?, annot_idx);
    let counts = snp_count_stat(y.view());

    let x_norm = normalize_rows(x.view())?;
    let y_norm = normalize_rows(y.view())?;

    let x_cm: Vec<f64> = query_idx.iter().map(|&i| panel.snps[i].cm).collect();
    let y_cm: Vec<f64> = annot_idx.iter().map(|&i| panel.snps[i].cm).collect();
    let windows = window_bounds(&x_cm, &y_cm, window_cm)?;

    let l2 = ld_scores(
        x_norm.view(),
        y_norm.view(),
        &windows,
        panel.num_individuals,
    )?;

    let records = query_idx
        .iter()
        .zip(l2.iter())
        .map(|(&i, &l2)| {
            let snp = &panel.snps[i];
            LdScoreRecord {
                chromosome: snp.chromosome.clone(),
                rsid: snp.rsid.clone(),
                bp: snp.bp,
                l2,
            }
        })
        .collect();

    Ok(ChromosomeLdScores {
        chromosome: panel.id.chromosome,
        records,
        counts,
        alignment,
        invariant,
    })
}

/// Drops the decoded rows whose calls do not vary, with their panel indices.
fn variable_subset(genotypes: Array2<u8>, indices: Vec<usize>) -> (Array2<u8>, Vec<usize>) {
    let kept: Vec<usize> = variable_rows(genotypes.view())
        .iter()
        .enumerate()
        .filter(|(_, k)| **k)
        .map(|(i, _)| i)
        .collect();
    if kept.len() == indices.len() {
        return (genotypes, indices);
    }
    let rows = genotypes.select(Axis(0), &kept);
    let indices = kept.iter().map(|&i| indices[i]).collect();
    (rows, indices)
}

pub fn write_ld_scores(records: &[LdScoreRecord], path: &Path) -> Result<()> {
    let mut out = create_gz(path)?;
    writeln!(out, "CHR\tSNP\tBP\tL2")?;
    for record in records {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            record.chromosome,
            record.rsid,
            record.bp,
            round3(record.l2)
        )?;
    }
    out.finish()?.flush()?;
    Ok(())
}

pub fn write_snp_counts(counts: SnpCountStat, m_path: &Path, m_5_50_path: &Path) -> Result<()> {
    write_scalar(counts.m, m_path)?;
    write_scalar(counts.m_5_50, m_5_50_path)?;
    Ok(())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Hapmap SNP list: one rsid per line.
pub fn read_hapmap(path: &Path) -> Result<HashSet<String>> {
    let reader = open_maybe_compressed(path)?;
    let mut out = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let rsid = line.trim();
        if !rsid.is_empty() {
            out.insert(rsid.to_string());
        }
    }
    Ok(out)
}

fn run_chromosome(
    paths: &PathConfig,
    config: &LdScoreConfig,
    chromosome: u8,
) -> Result<SnpCountStat> {
    let start = Instant::now();
    let id = PanelId {
        ancestry: config.ancestry.clone(),
        chromosome,
    };
    let panel = GenotypePanel::open(&paths.panel_stem(&config.ancestry, chromosome), id)?;
    let hapmap = read_hapmap(&paths.hapmap(chromosome))?;
    let annotation = read_annotation(&paths.annotation(&config.ancestry, chromosome))?;

    let result = compute_chromosome(&panel, &hapmap, &annotation, config.window_cm)?;
    result.alignment.log(&format!("chromosome {chromosome}"));
    result.invariant.log(&format!("chromosome {chromosome}"));

    write_ld_scores(
        &result.records,
        &paths.ld_output(&config.ancestry, chromosome, "l2.ldscore.gz"),
    )?;
    write_snp_counts(
        result.counts,
        &paths.ld_output(&config.ancestry, chromosome, "l2.M"),
        &paths.ld_output(&config.ancestry, chromosome, "l2.M_5_50"),
    )?;
    info!(
        "chromosome {chromosome}: {} LD scores, M = {}, M_5_50 = {} ({:.3}s)",
        result.records.len(),
        result.counts.m,
        result.counts.m_5_50,
        start.elapsed().as_secs_f64()
    );
    Ok(result.counts)
}

/// Computes and writes LD scores for every configured chromosome, one
/// chromosome per worker. Returns the summed SNP counts.
pub fn compute_ld_scores(
    paths: &PathConfig,
    config: &LdScoreConfig,
    cores: Option<usize>,
    log: &mut File,
) -> Result<SnpCountStat> {
    let start = Instant::now();
    log_line(
        log,
        &format!(
            "Computing LD scores for {} ({} chromosomes, window {} cM)",
            config.ancestry,
            config.chromosomes.len(),
            config.window_cm
        ),
        true,
    )?;
    let counts = for_each_unit(cores, "chromosome", &config.chromosomes, log, |&chromosome| {
        run_chromosome(paths, config, chromosome)
    })?;
    let total = counts
        .into_iter()
        .fold(SnpCountStat::default(), |acc, c| acc + c);
    if total.m == 0 {
        warn!("no annotated SNPs survived filtering for {}", config.ancestry);
    }
    log_line(
        log,
        &format!(
            "LD scores done: M = {}, M_5_50 = {} ({:.3}s)",
            total.m,
            total.m_5_50,
            start.elapsed().as_secs_f64()
        ),
        true,
    )?;
    Ok(total)
}
