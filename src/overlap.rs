//! Category overlap matrices: `Σ aᵀa` over SNPs inside the allele
//! frequency band, where `a` is a SNP's annotation row.

use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayView2, Axis, concatenate};

use crate::config::PathConfig;
use crate::error::SldscError;
use crate::io::{open_maybe_compressed, read_matrix, write_matrix};
use crate::logging::log_line;
use crate::parallel::for_each_unit;

pub const FRQ_LOWER: f64 = 0.05;
pub const FRQ_UPPER: f64 = 0.95;
const FRQ_COLUMN: usize = 4;
const ID_COLUMNS: [&str; 4] = ["CHR", "BP", "SNP", "CM"];
const CHUNK_ROWS: usize = 4096;

/// `.frq` rows (after the header) whose frequency lies strictly inside
/// `(FRQ_LOWER, FRQ_UPPER)`.
pub fn read_frequency_mask(path: &Path) -> Result<Vec<bool>> {
    let reader = open_maybe_compressed(path)?;
    let mut mask = Vec::new();
    for (line_no, line) in reader.lines().enumerate().skip(1) {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let frq = fields
            .get(FRQ_COLUMN)
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| {
                SldscError::Parse(format!(
                    "{} line {}: no frequency in column {}",
                    path.display(),
                    line_no + 1,
                    FRQ_COLUMN + 1
                ))
            })?;
        mask.push(frq > FRQ_LOWER && frq < FRQ_UPPER);
    }
    Ok(mask)
}

/// Streams the numeric annotation columns of an `.annot` file, skipping the
/// `CHR BP SNP CM` identifier columns when present.
struct AnnotRows {
    path: PathBuf,
    reader: Box<dyn BufRead>,
    columns: Vec<usize>,
    line_no: usize,
}

impl AnnotRows {
    fn open(path: &Path) -> Result<Self> {
        let mut reader = open_maybe_compressed(path)?;
        let mut header = String::new();
        reader.read_line(&mut header)?;
        let columns = header
            .split_whitespace()
            .enumerate()
            .filter(|(_, name)| !ID_COLUMNS.contains(name))
            .map(|(i, _)| i)
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            columns,
            line_no: 1,
        })
    }

    fn width(&self) -> usize {
        self.columns.len()
    }

    /// Appends the next row to `out`; `false` at end of file.
    fn next_row(&mut self, out: &mut Vec<f64>) -> Result<bool> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                break;
            }
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        for &c in &self.columns {
            let value = fields
                .get(c)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| {
                    SldscError::Parse(format!(
                        "{} line {}: column {} is not numeric",
                        self.path.display(),
                        self.line_no,
                        c + 1
                    ))
                })?;
            out.push(value);
        }
        Ok(true)
    }
}

/// Cross products of one chromosome: `(AᵀA, AᵀB, BᵀB)` over rows in the
/// frequency band, `B` optional.
fn chromosome_cross_products(
    left: &Path,
    right: Option<&Path>,
    mask: &[bool],
) -> Result<(Array2<f64>, Option<Array2<f64>>, Option<Array2<f64>>)> {
    let mut left_rows = AnnotRows::open(left)?;
    let mut right_rows = right.map(AnnotRows::open).transpose()?;
    let lw = left_rows.width();
    let rw = right_rows.as_ref().map_or(0, |r| r.width());

    let mut aa = Array2::<f64>::zeros((lw, lw));
    let mut ab = Array2::<f64>::zeros((lw, rw));
    let mut bb = Array2::<f64>::zeros((rw, rw));
    let mut a_buf = Vec::with_capacity(CHUNK_ROWS * lw);
    let mut b_buf = Vec::with_capacity(CHUNK_ROWS * rw);
    let mut scratch = Vec::new();

    let mut flush = |a_buf: &mut Vec<f64>, b_buf: &mut Vec<f64>| -> Result<()> {
        let rows = a_buf.len() / lw.max(1);
        if rows == 0 {
            return Ok(());
        }
        let a = Array2::from_shape_vec((rows, lw), std::mem::take(a_buf))?;
        aa += &a.t().dot(&a);
        if rw > 0 {
            let b = Array2::from_shape_vec((rows, rw), std::mem::take(b_buf))?;
            ab += &a.t().dot(&b);
            bb += &b.t().dot(&b);
        }
        Ok(())
    };

    let mut row = 0usize;
    loop {
        let before = a_buf.len();
        if !left_rows.next_row(&mut a_buf)? {
            break;
        }
        let keep = mask.get(row).copied().ok_or_else(|| {
            anyhow::anyhow!(
                "{} has more rows than the frequency file ({})",
                left.display(),
                mask.len()
            )
        })?;
        if let Some(right_rows) = right_rows.as_mut() {
            scratch.clear();
            if !right_rows.next_row(&mut scratch)? {
                return Err(anyhow::anyhow!(
                    "{} ends before {}",
                    right_rows.path.display(),
                    left.display()
                ));
            }
            if keep {
                b_buf.extend_from_slice(&scratch);
            }
        }
        if !keep {
            a_buf.truncate(before);
        }
        row += 1;
        if a_buf.len() >= CHUNK_ROWS * lw.max(1) {
            flush(&mut a_buf, &mut b_buf)?;
        }
    }
    flush(&mut a_buf, &mut b_buf)?;
    if row != mask.len() {
        return Err(anyhow::anyhow!(
            "{} has {row} rows but the frequency file has {}",
            left.display(),
            mask.len()
        ));
    }
    Ok(if rw > 0 {
        (aa, Some(ab), Some(bb))
    } else {
        (aa, None, None)
    })
}

/// `[[B, BT], [BTᵀ, T]]`.
pub fn assemble(
    baseline: ArrayView2<f64>,
    cross: ArrayView2<f64>,
    category: ArrayView2<f64>,
) -> Result<Array2<f64>> {
    let top = concatenate(Axis(1), &[baseline.view(), cross.view()])?;
    let bottom = concatenate(Axis(1), &[cross.t(), category.view()])?;
    Ok(concatenate(Axis(0), &[top.view(), bottom.view()])?)
}

fn sum_over_chromosomes(
    paths: &PathConfig,
    ancestry: &str,
    chromosomes: &[u8],
    left: impl Fn(u8) -> PathBuf,
    right: Option<&dyn Fn(u8) -> PathBuf>,
) -> Result<(Array2<f64>, Option<Array2<f64>>, Option<Array2<f64>>)> {
    let mut total: Option<(Array2<f64>, Option<Array2<f64>>, Option<Array2<f64>>)> = None;
    for &chromosome in chromosomes {
        let mask = read_frequency_mask(&paths.frq(ancestry, chromosome))?;
        let right_path = right.map(|f| f(chromosome));
        let (aa, ab, bb) = chromosome_cross_products(&left(chromosome), right_path.as_deref(), &mask)
            .with_context(|| format!("chromosome {chromosome}"))?;
        total = Some(match total {
            None => (aa, ab, bb),
            Some((taa, tab, tbb)) => {
                let aa = add_opt(Some(taa), Some(aa))?.unwrap_or_default();
                (aa, add_opt(tab, ab)?, add_opt(tbb, bb)?)
            }
        });
    }
    total.ok_or_else(|| anyhow::anyhow!("no chromosomes configured"))
}

fn add_opt(a: Option<Array2<f64>>, b: Option<Array2<f64>>) -> Result<Option<Array2<f64>>> {
    match (a, b) {
        (Some(a), Some(b)) if a.dim() == b.dim() => Ok(Some(a + b)),
        (None, None) => Ok(None),
        _ => Err(anyhow::anyhow!("annotation widths differ between chromosomes")),
    }
}

pub fn baseline_overlap(paths: &PathConfig, ancestry: &str, chromosomes: &[u8]) -> Result<Array2<f64>> {
    let (aa, _, _) = sum_over_chromosomes(
        paths,
        ancestry,
        chromosomes,
        |c| paths.baseline_file(ancestry, c, "annot.gz"),
        None,
    )?;
    Ok(aa)
}

/// Full overlap for baseline plus one extra category set whose annotation
/// rows follow the baseline annotation rows.
fn extended_overlap(
    paths: &PathConfig,
    ancestry: &str,
    chromosomes: &[u8],
    baseline: ArrayView2<f64>,
    extra: &dyn Fn(u8) -> PathBuf,
) -> Result<Array2<f64>> {
    let (aa, ab, bb) = sum_over_chromosomes(
        paths,
        ancestry,
        chromosomes,
        |c| paths.baseline_file(ancestry, c, "annot.gz"),
        Some(extra),
    )?;
    if aa.dim() != baseline.dim() {
        return Err(anyhow::anyhow!(
            "baseline overlap is {:?} but annotations give {:?}",
            baseline.dim(),
            aa.dim()
        ));
    }
    let (Some(ab), Some(bb)) = (ab, bb) else {
        return Err(anyhow::anyhow!("category annotation has no columns"));
    };
    assemble(baseline, ab.view(), bb.view())
}

pub fn tissue_overlap(
    paths: &PathConfig,
    tissue: &str,
    ancestry: &str,
    chromosomes: &[u8],
    baseline: ArrayView2<f64>,
) -> Result<Array2<f64>> {
    extended_overlap(paths, ancestry, chromosomes, baseline, &|c| {
        paths.tissue_file(tissue, ancestry, c, "annot.gz")
    })
}

/// Overlap of the baseline with the ancestry's custom `ld.{c}.annot.gz`
/// annotation.
pub fn annotation_overlap(
    paths: &PathConfig,
    ancestry: &str,
    chromosomes: &[u8],
    baseline: ArrayView2<f64>,
) -> Result<Array2<f64>> {
    extended_overlap(paths, ancestry, chromosomes, baseline, &|c| paths.annotation(ancestry, c))
}

pub fn overlap_dir(paths: &PathConfig, ancestry: &str) -> PathBuf {
    paths.inputs_dir(ancestry).join("overlap")
}

pub fn baseline_overlap_path(paths: &PathConfig, ancestry: &str) -> PathBuf {
    overlap_dir(paths, ancestry).join("baseline.overlap.gz")
}

pub fn tissue_overlap_path(paths: &PathConfig, tissue: &str, ancestry: &str) -> PathBuf {
    overlap_dir(paths, ancestry).join(format!("{tissue}.overlap.gz"))
}

pub fn load_overlap(path: &Path) -> Result<Array2<f64>> {
    let overlap = read_matrix(path)?;
    if overlap.nrows() != overlap.ncols() || overlap.is_empty() {
        return Err(anyhow::anyhow!(
            "{} is not a non-empty square matrix ({:?})",
            path.display(),
            overlap.dim()
        ));
    }
    Ok(overlap)
}

/// Total SNP count in the frequency band: the base category's diagonal.
pub fn total_snps(overlap: ArrayView2<f64>) -> f64 {
    overlap[[0, 0]]
}

/// Baseline overlap, then one full overlap per tissue with one tissue per
/// worker.
pub fn compute_overlaps(
    paths: &PathConfig,
    ancestry: &str,
    tissues: &[String],
    chromosomes: &[u8],
    cores: Option<usize>,
    log: &mut File,
) -> Result<()> {
    let start = Instant::now();
    let baseline = baseline_overlap(paths, ancestry, chromosomes)?;
    write_matrix(baseline.view(), &baseline_overlap_path(paths, ancestry))?;
    log_line(
        log,
        &format!(
            "Baseline overlap for {ancestry}: {} categories, {} SNPs in band ({:.3}s)",
            baseline.nrows(),
            total_snps(baseline.view()),
            start.elapsed().as_secs_f64()
        ),
        true,
    )?;

    let done = for_each_unit(cores, "tissue", tissues, log, |tissue| {
        let overlap = tissue_overlap(paths, tissue, ancestry, chromosomes, baseline.view())?;
        write_matrix(overlap.view(), &tissue_overlap_path(paths, tissue, ancestry))
    })?;
    log_line(
        log,
        &format!(
            "Overlap matrices for {} tissues ({:.3}s)",
            done.len(),
            start.elapsed().as_secs_f64()
        ),
        true,
    )?;
    Ok(())
}
