use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::design::{BlockCrossProducts, assemble, conditioned_ld, intercept_column, target};
use crate::inputs::{PreparedCategory, ReferenceWeights, split_variable};
use crate::io::ensure_parent;
use crate::jackknife::estimate;
use crate::logging::log_line;
use crate::overlap::total_snps;
use crate::sumstats::{SumStats, filter_chisq, load_sumstats};
use crate::types::{AlignmentReport, HeritabilityResult};
use crate::weights::regression_weights;

pub const RESULTS_HEADER: &str =
    "phenotype\tancestry\tcategory\tvariable\texpected\theritability\theritability_se\tenrichment\tenrichment_se\tp_value";

/// Baseline part of the design for one dataset, shared by every category.
#[derive(Debug, Clone)]
pub struct BaselineDesign {
    pub dataset: String,
    /// Reference rows used in the regression.
    pub rows: Vec<usize>,
    pub n: Array1<f64>,
    pub mean_n: f64,
    pub weights: Array1<f64>,
    pub baseline_x: Array2<f64>,
    pub intercept: Array2<f64>,
    pub y: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct ResultRow {
    pub phenotype: String,
    pub ancestry: String,
    pub category: String,
    pub variable: String,
    pub result: HeritabilityResult,
}

fn check_alignment(stats: &SumStats, reference: &ReferenceWeights) -> Result<()> {
    for (&row, rsid) in stats.rows.iter().zip(&stats.rsids) {
        match reference.rsids.get(row) {
            Some(expected) if expected == rsid => {}
            Some(expected) => {
                return Err(anyhow::anyhow!(
                    "summary statistics row {row} is {rsid} but the reference has {expected}"
                ));
            }
            None => {
                return Err(anyhow::anyhow!(
                    "summary statistics have more rows than the {} reference SNPs",
                    reference.rsids.len()
                ));
            }
        }
    }
    Ok(())
}

fn finite_rows(ld: ArrayView2<f64>, rows: &[usize]) -> Vec<bool> {
    rows.iter()
        .map(|&r| ld.row(r).iter().all(|v| v.is_finite()))
        .collect()
}

fn pick<T: Copy>(values: &[T], keep: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, k)| **k)
        .map(|(v, _)| *v)
        .collect()
}

/// Loads and filters a dataset's summary statistics and builds the weighted
/// baseline design.
pub fn baseline_design(
    sumstats_path: &Path,
    dataset: &str,
    baseline: &PreparedCategory,
    reference: &ReferenceWeights,
    log: &mut File,
) -> Result<BaselineDesign> {
    let stats = load_sumstats(sumstats_path)?;
    check_alignment(&stats, reference)?;
    let stats = filter_chisq(stats, log)?;

    let keep = finite_rows(baseline.ld.view(), &stats.rows);
    let mut report = AlignmentReport::new(dataset, "baseline LD scores");
    report.missing = keep.iter().filter(|k| !**k).count();
    report.log(dataset);

    let rows = pick(&stats.rows, &keep);
    if rows.is_empty() {
        return Err(anyhow::anyhow!("{dataset}: no SNPs left for regression"));
    }
    let n = Array1::from_vec(pick(&stats.n.to_vec(), &keep));
    let chisq = Array1::from_vec(pick(&stats.chisq.to_vec(), &keep));
    let mean_n = n.mean().unwrap_or(f64::NAN);

    let ld = baseline.ld.select(Axis(0), &rows);
    let hapmap_ld = reference.l2.select(Axis(0), &rows);
    let weights = regression_weights(
        ld.view(),
        hapmap_ld.view(),
        n.view(),
        chisq.view(),
        baseline.parameter_snps.view(),
    )?;
    let baseline_x = conditioned_ld(ld.view(), weights.view(), n.view(), mean_n)?;
    let intercept = intercept_column(weights.view());
    let y = target(chisq.view(), weights.view())?;

    log_line(
        log,
        &format!(
            "{dataset}: {} SNPs in regression, mean N = {mean_n:.1}",
            rows.len()
        ),
        true,
    )?;
    Ok(BaselineDesign {
        dataset: dataset.to_string(),
        rows,
        n,
        mean_n,
        weights,
        baseline_x,
        intercept,
        y,
    })
}

/// Weighted `[baseline | category | intercept]` design and target for one
/// category. Rows without a category LD score are dropped for this category
/// only; the kept rows stay conditioned on the dataset's mean N.
pub fn category_design(
    design: &BaselineDesign,
    category: &PreparedCategory,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let keep = finite_rows(category.ld.view(), &design.rows);
    let positions: Vec<usize> = keep
        .iter()
        .enumerate()
        .filter(|(_, k)| **k)
        .map(|(i, _)| i)
        .collect();
    let rows = pick(&design.rows, &keep);
    if positions.len() < design.rows.len() {
        let mut report = AlignmentReport::new("regression SNPs", "category LD scores");
        report.missing = design.rows.len() - positions.len();
        report.log(&design.dataset);
    }

    let n = design.n.select(Axis(0), &positions);
    let weights = design.weights.select(Axis(0), &positions);
    let category_ld = category.ld.select(Axis(0), &rows);
    let category_x = conditioned_ld(category_ld.view(), weights.view(), n.view(), design.mean_n)?;
    let baseline_x = design.baseline_x.select(Axis(0), &positions);
    let intercept = design.intercept.select(Axis(0), &positions);
    let y = design.y.select(Axis(0), &positions);

    let x = assemble(&[baseline_x.view(), category_x.view(), intercept.view()])?;
    Ok((x, y))
}

/// Regresses one category's design and returns one result per baseline and
/// category variable.
pub fn regress_category(
    design: &BaselineDesign,
    baseline: &PreparedCategory,
    category: &PreparedCategory,
    overlap: ArrayView2<f64>,
    max_blocks: usize,
) -> Result<Vec<(String, HeritabilityResult)>> {
    let (x, y) = category_design(design, category)?;
    let cross = BlockCrossProducts::new(x.view(), y.view(), max_blocks)?;

    let parameter_snps = ndarray::concatenate(
        Axis(0),
        &[baseline.parameter_snps.view(), category.parameter_snps.view()],
    )?;
    let total_snps = total_snps(overlap);
    let results = estimate(
        cross.xtx.view(),
        cross.xty.view(),
        overlap,
        parameter_snps.view(),
        total_snps,
        design.mean_n,
    )?;
    Ok(baseline
        .variables
        .iter()
        .chain(&category.variables)
        .cloned()
        .zip(results)
        .collect())
}

/// Runs one category against one dataset and labels the results.
pub fn run_category(
    design: &BaselineDesign,
    ancestry: &str,
    category_name: &str,
    baseline: &PreparedCategory,
    category: &PreparedCategory,
    overlap: ArrayView2<f64>,
    max_blocks: usize,
) -> Result<Vec<ResultRow>> {
    let start = Instant::now();
    let estimates = regress_category(design, baseline, category, overlap, max_blocks)
        .with_context(|| format!("{} against {category_name}", design.dataset))?;
    tracing::debug!(
        "{} / {category_name}: {:.3}s",
        design.dataset,
        start.elapsed().as_secs_f64()
    );
    Ok(estimates
        .into_iter()
        .map(|(variable, result)| ResultRow {
            phenotype: design.dataset.clone(),
            ancestry: ancestry.to_string(),
            category: category_name.to_string(),
            variable,
            result,
        })
        .collect())
}

/// Groups rows by variable type (`baseline`, `tissue`, `custom`).
pub fn group_by_type(rows: Vec<ResultRow>) -> BTreeMap<String, Vec<ResultRow>> {
    let mut out: BTreeMap<String, Vec<ResultRow>> = BTreeMap::new();
    for row in rows {
        let (kind, _) = split_variable(&row.variable);
        out.entry(kind.to_string()).or_default().push(row);
    }
    out
}

pub fn write_results(rows: &[ResultRow], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{RESULTS_HEADER}")?;
    for row in rows {
        let (_, name) = split_variable(&row.variable);
        let r = &row.result;
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.phenotype,
            row.ancestry,
            row.category,
            name,
            r.expected_heritability_proportion,
            r.heritability,
            r.heritability_se,
            r.enrichment,
            r.enrichment_se,
            r.p_value
        )?;
    }
    out.flush()?;
    Ok(())
}
