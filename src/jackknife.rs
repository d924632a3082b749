//! Block-jackknife estimation of per-category heritability and enrichment.
//!
//! All functions are pure: they take the stacked block cross products and
//! return new arrays. The last design column is the intercept and is
//! dropped from every coefficient vector.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use ndarray_linalg::Solve;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{Result, SldscError};
use crate::types::{HeritabilityResult, PValue};

fn solve(a: &Array2<f64>, b: &Array1<f64>, context: &str) -> Result<Array1<f64>> {
    let x = a.solve(b).map_err(|_| SldscError::Numerical {
        context: context.to_string(),
    })?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(SldscError::Numerical {
            context: context.to_string(),
        });
    }
    Ok(x)
}

fn check_blocks(xtx: ArrayView3<f64>, xty: ArrayView3<f64>) -> Result<()> {
    let (blocks, rows, cols) = xtx.dim();
    let (y_blocks, y_rows, y_cols) = xty.dim();
    if rows != cols || blocks != y_blocks || rows != y_rows || y_cols != 1 {
        return Err(SldscError::InvalidArgument(format!(
            "cross products have shapes ({blocks}, {rows}, {cols}) and ({y_blocks}, {y_rows}, {y_cols})"
        )));
    }
    if rows < 2 {
        return Err(SldscError::InvalidArgument(
            "design needs at least one category besides the intercept".to_string(),
        ));
    }
    Ok(())
}

fn without_intercept(coefficients: Array1<f64>, mean_n: f64) -> Array1<f64> {
    let p = coefficients.len() - 1;
    coefficients.slice_move(ndarray::s![..p]) / mean_n
}

/// Full-sample coefficients, intercept removed, divided by mean sample size.
pub fn per_snp_heritability(
    xtx: ArrayView3<f64>,
    xty: ArrayView3<f64>,
    mean_n: f64,
) -> Result<Array1<f64>> {
    check_blocks(xtx, xty)?;
    let a = xtx.sum_axis(Axis(0));
    let b = xty.sum_axis(Axis(0)).index_axis_move(Axis(1), 0);
    let coefficients = solve(&a, &b, "full-sample regression")?;
    Ok(without_intercept(coefficients, mean_n))
}

/// Leave-one-block-out coefficients, one row per block.
pub fn leave_one_out_per_snp_heritability(
    xtx: ArrayView3<f64>,
    xty: ArrayView3<f64>,
    mean_n: f64,
) -> Result<Array2<f64>> {
    check_blocks(xtx, xty)?;
    let blocks = xtx.len_of(Axis(0));
    let params = xtx.len_of(Axis(1)) - 1;
    let xtx_tot = xtx.sum_axis(Axis(0));
    let xty_tot = xty.sum_axis(Axis(0)).index_axis_move(Axis(1), 0);
    let mut out = Array2::<f64>::zeros((blocks, params));
    for j in 0..blocks {
        let a = &xtx_tot - &xtx.index_axis(Axis(0), j);
        let b = &xty_tot - &xty.index_axis(Axis(0), j).index_axis(Axis(1), 0);
        let coefficients = solve(&a, &b, &format!("regression without block {j}"))?;
        out.row_mut(j).assign(&without_intercept(coefficients, mean_n));
    }
    Ok(out)
}

/// `B · full − (B − 1) · loo_j` for each block `j`.
pub fn pseudo_values(full: ArrayView1<f64>, leave_one_out: ArrayView2<f64>) -> Array2<f64> {
    let blocks = leave_one_out.nrows() as f64;
    let mut out = leave_one_out.mapv(|v| -(blocks - 1.0) * v);
    for mut row in out.rows_mut() {
        row.scaled_add(blocks, &full);
    }
    out
}

/// Sample covariance (ddof = 1) of the rows of `values`.
pub fn covariance(values: ArrayView2<f64>) -> Result<Array2<f64>> {
    let n = values.nrows();
    if n < 2 {
        return Err(SldscError::InvalidArgument(format!(
            "covariance needs at least two blocks, got {n}"
        )));
    }
    let Some(mean) = values.mean_axis(Axis(0)) else {
        return Err(SldscError::InvalidArgument("empty covariance input".to_string()));
    };
    let centered = &values - &mean;
    Ok(centered.t().dot(&centered) / (n as f64 - 1.0))
}

/// Covariance of the debiased pseudo-values, scaled by block count.
pub fn jackknife_covariance(pseudo: ArrayView2<f64>) -> Result<Array2<f64>> {
    Ok(covariance(pseudo)? / pseudo.nrows() as f64)
}

pub fn heritability_proportion(
    per_snp: ArrayView1<f64>,
    parameter_snps: ArrayView1<f64>,
) -> Array1<f64> {
    let heritability = &per_snp * &parameter_snps;
    let total = heritability.sum();
    heritability / total
}

pub fn leave_one_out_heritability_proportion(
    leave_one_out: ArrayView2<f64>,
    parameter_snps: ArrayView1<f64>,
) -> Array2<f64> {
    let mut out = leave_one_out.to_owned();
    for mut row in out.rows_mut() {
        let proportion = heritability_proportion(row.view(), parameter_snps);
        row.assign(&proportion);
    }
    out
}

/// `C[i][j] = overlap[i][j] / p[j]`.
pub fn proportion_correction(
    overlap: ArrayView2<f64>,
    parameter_snps: ArrayView1<f64>,
) -> Array2<f64> {
    let mut c = overlap.to_owned();
    for mut row in c.rows_mut() {
        row /= &parameter_snps;
    }
    c
}

/// `C[i][j] = overlap[i][j] · T / (p[i] · (T − p[i])) − p[j] / (T − p[i])`.
pub fn per_snp_correction(
    overlap: ArrayView2<f64>,
    parameter_snps: ArrayView1<f64>,
    total_snps: f64,
) -> Array2<f64> {
    let mut c = overlap.to_owned();
    for (i, mut row) in c.rows_mut().into_iter().enumerate() {
        let p_i = parameter_snps[i];
        let difference = total_snps - p_i;
        for (j, v) in row.iter_mut().enumerate() {
            *v = *v * total_snps / p_i / difference - parameter_snps[j] / difference;
        }
    }
    c
}

/// `sqrt(max(0, diag(C · cov · Cᵀ)))`.
pub fn corrected_se(correction: ArrayView2<f64>, cov: ArrayView2<f64>) -> Array1<f64> {
    let variances = correction.dot(&cov).dot(&correction.t());
    variances.diag().mapv(|v| v.max(0.0).sqrt())
}

/// Two-sided Student-t p-value with `blocks` degrees of freedom.
pub fn p_value(estimate: f64, se: f64, blocks: usize) -> PValue {
    if se == 0.0 {
        return PValue::Na;
    }
    match StudentsT::new(0.0, 1.0, blocks as f64) {
        Ok(dist) => PValue::Value(2.0 * dist.sf((estimate / se).abs())),
        Err(_) => PValue::Na,
    }
}

/// Heritability, enrichment and significance per category.
pub fn estimate(
    xtx: ArrayView3<f64>,
    xty: ArrayView3<f64>,
    overlap: ArrayView2<f64>,
    parameter_snps: ArrayView1<f64>,
    total_snps: f64,
    mean_n: f64,
) -> Result<Vec<HeritabilityResult>> {
    check_blocks(xtx, xty)?;
    let blocks = xtx.len_of(Axis(0));
    let params = xtx.len_of(Axis(1)) - 1;
    if blocks < 2 {
        return Err(SldscError::InvalidArgument(format!(
            "jackknife needs at least two blocks, got {blocks}"
        )));
    }
    if parameter_snps.len() != params || overlap.dim() != (params, params) {
        return Err(SldscError::InvalidArgument(format!(
            "{params} categories but {} parameter SNP counts and a {:?} overlap matrix",
            parameter_snps.len(),
            overlap.dim()
        )));
    }

    let per_snp = per_snp_heritability(xtx, xty, mean_n)?;
    let per_snp_loo = leave_one_out_per_snp_heritability(xtx, xty, mean_n)?;
    let per_snp_cov = jackknife_covariance(pseudo_values(per_snp.view(), per_snp_loo.view()).view())?;

    let proportion = heritability_proportion(per_snp.view(), parameter_snps);
    let proportion_loo = leave_one_out_heritability_proportion(per_snp_loo.view(), parameter_snps);
    let proportion_cov =
        jackknife_covariance(pseudo_values(proportion.view(), proportion_loo.view()).view())?;

    let c1 = proportion_correction(overlap, parameter_snps);
    let corrected_proportion = c1.dot(&proportion);
    let corrected_proportion_se = corrected_se(c1.view(), proportion_cov.view());

    let expected = &parameter_snps / total_snps;
    let enrichment = &corrected_proportion / &expected;
    let enrichment_se = &corrected_proportion_se / &expected;

    let c2 = per_snp_correction(overlap, parameter_snps, total_snps);
    let corrected_per_snp = c2.dot(&per_snp);
    let corrected_per_snp_se = corrected_se(c2.view(), per_snp_cov.view());

    Ok((0..params)
        .map(|i| HeritabilityResult {
            expected_heritability_proportion: expected[i],
            heritability: corrected_proportion[i],
            heritability_se: corrected_proportion_se[i],
            enrichment: enrichment[i],
            enrichment_se: enrichment_se[i],
            p_value: p_value(corrected_per_snp[i], corrected_per_snp_se[i], blocks),
        })
        .collect())
}
