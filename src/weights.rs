use ndarray::{Array1, ArrayView1, ArrayView2, Axis, Zip};

use crate::error::{Result, SldscError};

/// Per-SNP heritability rate from the mean chi-square, clipped to
/// `[0, 1 / sum(parameter_snps)]`.
pub fn estimate_tau(
    ld_sum: ArrayView1<f64>,
    n: ArrayView1<f64>,
    chisq: ArrayView1<f64>,
    parameter_snps: ArrayView1<f64>,
) -> f64 {
    let mean_chisq = chisq.mean().unwrap_or(f64::NAN);
    let mean_ld_n = (&ld_sum * &n).mean().unwrap_or(f64::NAN);
    let tau = (mean_chisq - 1.0) / mean_ld_n;
    let upper = 1.0 / parameter_snps.sum();
    if !tau.is_finite() {
        return 0.0;
    }
    tau.max(0.0).min(upper)
}

/// Normalised regression weights combining the heteroskedasticity and
/// over-counting terms. The result sums to one.
pub fn regression_weights(
    baseline_ld: ArrayView2<f64>,
    hapmap_ld: ArrayView1<f64>,
    n: ArrayView1<f64>,
    chisq: ArrayView1<f64>,
    parameter_snps: ArrayView1<f64>,
) -> Result<Array1<f64>> {
    let snps = baseline_ld.nrows();
    if snps == 0 {
        return Err(SldscError::InvalidArgument(
            "regression weights need at least one SNP".to_string(),
        ));
    }
    for (label, len) in [
        ("hapmap LD", hapmap_ld.len()),
        ("sample size", n.len()),
        ("chi-square", chisq.len()),
    ] {
        if len != snps {
            return Err(SldscError::InvalidArgument(format!(
                "{label} has {len} values for {snps} SNPs"
            )));
        }
    }

    let ld_sum = baseline_ld.sum_axis(Axis(1));
    let tau = estimate_tau(ld_sum.view(), n, chisq, parameter_snps);
    tracing::debug!("regression weights: tau = {tau:e}");

    let mut unnormalized = Array1::<f64>::zeros(snps);
    Zip::from(&mut unnormalized)
        .and(&ld_sum)
        .and(&hapmap_ld)
        .and(&n)
        .for_each(|w, &ld, &l_hm3, &n_i| {
            let het = 1.0 / (1.0 + tau * n_i * ld.max(1.0)).powi(2);
            let over_counting = 1.0 / l_hm3.max(1.0);
            *w = (het * over_counting).sqrt();
        });
    let total = unnormalized.sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(SldscError::InvalidArgument(format!(
            "regression weights do not normalise (sum {total})"
        )));
    }
    Ok(unnormalized / total)
}
