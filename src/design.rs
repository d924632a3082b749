//! Weighted design matrices and their per-block cross products.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis, concatenate, s};

use crate::error::{Result, SldscError};

/// Jackknife block boundaries: `floor(linspace(0, snps, k + 1))` with
/// `k = min(max_blocks, snps)`, in exact integer arithmetic.
pub fn separators(snps: usize, max_blocks: usize) -> Vec<usize> {
    let blocks = max_blocks.min(snps);
    if blocks == 0 {
        return vec![0];
    }
    (0..=blocks).map(|i| i * snps / blocks).collect()
}

/// LD scores scaled by per-SNP sample size over `mean_n`, then by the
/// regression weight. Every column of one design must share `mean_n`.
pub fn conditioned_ld(
    ld: ArrayView2<f64>,
    weights: ArrayView1<f64>,
    n: ArrayView1<f64>,
    mean_n: f64,
) -> Result<Array2<f64>> {
    check_rows("LD matrix", ld.nrows(), weights.len(), n.len())?;
    if !(mean_n > 0.0) {
        return Err(SldscError::InvalidArgument(format!(
            "mean sample size must be positive, got {mean_n}"
        )));
    }
    let mut x = ld.to_owned();
    for ((mut row, &w), &n_i) in x.rows_mut().into_iter().zip(weights).zip(n) {
        let scale = n_i / mean_n * w;
        row.mapv_inplace(|v| v * scale);
    }
    Ok(x)
}

pub fn intercept_column(weights: ArrayView1<f64>) -> Array2<f64> {
    weights.to_owned().insert_axis(Axis(1))
}

pub fn target(chisq: ArrayView1<f64>, weights: ArrayView1<f64>) -> Result<Array2<f64>> {
    if chisq.len() != weights.len() {
        return Err(SldscError::InvalidArgument(format!(
            "chi-square has {} values for {} weights",
            chisq.len(),
            weights.len()
        )));
    }
    Ok((&chisq * &weights).insert_axis(Axis(1)))
}

/// Stacks design blocks column-wise: `[baseline | category | intercept]`.
pub fn assemble(columns: &[ArrayView2<f64>]) -> Result<Array2<f64>> {
    concatenate(Axis(1), columns)
        .map_err(|e| SldscError::InvalidArgument(format!("design columns do not align: {e}")))
}

/// `x1[b]ᵀ · x2[b]` for every block `b` delimited by `separators`.
pub fn block_cross_products(
    x1: ArrayView2<f64>,
    x2: ArrayView2<f64>,
    separators: &[usize],
) -> Result<Array3<f64>> {
    if x1.nrows() != x2.nrows() {
        return Err(SldscError::InvalidArgument(format!(
            "cross product of {} and {} rows",
            x1.nrows(),
            x2.nrows()
        )));
    }
    if separators.last().copied() != Some(x1.nrows()) || separators.first() != Some(&0) {
        return Err(SldscError::InvalidArgument(format!(
            "separators do not cover {} rows",
            x1.nrows()
        )));
    }
    let blocks = separators.len() - 1;
    let mut out = Array3::<f64>::zeros((blocks, x1.ncols(), x2.ncols()));
    for (b, bounds) in separators.windows(2).enumerate() {
        let (start, end) = (bounds[0], bounds[1]);
        let a = x1.slice(s![start..end, ..]);
        let c = x2.slice(s![start..end, ..]);
        out.index_axis_mut(Axis(0), b).assign(&a.t().dot(&c));
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct BlockCrossProducts {
    /// (blocks, P + 1, P + 1)
    pub xtx: Array3<f64>,
    /// (blocks, P + 1, 1)
    pub xty: Array3<f64>,
}

impl BlockCrossProducts {
    pub fn new(x: ArrayView2<f64>, y: ArrayView2<f64>, max_blocks: usize) -> Result<Self> {
        let seps = separators(x.nrows(), max_blocks);
        Ok(Self {
            xtx: block_cross_products(x, x, &seps)?,
            xty: block_cross_products(x, y, &seps)?,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.xtx.len_of(Axis(0))
    }
}

fn check_rows(label: &str, rows: usize, weights: usize, n: usize) -> Result<()> {
    if rows != weights || rows != n {
        return Err(SldscError::InvalidArgument(format!(
            "{label} has {rows} rows but {weights} weights and {n} sample sizes"
        )));
    }
    Ok(())
}
