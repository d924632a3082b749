use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array1;

use crate::io::{f64_column, read_table, string_column};
use crate::logging::log_line;

/// Summary statistics aligned to the LD-score reference order.
#[derive(Debug, Clone, Default)]
pub struct SumStats {
    /// Row of each SNP in the reference order.
    pub rows: Vec<usize>,
    pub rsids: Vec<String>,
    pub chisq: Array1<f64>,
    pub n: Array1<f64>,
}

impl SumStats {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn mean_sample_size(&self) -> f64 {
        self.n.mean().unwrap_or(f64::NAN)
    }

    fn select(&self, keep: &[bool]) -> SumStats {
        let idx: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, k)| **k)
            .map(|(i, _)| i)
            .collect();
        SumStats {
            rows: idx.iter().map(|&i| self.rows[i]).collect(),
            rsids: idx.iter().map(|&i| self.rsids[i].clone()).collect(),
            chisq: idx.iter().map(|&i| self.chisq[i]).collect(),
            n: idx.iter().map(|&i| self.n[i]).collect(),
        }
    }
}

/// Loads a `SNP Z N` file. Rows with an empty Z or N are absent from the
/// dataset and skipped, but still count towards the row index.
pub fn load_sumstats(path: &Path) -> Result<SumStats> {
    let df = read_table(path).with_context(|| format!("load sumstats {}", path.display()))?;
    let snp = string_column(&df, "SNP")?;
    let z = f64_column(&df, "Z")?;
    let n = f64_column(&df, "N")?;

    let mut out = SumStats::default();
    let mut chisq = Vec::new();
    let mut sample_size = Vec::new();
    for (row, ((rsid, z), n)) in snp.into_iter().zip(z).zip(n).enumerate() {
        if let (Some(z), Some(n)) = (z, n)
            && z.is_finite()
            && n.is_finite()
        {
            out.rows.push(row);
            out.rsids.push(rsid);
            chisq.push(z * z);
            sample_size.push(n);
        }
    }
    out.chisq = Array1::from_vec(chisq);
    out.n = Array1::from_vec(sample_size);
    Ok(out)
}

/// Chi-square ceiling `max(0.001 · max(N), 80)`.
pub fn chisq_max(n: &Array1<f64>) -> f64 {
    let max_n = n.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (0.001 * max_n).max(80.0)
}

/// Drops SNPs with `chisq >= chisq_max`.
pub fn filter_chisq(stats: SumStats, log: &mut File) -> Result<SumStats> {
    let ceiling = chisq_max(&stats.n);
    let keep: Vec<bool> = stats.chisq.iter().map(|&c| c < ceiling).collect();
    let filtered = stats.select(&keep);
    log_line(
        log,
        &format!(
            "Removing {} SNPs with Chi^2 >= {ceiling}; {} remain",
            stats.len() - filtered.len(),
            filtered.len()
        ),
        true,
    )?;
    Ok(filtered)
}
