use std::fmt;

/// Per-SNP metadata from a `.bim` side file.
#[derive(Debug, Clone, PartialEq)]
pub struct SnpInfo {
    pub chromosome: String,
    pub rsid: String,
    pub cm: f64,
    pub bp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LdScoreRecord {
    pub chromosome: String,
    pub rsid: String,
    pub bp: u64,
    pub l2: f64,
}

/// SNP counts for one chromosome of an annotation.
///
/// `m` counts annotation SNPs surviving the heterogeneity filter, `m_5_50`
/// the subset with minor allele frequency above 0.05.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnpCountStat {
    pub m: usize,
    pub m_5_50: usize,
}

impl std::ops::Add for SnpCountStat {
    type Output = SnpCountStat;

    fn add(self, rhs: SnpCountStat) -> SnpCountStat {
        SnpCountStat {
            m: self.m + rhs.m,
            m_5_50: self.m_5_50 + rhs.m_5_50,
        }
    }
}

/// Two-sided p-value; `Na` when the standard error is exactly zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PValue {
    Value(f64),
    Na,
}

impl PValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            PValue::Value(p) => Some(*p),
            PValue::Na => None,
        }
    }
}

impl fmt::Display for PValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PValue::Value(p) => write!(f, "{p}"),
            PValue::Na => write!(f, "NA"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeritabilityResult {
    pub expected_heritability_proportion: f64,
    pub heritability: f64,
    pub heritability_se: f64,
    pub enrichment: f64,
    pub enrichment_se: f64,
    pub p_value: PValue,
}

/// SNPs dropped because two sources disagree on which SNPs exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentReport {
    pub source: String,
    pub target: String,
    pub missing: usize,
}

impl AlignmentReport {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            missing: 0,
        }
    }

    pub fn log(&self, scope: &str) {
        if self.missing > 0 {
            tracing::warn!(
                "{scope}: {} SNPs present in {} but absent from {} were excluded",
                self.missing,
                self.source,
                self.target
            );
        }
    }
}
