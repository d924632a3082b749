//! Run configuration and on-disk layout.
//!
//! Every path the library touches is derived from a [`PathConfig`]; nothing
//! is read from the process environment.

use std::path::{Path, PathBuf};

pub const DEFAULT_WINDOW_CM: f64 = 1.0;
pub const DEFAULT_MAX_BLOCKS: usize = 200;
pub const DEFAULT_CHROMOSOMES: std::ops::RangeInclusive<u8> = 1..=22;

#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Shared reference data: panels, hapmap lists, baseline and tissue inputs.
    pub input_root: PathBuf,
    /// Per-dataset working directory: annotations, LD scores, sumstats, results.
    pub data_root: PathBuf,
}

impl PathConfig {
    pub fn new(input_root: impl Into<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            data_root: data_root.into(),
        }
    }

    pub fn panel_stem(&self, ancestry: &str, chromosome: u8) -> PathBuf {
        self.input_root
            .join("g1000")
            .join(ancestry)
            .join(format!("chr{chromosome}"))
    }

    pub fn hapmap(&self, chromosome: u8) -> PathBuf {
        self.input_root
            .join("hapmap")
            .join(format!("hm.{chromosome}.snp"))
    }

    pub fn frq(&self, ancestry: &str, chromosome: u8) -> PathBuf {
        self.input_root
            .join("frq")
            .join(ancestry)
            .join(format!("chr.{chromosome}.frq"))
    }

    pub fn hapmap_weights(&self, ancestry: &str, chromosome: u8) -> PathBuf {
        self.input_root
            .join("weights")
            .join(ancestry)
            .join(format!("weights.{chromosome}.l2.ldscore.gz"))
    }

    pub fn gene_loc(&self) -> PathBuf {
        self.input_root.join("gene_loc").join("gene.loc")
    }

    pub fn snpmap(&self, kind: &str, genome_build: &str, ancestry: &str) -> PathBuf {
        self.input_root
            .join("snpmap")
            .join(format!("sumstats.{kind}.{genome_build}.{ancestry}.snpmap"))
    }

    pub fn baseline_file(&self, ancestry: &str, chromosome: u8, suffix: &str) -> PathBuf {
        self.input_root
            .join("baseline")
            .join(ancestry)
            .join(format!("baselineLD.{chromosome}.{suffix}"))
    }

    pub fn tissue_dir(&self, ancestry: &str) -> PathBuf {
        self.input_root.join("tissue").join(ancestry)
    }

    pub fn tissue_file(&self, tissue: &str, ancestry: &str, chromosome: u8, suffix: &str) -> PathBuf {
        self.tissue_dir(ancestry)
            .join(tissue)
            .join(format!("tissueLD.{chromosome}.{suffix}"))
    }

    pub fn inputs_dir(&self, ancestry: &str) -> PathBuf {
        self.input_root.join("inputs").join(ancestry)
    }

    /// Custom annotation flags, in the panel order of one ancestry.
    pub fn annotation(&self, ancestry: &str, chromosome: u8) -> PathBuf {
        self.data_root
            .join("annot")
            .join(ancestry)
            .join(format!("ld.{chromosome}.annot.gz"))
    }

    pub fn ld_output(&self, ancestry: &str, chromosome: u8, suffix: &str) -> PathBuf {
        self.data_root
            .join("ld")
            .join(ancestry)
            .join(format!("ld.{chromosome}.{suffix}"))
    }

    /// Munged statistics, aligned to one ancestry's reference SNP order.
    pub fn sumstats(&self, dataset: &str, ancestry: &str) -> PathBuf {
        self.data_root
            .join("sumstats")
            .join(format!("{dataset}.{ancestry}.sumstats.gz"))
    }

    pub fn results(&self, category_type: &str) -> PathBuf {
        self.data_root
            .join("results")
            .join(format!("{category_type}.output.tsv"))
    }

    pub fn raw(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_root.join("raw").join(file)
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_root.join("sldsc.log")
    }
}

#[derive(Debug, Clone)]
pub struct LdScoreConfig {
    pub ancestry: String,
    pub chromosomes: Vec<u8>,
    pub window_cm: f64,
}

impl LdScoreConfig {
    pub fn new(ancestry: &str) -> Self {
        Self {
            ancestry: ancestry.to_string(),
            chromosomes: DEFAULT_CHROMOSOMES.collect(),
            window_cm: DEFAULT_WINDOW_CM,
        }
    }
}
