use std::fs::File;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::annotation::{AnnotationSource, build_annotation};
use crate::config::{DEFAULT_CHROMOSOMES, DEFAULT_MAX_BLOCKS, DEFAULT_WINDOW_CM, LdScoreConfig, PathConfig};
use crate::inputs::{
    PreparedCategory, baseline_inputs_dir, load_annotation_category, prepare_inputs,
    list_tissue_sources, prepared_tissues, read_weights, split_variable, tissue_inputs_dir,
};
use crate::ldscore::compute_ld_scores;
use crate::logging::{log_elapsed, log_line, open_log};
use crate::munge::{MungeConfig, munge};
use crate::overlap::{
    annotation_overlap, baseline_overlap_path, compute_overlaps, load_overlap, tissue_overlap_path,
};
use crate::regression::{ResultRow, baseline_design, group_by_type, run_category, write_results};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Annotate,
    LdScore,
    Munge,
    PrepareInputs,
    Overlap,
    Regress,
    AnnotRegress,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Annotate => "annotate",
            Stage::LdScore => "ld-score",
            Stage::Munge => "munge",
            Stage::PrepareInputs => "prepare-inputs",
            Stage::Overlap => "overlap",
            Stage::Regress => "regress",
            Stage::AnnotRegress => "annot-regress",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub paths: PathConfig,
    pub ancestries: Vec<String>,
    pub chromosomes: Vec<u8>,
    pub window_cm: f64,
    pub max_blocks: usize,
    /// Summary-statistics datasets to regress.
    pub datasets: Vec<String>,
    pub annotation: Option<AnnotationSource>,
    pub munge: Option<MungeConfig>,
    pub cores: Option<usize>,
}

impl PipelineConfig {
    pub fn new(paths: PathConfig, ancestries: Vec<String>) -> Self {
        Self {
            paths,
            ancestries,
            chromosomes: DEFAULT_CHROMOSOMES.collect(),
            window_cm: DEFAULT_WINDOW_CM,
            max_blocks: DEFAULT_MAX_BLOCKS,
            datasets: Vec::new(),
            annotation: None,
            munge: None,
            cores: None,
        }
    }
}

/// Runs the stages in order for every configured ancestry. Munging runs
/// once, for the ancestry named in its own config.
pub fn run(config: &PipelineConfig, stages: &[Stage]) -> Result<()> {
    let mut log = open_log(&config.paths.log_file())?;
    for &stage in stages {
        let start = Instant::now();
        log_line(&mut log, &format!("Stage {}", stage.name()), true)?;
        if stage == Stage::Munge {
            let munge_config = config
                .munge
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("munge stage needs a munge config"))?;
            munge(&config.paths, munge_config, &mut log)
                .with_context(|| format!("munge {}", munge_config.dataset))?;
        } else {
            let mut rows = Vec::new();
            for ancestry in &config.ancestries {
                rows.extend(
                    run_stage(config, stage, ancestry, &mut log)
                        .with_context(|| format!("{} for {ancestry}", stage.name()))?,
                );
            }
            if matches!(stage, Stage::Regress | Stage::AnnotRegress) {
                write_grouped(config, rows, &mut log)?;
            }
        }
        log_elapsed(&mut log, &format!("Stage {}", stage.name()), start)?;
    }
    Ok(())
}

/// Returns the regression rows for the regression stages and nothing for the
/// others.
fn run_stage(
    config: &PipelineConfig,
    stage: Stage,
    ancestry: &str,
    log: &mut File,
) -> Result<Vec<ResultRow>> {
    let paths = &config.paths;
    match stage {
        Stage::Annotate => {
            let source = config
                .annotation
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("annotate stage needs a region or gene file"))?;
            build_annotation(paths, ancestry, source, &config.chromosomes, log)?;
        }
        Stage::LdScore => {
            let ld_config = LdScoreConfig {
                ancestry: ancestry.to_string(),
                chromosomes: config.chromosomes.clone(),
                window_cm: config.window_cm,
            };
            compute_ld_scores(paths, &ld_config, config.cores, log)?;
        }
        Stage::Munge => {}
        Stage::PrepareInputs => {
            prepare_inputs(paths, ancestry, &config.chromosomes, config.cores, log)?;
        }
        Stage::Overlap => {
            let tissues = list_tissue_sources(paths, ancestry)?;
            compute_overlaps(paths, ancestry, &tissues, &config.chromosomes, config.cores, log)?;
        }
        Stage::Regress => return regress_tissues(config, ancestry, log),
        Stage::AnnotRegress => return regress_annotation(config, ancestry, log),
    }
    Ok(Vec::new())
}

fn require_datasets(config: &PipelineConfig) -> Result<()> {
    if config.datasets.is_empty() {
        return Err(anyhow::anyhow!("no summary-statistics datasets configured"));
    }
    Ok(())
}

/// Regresses every prepared tissue against every dataset. Only the tissue
/// coefficients are reported.
pub fn regress_tissues(
    config: &PipelineConfig,
    ancestry: &str,
    log: &mut File,
) -> Result<Vec<ResultRow>> {
    require_datasets(config)?;
    let paths = &config.paths;
    let reference = read_weights(paths, ancestry, &config.chromosomes)?;
    let baseline = PreparedCategory::load(&baseline_inputs_dir(paths, ancestry), "baseline")?;
    let tissues = prepared_tissues(paths, ancestry)?;
    if tissues.is_empty() {
        return Err(anyhow::anyhow!("no prepared tissues for {ancestry}"));
    }
    log_line(
        log,
        &format!("Regressing {} tissues for {ancestry}", tissues.len()),
        true,
    )?;

    let mut rows: Vec<ResultRow> = Vec::new();
    for dataset in &config.datasets {
        let sumstats = paths.sumstats(dataset, ancestry);
        let design = baseline_design(&sumstats, dataset, &baseline, &reference, log)
            .with_context(|| format!("dataset {dataset}"))?;
        for tissue in &tissues {
            let category = PreparedCategory::load(&tissue_inputs_dir(paths, ancestry), tissue)?;
            let overlap = load_overlap(&tissue_overlap_path(paths, tissue, ancestry))?;
            let results = run_category(
                &design,
                ancestry,
                tissue,
                &baseline,
                &category,
                overlap.view(),
                config.max_blocks,
            )?;
            rows.extend(
                results
                    .into_iter()
                    .filter(|row| split_variable(&row.variable).0 == "tissue"),
            );
        }
    }
    Ok(rows)
}

/// Regresses the custom annotation against every dataset, reporting the
/// baseline and custom coefficients.
pub fn regress_annotation(
    config: &PipelineConfig,
    ancestry: &str,
    log: &mut File,
) -> Result<Vec<ResultRow>> {
    require_datasets(config)?;
    let paths = &config.paths;
    let reference = read_weights(paths, ancestry, &config.chromosomes)?;
    let baseline = PreparedCategory::load(&baseline_inputs_dir(paths, ancestry), "baseline")?;
    let category = load_annotation_category(paths, ancestry, &config.chromosomes, &reference)?;
    let baseline_overlap = load_overlap(&baseline_overlap_path(paths, ancestry))?;
    let overlap = annotation_overlap(paths, ancestry, &config.chromosomes, baseline_overlap.view())?;

    let mut rows: Vec<ResultRow> = Vec::new();
    for dataset in &config.datasets {
        let sumstats = paths.sumstats(dataset, ancestry);
        let design = baseline_design(&sumstats, dataset, &baseline, &reference, log)
            .with_context(|| format!("dataset {dataset}"))?;
        rows.extend(run_category(
            &design,
            ancestry,
            "annotation",
            &baseline,
            &category,
            overlap.view(),
            config.max_blocks,
        )?);
    }
    Ok(rows)
}

fn write_grouped(config: &PipelineConfig, rows: Vec<ResultRow>, log: &mut File) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    for (kind, group) in group_by_type(rows) {
        let path = config.paths.results(&kind);
        write_results(&group, &path)?;
        log_line(
            log,
            &format!("Wrote {} results to {}", group.len(), path.display()),
            true,
        )?;
    }
    Ok(())
}
