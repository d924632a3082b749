use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::PathConfig;
use crate::error::SldscError;
use crate::genotype::read_bim;
use crate::io::{create_gz, open_maybe_compressed};
use crate::logging::log_line;

pub const GENE_WINDOW: u64 = 50_000;
pub const ANNOT_HEADER: &str = "ANNOT";

/// Base-pair interval `(start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Region {
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn contains(&self, bp: u64) -> bool {
        self.start < bp && bp <= self.end
    }
}

#[derive(Debug, Clone)]
pub enum AnnotationSource {
    /// BED-like `chr start end ...` rows.
    Regions(PathBuf),
    /// One gene name per line, resolved through `gene.loc`.
    Genes(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneLocation {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
}

fn normalize_chromosome(raw: &str) -> &str {
    raw.strip_prefix("chr").unwrap_or(raw)
}

/// Regions on `chromosome`, sorted and merged. Rows with fewer than three
/// fields or non-integer bounds are skipped.
pub fn read_regions(path: &Path, chromosome: &str) -> Result<Vec<Region>> {
    let reader = open_maybe_compressed(path)?;
    let mut regions = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || normalize_chromosome(fields[0]) != chromosome {
            continue;
        }
        if let (Ok(start), Ok(end)) = (fields[1].parse::<u64>(), fields[2].parse::<u64>()) {
            regions.push(Region { start, end });
        }
    }
    Ok(merge_regions(regions))
}

pub fn merge_regions(mut regions: Vec<Region>) -> Vec<Region> {
    regions.sort();
    let mut merged: Vec<Region> = Vec::with_capacity(regions.len());
    for region in regions {
        match merged.last_mut() {
            Some(last) if region.start <= last.end => last.end = last.end.max(region.end),
            _ => merged.push(region),
        }
    }
    merged
}

/// `gene.loc` rows: `gene chr start end`.
pub fn read_gene_loc(path: &Path) -> Result<HashMap<String, GeneLocation>> {
    let reader = open_maybe_compressed(path)?;
    let mut out = HashMap::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 4 {
            return Err(SldscError::Parse(format!(
                "{} line {}: expected gene, chromosome, start, end",
                path.display(),
                line_no + 1
            ))
            .into());
        }
        let start = fields[2]
            .parse::<u64>()
            .with_context(|| format!("{} line {}", path.display(), line_no + 1))?;
        let end = fields[3]
            .parse::<u64>()
            .with_context(|| format!("{} line {}", path.display(), line_no + 1))?;
        out.insert(
            fields[0].to_string(),
            GeneLocation {
                chromosome: normalize_chromosome(fields[1]).to_string(),
                start,
                end,
            },
        );
    }
    Ok(out)
}

/// Gene bodies on `chromosome` widened by `window` base pairs each side,
/// start floored at 1. Unknown genes are ignored.
pub fn gene_regions(
    genes: &[String],
    gene_loc: &HashMap<String, GeneLocation>,
    chromosome: &str,
    window: u64,
) -> Vec<Region> {
    let regions = genes
        .iter()
        .filter_map(|gene| gene_loc.get(gene.trim()))
        .filter(|loc| loc.chromosome == chromosome)
        .map(|loc| Region {
            start: loc.start.saturating_sub(window).max(1),
            end: loc.end + window,
        })
        .collect();
    merge_regions(regions)
}

pub fn read_gene_list(path: &Path) -> Result<Vec<String>> {
    let reader = open_maybe_compressed(path)?;
    let mut genes = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let gene = line.trim();
        if !gene.is_empty() {
            genes.push(gene.to_string());
        }
    }
    Ok(genes)
}

/// Membership flag per SNP position against sorted, disjoint regions.
pub fn annotate(positions: &[u64], regions: &[Region]) -> Vec<bool> {
    positions
        .iter()
        .map(|&bp| {
            let idx = regions.partition_point(|r| r.start < bp);
            idx > 0 && regions[idx - 1].contains(bp)
        })
        .collect()
}

pub fn write_annotation(flags: &[bool], path: &Path) -> Result<()> {
    let mut out = create_gz(path)?;
    writeln!(out, "{ANNOT_HEADER}")?;
    for &flag in flags {
        writeln!(out, "{}", u8::from(flag))?;
    }
    out.finish()?.flush()?;
    Ok(())
}

/// Reads a single-column annotation: a header, then one value per SNP.
/// Any non-zero value counts as membership.
pub fn read_annotation(path: &Path) -> Result<Vec<bool>> {
    let mut reader = open_maybe_compressed(path)?;
    let mut header = String::new();
    reader.read_line(&mut header)?;
    let mut flags = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let value = line.trim();
        if value.is_empty() {
            continue;
        }
        let parsed = value.parse::<f64>().map_err(|_| {
            SldscError::Parse(format!(
                "{} line {}: annotation value {value:?}",
                path.display(),
                line_no + 2
            ))
        })?;
        flags.push(parsed != 0.0);
    }
    Ok(flags)
}

/// Writes `ld.{c}.annot.gz` for every chromosome from a region or gene list.
pub fn build_annotation(
    paths: &PathConfig,
    ancestry: &str,
    source: &AnnotationSource,
    chromosomes: &[u8],
    log: &mut File,
) -> Result<usize> {
    let gene_input = match source {
        AnnotationSource::Genes(list) => {
            let genes = read_gene_list(&paths.raw(list))?;
            let gene_loc = read_gene_loc(&paths.gene_loc())?;
            let known = genes.iter().filter(|g| gene_loc.contains_key(*g)).count();
            log_line(
                log,
                &format!("{known} of {} genes found in gene locations", genes.len()),
                true,
            )?;
            Some((genes, gene_loc))
        }
        AnnotationSource::Regions(_) => None,
    };

    let mut total = 0usize;
    for &chromosome in chromosomes {
        let chrom = chromosome.to_string();
        let regions = match (&gene_input, source) {
            (Some((genes, gene_loc)), _) => gene_regions(genes, gene_loc, &chrom, GENE_WINDOW),
            (None, AnnotationSource::Regions(file)) => read_regions(&paths.raw(file), &chrom)?,
            (None, AnnotationSource::Genes(_)) => Vec::new(),
        };
        let bim = paths
            .panel_stem(ancestry, chromosome)
            .with_extension("bim");
        let positions: Vec<u64> = read_bim(&bim)?.into_iter().map(|snp| snp.bp).collect();
        let flags = annotate(&positions, &regions);
        let annotated = flags.iter().filter(|f| **f).count();
        debug!(
            "chromosome {chromosome}: {} regions, {annotated} of {} SNPs annotated",
            regions.len(),
            flags.len()
        );
        write_annotation(&flags, &paths.annotation(ancestry, chromosome))?;
        total += annotated;
    }
    log_line(
        log,
        &format!(
            "Annotation marks {total} SNPs across {} chromosomes",
            chromosomes.len()
        ),
        true,
    )?;
    Ok(total)
}
