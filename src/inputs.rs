//! Regression inputs prepared once per ancestry: per-category LD matrices
//! aligned to the reference SNP order, variable names and parameter SNP
//! counts.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Axis};

use crate::config::PathConfig;
use crate::io::{
    f64_column, open_maybe_compressed, read_count_row, read_matrix, read_string_list, read_table,
    string_column, write_matrix, write_string_list,
};
use crate::logging::log_line;
use crate::parallel::for_each_unit;
use crate::types::AlignmentReport;

pub const VARIABLE_SEPARATOR: &str = "___";
pub const CUSTOM_VARIABLE: &str = "custom___annotation";

/// Columns of an `.l2.ldscore` file that are not LD scores.
const ID_COLUMNS: [&str; 5] = ["CHR", "SNP", "BP", "CM", "MAF"];

/// Reference SNP order with the hapmap LD weight of each SNP.
#[derive(Debug, Clone, Default)]
pub struct ReferenceWeights {
    pub rsids: Vec<String>,
    pub l2: Array1<f64>,
}

/// One block of regression categories.
#[derive(Debug, Clone)]
pub struct PreparedCategory {
    /// `{type}___{name}` per column.
    pub variables: Vec<String>,
    /// Reference SNPs × categories; NaN where a SNP has no LD score.
    pub ld: Array2<f64>,
    pub parameter_snps: Array1<f64>,
}

impl PreparedCategory {
    pub fn save(&self, dir: &Path, stem: &str) -> Result<()> {
        write_matrix(self.ld.view(), &dir.join(format!("{stem}.ld.gz")))?;
        write_string_list(&self.variables, &dir.join(format!("{stem}.variables.txt")))?;
        write_matrix(
            self.parameter_snps.view().insert_axis(Axis(0)),
            &dir.join(format!("{stem}.parameter_snps.txt")),
        )?;
        Ok(())
    }

    pub fn load(dir: &Path, stem: &str) -> Result<Self> {
        let ld = read_matrix(&dir.join(format!("{stem}.ld.gz")))?;
        let variables = read_string_list(&dir.join(format!("{stem}.variables.txt")))?;
        let parameter_snps =
            Array1::from_vec(read_count_row(&dir.join(format!("{stem}.parameter_snps.txt")))?);
        if ld.ncols() != variables.len() || parameter_snps.len() != variables.len() {
            return Err(anyhow::anyhow!(
                "{stem} in {}: {} LD columns, {} variables, {} parameter SNP counts",
                dir.display(),
                ld.ncols(),
                variables.len(),
                parameter_snps.len()
            ));
        }
        Ok(Self {
            variables,
            ld,
            parameter_snps,
        })
    }
}

/// LD-score table read from one `.l2.ldscore` file.
#[derive(Debug, Clone)]
pub struct LdTable {
    pub rsids: Vec<String>,
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

pub fn read_ld_table(path: &Path) -> Result<LdTable> {
    let df = read_table(path).with_context(|| format!("read LD scores {}", path.display()))?;
    let rsids = string_column(&df, "SNP")?;
    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .filter(|name| !ID_COLUMNS.contains(&name.as_str()))
        .collect();
    let mut values = Array2::<f64>::zeros((rsids.len(), columns.len()));
    for (j, name) in columns.iter().enumerate() {
        let col = f64_column(&df, name)?;
        for (i, v) in col.into_iter().enumerate() {
            values[[i, j]] = v.unwrap_or(f64::NAN);
        }
    }
    Ok(LdTable {
        rsids,
        columns,
        values,
    })
}

/// Rows of `tables` placed in `reference` order; reference SNPs missing from
/// every table keep NaN.
pub fn align_tables(
    reference: &[String],
    tables: &[LdTable],
    report: &mut AlignmentReport,
) -> Result<Array2<f64>> {
    let Some(first) = tables.first() else {
        return Ok(Array2::from_elem((reference.len(), 0), f64::NAN));
    };
    let width = first.columns.len();
    let position: HashMap<&str, usize> = reference
        .iter()
        .enumerate()
        .map(|(i, rsid)| (rsid.as_str(), i))
        .collect();
    let mut out = Array2::from_elem((reference.len(), width), f64::NAN);
    let mut found = 0usize;
    for table in tables {
        if table.columns.len() != width {
            return Err(anyhow::anyhow!(
                "LD tables disagree on the number of categories ({} vs {width})",
                table.columns.len()
            ));
        }
        for (rsid, row) in table.rsids.iter().zip(table.values.rows()) {
            if let Some(&i) = position.get(rsid.as_str()) {
                out.row_mut(i).assign(&row);
                found += 1;
            }
        }
    }
    report.missing += reference.len().saturating_sub(found);
    Ok(out)
}

/// Concatenated `weights.{c}.l2.ldscore.gz` files: rsid in column 2, LD
/// weight in column 4.
pub fn read_weights(paths: &PathConfig, ancestry: &str, chromosomes: &[u8]) -> Result<ReferenceWeights> {
    let mut rsids = Vec::new();
    let mut l2 = Vec::new();
    for &chromosome in chromosomes {
        let path = paths.hapmap_weights(ancestry, chromosome);
        let reader = open_maybe_compressed(&path)?;
        for (line_no, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }
            let value = fields[3].parse::<f64>().with_context(|| {
                format!("{} line {}: weight {:?}", path.display(), line_no + 1, fields[3])
            })?;
            rsids.push(fields[1].to_string());
            l2.push(value);
        }
    }
    Ok(ReferenceWeights {
        rsids,
        l2: Array1::from_vec(l2),
    })
}

fn variable_name(category_type: &str, name: &str) -> String {
    format!("{category_type}{VARIABLE_SEPARATOR}{name}")
}

/// Splits `type___name`; names without a separator are their own type.
pub fn split_variable(variable: &str) -> (&str, &str) {
    variable
        .split_once(VARIABLE_SEPARATOR)
        .unwrap_or((variable, variable))
}

fn sum_counts(files: &[PathBuf], width: usize) -> Result<Array1<f64>> {
    let mut total = Array1::<f64>::zeros(width);
    for file in files {
        let row = read_count_row(file)?;
        if row.len() != width {
            return Err(anyhow::anyhow!(
                "{} has {} counts for {width} categories",
                file.display(),
                row.len()
            ));
        }
        total += &Array1::from_vec(row);
    }
    Ok(total)
}

fn prepare_category(
    ld_files: &[PathBuf],
    count_files: &[PathBuf],
    reference: &ReferenceWeights,
    name_for: impl Fn(&str, usize) -> String,
    scope: &str,
) -> Result<PreparedCategory> {
    let tables = ld_files
        .iter()
        .map(|path| read_ld_table(path))
        .collect::<Result<Vec<_>>>()?;
    let columns = tables
        .first()
        .map(|t| t.columns.clone())
        .ok_or_else(|| anyhow::anyhow!("{scope}: no LD score files"))?;
    let mut report = AlignmentReport::new("reference weights", scope);
    let ld = align_tables(&reference.rsids, &tables, &mut report)?;
    report.log(scope);
    let parameter_snps = sum_counts(count_files, columns.len())?;
    let variables = columns
        .iter()
        .map(|col| name_for(col, columns.len()))
        .collect();
    Ok(PreparedCategory {
        variables,
        ld,
        parameter_snps,
    })
}

pub fn prepare_baseline(
    paths: &PathConfig,
    ancestry: &str,
    chromosomes: &[u8],
    reference: &ReferenceWeights,
) -> Result<PreparedCategory> {
    let ld_files: Vec<PathBuf> = chromosomes
        .iter()
        .map(|&c| paths.baseline_file(ancestry, c, "l2.ldscore.gz"))
        .collect();
    let count_files: Vec<PathBuf> = chromosomes
        .iter()
        .map(|&c| paths.baseline_file(ancestry, c, "l2.M_5_50"))
        .collect();
    prepare_category(
        &ld_files,
        &count_files,
        reference,
        |col, _| variable_name("baseline", col),
        "baseline",
    )
}

/// A tissue with a single LD column is named after the tissue; otherwise
/// each column is `{tissue}.{column}`.
pub fn prepare_tissue(
    paths: &PathConfig,
    tissue: &str,
    ancestry: &str,
    chromosomes: &[u8],
    reference: &ReferenceWeights,
) -> Result<PreparedCategory> {
    let ld_files: Vec<PathBuf> = chromosomes
        .iter()
        .map(|&c| paths.tissue_file(tissue, ancestry, c, "l2.ldscore.gz"))
        .collect();
    let count_files: Vec<PathBuf> = chromosomes
        .iter()
        .map(|&c| paths.tissue_file(tissue, ancestry, c, "l2.M_5_50"))
        .collect();
    prepare_category(
        &ld_files,
        &count_files,
        reference,
        |col, width| {
            if width == 1 {
                variable_name("tissue", tissue)
            } else {
                variable_name("tissue", &format!("{tissue}.{col}"))
            }
        },
        tissue,
    )
}

/// The custom annotation computed under `{data_root}/ld/{ancestry}`.
pub fn load_annotation_category(
    paths: &PathConfig,
    ancestry: &str,
    chromosomes: &[u8],
    reference: &ReferenceWeights,
) -> Result<PreparedCategory> {
    let ld_files: Vec<PathBuf> = chromosomes
        .iter()
        .map(|&c| paths.ld_output(ancestry, c, "l2.ldscore.gz"))
        .collect();
    let count_files: Vec<PathBuf> = chromosomes
        .iter()
        .map(|&c| paths.ld_output(ancestry, c, "l2.M_5_50"))
        .collect();
    let category = prepare_category(
        &ld_files,
        &count_files,
        reference,
        |_, _| CUSTOM_VARIABLE.to_string(),
        "custom annotation",
    )?;
    if category.variables.len() != 1 {
        return Err(anyhow::anyhow!(
            "custom annotation LD files have {} columns, expected 1",
            category.variables.len()
        ));
    }
    Ok(category)
}

/// Tissue directories available under `tissue/{ancestry}`.
pub fn list_tissue_sources(paths: &PathConfig, ancestry: &str) -> Result<Vec<String>> {
    list_dir(&paths.tissue_dir(ancestry), |entry| {
        entry.is_dir().then(|| file_name(entry)).flatten()
    })
}

/// Tissues with prepared inputs under `inputs/{ancestry}/tissue`.
pub fn prepared_tissues(paths: &PathConfig, ancestry: &str) -> Result<Vec<String>> {
    list_dir(&tissue_inputs_dir(paths, ancestry), |entry| {
        file_name(entry).and_then(|name| name.strip_suffix(".ld.gz").map(|s| s.to_string()))
    })
}

fn list_dir(dir: &Path, pick: impl Fn(&Path) -> Option<String>) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        if let Some(name) = pick(&entry?.path()) {
            out.push(name);
        }
    }
    out.sort();
    Ok(out)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

pub fn baseline_inputs_dir(paths: &PathConfig, ancestry: &str) -> PathBuf {
    paths.inputs_dir(ancestry).join("baseline")
}

pub fn tissue_inputs_dir(paths: &PathConfig, ancestry: &str) -> PathBuf {
    paths.inputs_dir(ancestry).join("tissue")
}

/// Prepares baseline and every tissue for one ancestry, one tissue per
/// worker.
pub fn prepare_inputs(
    paths: &PathConfig,
    ancestry: &str,
    chromosomes: &[u8],
    cores: Option<usize>,
    log: &mut File,
) -> Result<()> {
    let reference = read_weights(paths, ancestry, chromosomes)?;
    log_line(
        log,
        &format!("{} reference SNPs for {ancestry}", reference.rsids.len()),
        true,
    )?;

    let baseline = prepare_baseline(paths, ancestry, chromosomes, &reference)?;
    baseline.save(&baseline_inputs_dir(paths, ancestry), "baseline")?;
    log_line(
        log,
        &format!("Prepared {} baseline categories", baseline.variables.len()),
        true,
    )?;

    let tissues = list_tissue_sources(paths, ancestry)?;
    let out_dir = tissue_inputs_dir(paths, ancestry);
    let done = for_each_unit(cores, "tissue", &tissues, log, |tissue| {
        prepare_tissue(paths, tissue, ancestry, chromosomes, &reference)?.save(&out_dir, tissue)
    })?;
    log_line(
        log,
        &format!("Prepared inputs for {} tissues", done.len()),
        true,
    )?;
    Ok(())
}
