use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ndarray::{Array2, ArrayView2};
use polars::prelude::*;
use tempfile::NamedTempFile;

pub type GzWriter = GzEncoder<BufWriter<File>>;

/// Reads a delimited table with a header row. `.gz` and `.bz2` inputs are
/// decompressed first; empty fields, `NA`, `NaN` and `.` become nulls.
pub fn read_table(path: &Path) -> Result<DataFrame> {
    read_table_with_separator(path, None)
}

/// As [`read_table`], with an explicit field separator instead of sniffing
/// the header line.
pub fn read_table_with_separator(path: &Path, separator: Option<u8>) -> Result<DataFrame> {
    let ext = extension(path);
    if ext == "gz" || ext == "bz2" {
        let tmp = decompress_to_temp(path, &ext)?;
        return read_table_plain(tmp.path(), separator);
    }
    read_table_plain(path, separator)
}

fn read_table_plain(path: &Path, separator: Option<u8>) -> Result<DataFrame> {
    let delimiter = match separator {
        Some(sep) => sep,
        None => detect_delimiter(path)?,
    };
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(delimiter)
                .with_null_values(Some(NullValues::AllColumns(vec![
                    "".into(),
                    "NA".into(),
                    "NaN".into(),
                    ".".into(),
                ])))
                .with_missing_is_null(true),
        )
        .with_ignore_errors(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("read {}", path.display()))?;
    Ok(df)
}

fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut first = String::new();
    reader.read_line(&mut first)?;
    if first.contains(',') && !first.contains('\t') {
        return Ok(b',');
    }
    Ok(b'\t')
}

fn decompress_to_temp(path: &Path, ext: &str) -> Result<NamedTempFile> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut decoder: Box<dyn Read> = match ext {
        "gz" => Box::new(GzDecoder::new(file)),
        "bz2" => Box::new(BzDecoder::new(file)),
        _ => Box::new(file),
    };
    let mut tmp = NamedTempFile::new()?;
    std::io::copy(&mut decoder, &mut tmp)?;
    Ok(tmp)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Column as `f64` values, casting string columns and keeping nulls as `None`.
pub fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df
        .column(name)
        .with_context(|| format!("missing column {name}"))?
        .as_series()
        .context("series")?
        .cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

pub fn string_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let series = df
        .column(name)
        .with_context(|| format!("missing column {name}"))?
        .as_series()
        .context("series")?
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or("").trim().to_string())
        .collect())
}

pub fn open_maybe_compressed(path: &Path) -> Result<Box<dyn BufRead>> {
    let ext = extension(path);
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    if ext == "gz" {
        return Ok(Box::new(BufReader::new(GzDecoder::new(file))));
    }
    if ext == "bz2" {
        return Ok(Box::new(BufReader::new(BzDecoder::new(file))));
    }
    Ok(Box::new(BufReader::new(file)))
}

pub fn create_gz(path: &Path) -> Result<GzWriter> {
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    Ok(GzEncoder::new(BufWriter::new(file), Compression::default()))
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

/// Writes a matrix as tab-separated rows, gzip-compressed when the path ends
/// in `.gz`.
pub fn write_matrix(matrix: ArrayView2<f64>, path: &Path) -> Result<()> {
    if extension(path) == "gz" {
        let mut out = create_gz(path)?;
        write_rows(&mut out, matrix)?;
        out.finish()?.flush()?;
    } else {
        ensure_parent(path)?;
        let mut out = BufWriter::new(File::create(path)?);
        write_rows(&mut out, matrix)?;
        out.flush()?;
    }
    Ok(())
}

fn write_rows<W: Write>(out: &mut W, matrix: ArrayView2<f64>) -> Result<()> {
    for row in matrix.rows() {
        let line = row
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let reader = open_maybe_compressed(path)?;
    let mut data = Vec::new();
    let mut n_cols = None;
    let mut n_rows = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut width = 0usize;
        for token in line.split_whitespace() {
            let value = token.parse::<f64>().with_context(|| {
                format!("parse {token:?} at line {} of {}", line_no + 1, path.display())
            })?;
            data.push(value);
            width += 1;
        }
        match n_cols {
            None => n_cols = Some(width),
            Some(expected) if expected != width => {
                return Err(anyhow::anyhow!(
                    "{} is not rectangular: line {} has {width} values, expected {expected}",
                    path.display(),
                    line_no + 1
                ));
            }
            Some(_) => {}
        }
        n_rows += 1;
    }
    Array2::from_shape_vec((n_rows, n_cols.unwrap_or(0)), data)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

pub fn write_string_list(values: &[String], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut file = File::create(path)?;
    writeln!(file, "{}", values.join("\t"))?;
    Ok(())
}

pub fn read_string_list(path: &Path) -> Result<Vec<String>> {
    let mut reader = open_maybe_compressed(path)?;
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(line
        .trim_end_matches(['\n', '\r'])
        .split('\t')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect())
}

pub fn write_scalar<T: std::fmt::Display>(value: T, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut file = File::create(path)?;
    writeln!(file, "{value}")?;
    Ok(())
}

/// Numbers on the first non-empty line of a count file such as `*.l2.M_5_50`.
pub fn read_count_row(path: &Path) -> Result<Vec<f64>> {
    let reader = open_maybe_compressed(path)?;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        return line
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .with_context(|| format!("parse {token:?} in {}", path.display()))
            })
            .collect();
    }
    Err(anyhow::anyhow!("{} is empty", path.display()))
}
