//! PLINK `.bed` genotype panels.
//!
//! Calls are packed four to a byte, SNP-major, lowest bit pair first. A row
//! is padded to a whole number of bytes so the last byte of each SNP may
//! carry up to three padding calls.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use anyhow::Context;
use ndarray::Array2;

use crate::error::{Result, SldscError};
use crate::io::open_maybe_compressed;
use crate::types::SnpInfo;

pub const BED_MAGIC: [u8; 2] = [0x6c, 0x1b];
pub const SNP_MAJOR: u8 = 0x01;
pub const HEADER_LEN: usize = 3;
pub const MISSING: u8 = 9;

/// SNPs × individuals, values in {0, 1, 2} and [`MISSING`].
pub type AlleleMatrix = Array2<u8>;

/// Allele count for the integer value of one bit pair.
const fn decode_call(code: u8) -> u8 {
    match code & 0b11 {
        0b00 => 0,
        0b10 => 1,
        0b11 => 2,
        _ => MISSING,
    }
}

const fn build_lookup() -> [[u8; 4]; 256] {
    let mut table = [[0u8; 4]; 256];
    let mut byte = 0;
    while byte < 256 {
        let mut k = 0;
        while k < 4 {
            table[byte][k] = decode_call((byte >> (2 * k)) as u8);
            k += 1;
        }
        byte += 1;
    }
    table
}

/// Byte → four decoded calls, individual order.
pub static GENOTYPE_LOOKUP: [[u8; 4]; 256] = build_lookup();

/// Bit pair for an allele count; `None` for anything but 0, 1, 2 or missing.
pub fn encode_call(count: u8) -> Option<u8> {
    match count {
        0 => Some(0b00),
        1 => Some(0b10),
        2 => Some(0b11),
        MISSING => Some(0b01),
        _ => None,
    }
}

/// Packs one SNP row of allele counts into `.bed` bytes, padding with
/// homozygous-reference calls.
pub fn pack_calls(calls: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; calls.len().div_ceil(4)];
    for (j, &call) in calls.iter().enumerate() {
        let code = encode_call(call).ok_or_else(|| {
            SldscError::InvalidArgument(format!("allele count {call} cannot be encoded"))
        })?;
        out[j / 4] |= code << (2 * (j % 4));
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PanelId {
    pub ancestry: String,
    pub chromosome: u8,
}

impl std::fmt::Display for PanelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} chr{}", self.ancestry, self.chromosome)
    }
}

#[derive(Debug, Clone)]
pub struct GenotypePanel {
    pub id: PanelId,
    pub snps: Vec<SnpInfo>,
    pub num_individuals: usize,
    bytes_per_snp: usize,
    data: Vec<u8>,
}

impl GenotypePanel {
    /// Builds a panel from the raw contents of a `.bed` file.
    pub fn from_bytes(
        id: PanelId,
        snps: Vec<SnpInfo>,
        num_individuals: usize,
        bytes: &[u8],
    ) -> Result<Self> {
        validate_header(bytes, &id.to_string())?;
        let bytes_per_snp = num_individuals.div_ceil(4);
        let expected = HEADER_LEN + bytes_per_snp * snps.len();
        if bytes.len() < expected {
            return Err(SldscError::Format {
                source_name: id.to_string(),
                reason: format!(
                    "payload truncated: expected {expected} bytes for {} SNPs x {num_individuals} individuals, found {}",
                    snps.len(),
                    bytes.len()
                ),
            });
        }
        Ok(Self {
            id,
            snps,
            num_individuals,
            bytes_per_snp,
            data: bytes[HEADER_LEN..expected].to_vec(),
        })
    }

    /// Loads `{stem}.bed` with its `.bim` and `.fam` side files.
    pub fn open(stem: &Path, id: PanelId) -> anyhow::Result<Self> {
        let bim = stem.with_extension("bim");
        let fam = stem.with_extension("fam");
        let bed = stem.with_extension("bed");
        let snps = read_bim(&bim)?;
        let num_individuals = count_fam(&fam)?;
        let bytes = fs::read(&bed).with_context(|| format!("read {}", bed.display()))?;
        tracing::debug!(
            "{id}: {} SNPs, {num_individuals} individuals from {}",
            snps.len(),
            bed.display()
        );
        Ok(Self::from_bytes(id, snps, num_individuals, &bytes)?)
    }

    pub fn num_snps(&self) -> usize {
        self.snps.len()
    }

    /// Dense allele counts for the requested SNP rows, in request order.
    pub fn decode(&self, indices: &[usize]) -> Result<AlleleMatrix> {
        let n = self.num_individuals;
        let mut out = AlleleMatrix::zeros((indices.len(), n));
        for (row, &snp) in indices.iter().enumerate() {
            if snp >= self.snps.len() {
                return Err(SldscError::InvalidArgument(format!(
                    "SNP index {snp} out of range for {} ({} SNPs)",
                    self.id,
                    self.snps.len()
                )));
            }
            let start = snp * self.bytes_per_snp;
            let packed = &self.data[start..start + self.bytes_per_snp];
            let mut target = out.row_mut(row);
            for (b, &byte) in packed.iter().enumerate() {
                let calls = &GENOTYPE_LOOKUP[byte as usize];
                for (k, &call) in calls.iter().enumerate() {
                    let col = 4 * b + k;
                    if col < n {
                        target[col] = call;
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn decode_all(&self) -> Result<AlleleMatrix> {
        let all: Vec<usize> = (0..self.snps.len()).collect();
        self.decode(&all)
    }
}

fn validate_header(bytes: &[u8], source_name: &str) -> Result<()> {
    match bytes {
        [0x6c, 0x1b, SNP_MAJOR, ..] => Ok(()),
        [0x6c, 0x1b, mode, ..] => Err(SldscError::Format {
            source_name: source_name.to_string(),
            reason: format!("mode byte {mode:#04x} is not SNP-major"),
        }),
        [a, b, ..] => Err(SldscError::Format {
            source_name: source_name.to_string(),
            reason: format!("bad magic {a:#04x} {b:#04x}"),
        }),
        _ => Err(SldscError::Format {
            source_name: source_name.to_string(),
            reason: "file shorter than the 3-byte header".to_string(),
        }),
    }
}

/// `.bim` rows: `chr rsid cM bp a1 a2`.
pub fn read_bim(path: &Path) -> anyhow::Result<Vec<SnpInfo>> {
    let reader = open_maybe_compressed(path)?;
    let mut snps = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 4 {
            return Err(SldscError::Parse(format!(
                "{} line {}: expected at least 4 fields",
                path.display(),
                line_no + 1
            ))
            .into());
        }
        let cm = fields[2].parse::<f64>().map_err(|e| {
            SldscError::Parse(format!("{} line {}: cM {e}", path.display(), line_no + 1))
        })?;
        let bp = fields[3].parse::<u64>().map_err(|e| {
            SldscError::Parse(format!("{} line {}: bp {e}", path.display(), line_no + 1))
        })?;
        snps.push(SnpInfo {
            chromosome: fields[0].to_string(),
            rsid: fields[1].to_string(),
            cm,
            bp,
        });
    }
    Ok(snps)
}

pub fn count_fam(path: &Path) -> anyhow::Result<usize> {
    let reader = open_maybe_compressed(path)?;
    let mut count = 0usize;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
