use std::collections::HashSet;

use ndarray::{Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sldsc::annotation::write_annotation;
use sldsc::config::{LdScoreConfig, PathConfig};
use sldsc::error::SldscError;
use sldsc::genotype::{GenotypePanel, MISSING, PanelId, pack_calls};
use sldsc::io::{read_count_row, read_table, f64_column, string_column};
use sldsc::ldscore::{
    compute_chromosome, compute_ld_scores, ld_scores, normalize_rows, snp_count_stat,
    variable_rows,
};
use sldsc::logging::open_log;
use sldsc::types::SnpInfo;
use sldsc::window::Window;

fn simulated_calls(snps: usize, individuals: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..snps)
        .map(|_| {
            let mut row: Vec<u8> = (0..individuals).map(|_| rng.gen_range(0..3u8)).collect();
            row[0] = 0;
            row[1] = 2;
            row
        })
        .collect()
}

fn snp_info(count: usize) -> Vec<SnpInfo> {
    (0..count)
        .map(|i| SnpInfo {
            chromosome: "1".to_string(),
            rsid: format!("rs{}", i + 1),
            cm: i as f64 * 0.25,
            bp: 100 * (i as u64 + 1),
        })
        .collect()
}

fn panel_from(calls: &[Vec<u8>], individuals: usize) -> GenotypePanel {
    let mut bytes = vec![0x6c, 0x1b, 0x01];
    for row in calls {
        bytes.extend(pack_calls(row).expect("pack"));
    }
    let id = PanelId {
        ancestry: "EUR".to_string(),
        chromosome: 1,
    };
    GenotypePanel::from_bytes(id, snp_info(calls.len()), individuals, &bytes).expect("panel")
}

fn pearson(a: &[u8], b: &[u8]) -> f64 {
    let n = a.len() as f64;
    let ma = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mb = b.iter().map(|&v| v as f64).sum::<f64>() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        let (dx, dy) = (x as f64 - ma, y as f64 - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    sab / (saa * sbb).sqrt()
}

#[test]
fn normalize_rows_centres_and_scales() {
    let genotypes = array![[0u8, 1, 2, MISSING], [2, 2, 0, 0]];
    let norm = normalize_rows(genotypes.view()).expect("normalize");
    for row in norm.rows() {
        let mean = row.sum() / row.len() as f64;
        let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / row.len() as f64;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
    }
    // Missing call is imputed at the row mean.
    assert!(norm[[0, 3]].abs() < 1e-12);
    assert!((norm[[0, 2]] - 2f64.sqrt()).abs() < 1e-12);
}

#[test]
fn normalize_rejects_constant_rows() {
    let constant = array![[1u8, 1, 1]];
    assert!(matches!(
        normalize_rows(constant.view()),
        Err(SldscError::Precondition(_))
    ));
    let unobserved = array![[MISSING, MISSING]];
    assert!(matches!(
        normalize_rows(unobserved.view()),
        Err(SldscError::Precondition(_))
    ));
}

#[test]
fn variable_rows_ignore_missing_calls() {
    let genotypes = array![[0u8, 0, MISSING], [MISSING, MISSING, MISSING], [0, 1, MISSING]];
    assert_eq!(variable_rows(genotypes.view()), vec![false, false, true]);
}

#[test]
fn snp_counts_use_minor_allele_frequency() {
    let mut rare = vec![0u8; 20];
    rare[0] = 1;
    let common = vec![0u8, 0, 0, 1];
    let mut genotypes = Array2::<u8>::zeros((2, 20));
    for (j, &g) in rare.iter().enumerate() {
        genotypes[[0, j]] = g;
    }
    for j in 0..20 {
        genotypes[[1, j]] = common[j % 4];
    }
    let counts = snp_count_stat(genotypes.view());
    assert_eq!(counts.m, 2);
    assert_eq!(counts.m_5_50, 1);
}

#[test]
fn self_window_gives_unit_ld_score() {
    let genotypes = array![[0u8, 1, 2, 1, 0, 2]];
    let x = normalize_rows(genotypes.view()).expect("normalize");
    let l2 = ld_scores(x.view(), x.view(), &[Window { left: 0, end: 1 }], 6).expect("l2");
    assert!((l2[0] - 1.0).abs() < 1e-12);
}

#[test]
fn empty_window_scores_zero() {
    let genotypes = array![[0u8, 1, 2, 1]];
    let x = normalize_rows(genotypes.view()).expect("normalize");
    let l2 = ld_scores(x.view(), x.view(), &[Window { left: 1, end: 1 }], 4).expect("l2");
    assert_eq!(l2[0], 0.0);
}

#[test]
fn ld_scores_need_three_individuals() {
    let genotypes = array![[0u8, 2]];
    let x = normalize_rows(genotypes.view()).expect("normalize");
    let err = ld_scores(x.view(), x.view(), &[Window { left: 0, end: 1 }], 2).expect_err("n < 3");
    assert!(matches!(err, SldscError::Precondition(_)));
}

#[test]
fn simulated_panel_matches_bias_adjusted_correlations() {
    let individuals = 40;
    let calls = simulated_calls(12, individuals, 7);
    let panel = panel_from(&calls, individuals);
    let hapmap: HashSet<String> = ["rs2", "rs5", "rs11", "rs99"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let annotation: Vec<bool> = (0..12).map(|i| i % 3 != 0).collect();

    // Window of 1 cM spans four neighbours each side at 0.25 cM spacing.
    let result = compute_chromosome(&panel, &hapmap, &annotation, 1.0).expect("compute");
    assert_eq!(result.alignment.missing, 1);
    assert_eq!(result.counts.m, 8);
    assert_eq!(result.records.len(), 3);

    let n = individuals as f64;
    for record in &result.records {
        let q: usize = record.rsid[2..].parse::<usize>().expect("rsid") - 1;
        let expected: f64 = (0..12)
            .filter(|&j| annotation[j])
            .filter(|&j| (j as f64 - q as f64).abs() * 0.25 <= 1.0 + 1e-9)
            .map(|j| {
                let r = pearson(&calls[q], &calls[j]);
                ((n - 1.0) * r * r - 1.0) / (n - 2.0)
            })
            .sum();
        assert!(
            (record.l2 - expected).abs() < 1e-9,
            "{}: {} vs {expected}",
            record.rsid,
            record.l2
        );
    }
}

#[test]
fn monomorphic_hapmap_snps_are_skipped() {
    let individuals = 20;
    let mut calls = simulated_calls(6, individuals, 3);
    calls[2] = vec![0; individuals];
    calls[4] = vec![2; individuals];
    calls[4][7] = MISSING;
    let panel = panel_from(&calls, individuals);
    let hapmap: HashSet<String> = ["rs2", "rs3", "rs5", "rs6"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let annotation = vec![true; 6];

    let result = compute_chromosome(&panel, &hapmap, &annotation, 1.0).expect("compute");
    let rsids: Vec<&str> = result.records.iter().map(|r| r.rsid.as_str()).collect();
    assert_eq!(rsids, vec!["rs2", "rs6"]);
    assert_eq!(result.invariant.missing, 2);
    assert_eq!(result.alignment.missing, 0);
    // The constant rows are also left out of the annotated reference set.
    assert_eq!(result.counts.m, 4);
    assert!(result.records.iter().all(|r| r.l2.is_finite()));
}

#[test]
fn annotation_length_must_match_panel() {
    let calls = simulated_calls(3, 8, 1);
    let panel = panel_from(&calls, 8);
    let err = compute_chromosome(&panel, &HashSet::new(), &[true, false], 1.0)
        .expect_err("length mismatch");
    assert!(matches!(err, SldscError::InvalidArgument(_)));
}

#[test]
fn chromosome_outputs_are_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = PathConfig::new(dir.path().join("input"), dir.path().join("data"));
    let individuals = 16;
    let calls = simulated_calls(6, individuals, 11);

    let stem = paths.panel_stem("EUR", 1);
    std::fs::create_dir_all(stem.parent().expect("parent")).expect("mkdir");
    let mut bed = vec![0x6c, 0x1b, 0x01];
    let mut bim = String::new();
    for (i, row) in calls.iter().enumerate() {
        bed.extend(pack_calls(row).expect("pack"));
        bim.push_str(&format!("1\trs{}\t{}\t{}\tA\tG\n", i + 1, i as f64 * 0.2, 100 * (i + 1)));
    }
    let fam: String = (0..individuals).map(|i| format!("f{i} i{i} 0 0 1 -9\n")).collect();
    std::fs::write(stem.with_extension("bed"), bed).expect("bed");
    std::fs::write(stem.with_extension("bim"), bim).expect("bim");
    std::fs::write(stem.with_extension("fam"), fam).expect("fam");

    let hapmap = paths.hapmap(1);
    std::fs::create_dir_all(hapmap.parent().expect("parent")).expect("mkdir");
    std::fs::write(&hapmap, "rs1\nrs3\nrs4\n").expect("hapmap");
    write_annotation(&[true, true, false, true, false, true], &paths.annotation("EUR", 1))
        .expect("annotation");

    let mut config = LdScoreConfig::new("EUR");
    config.chromosomes = vec![1];
    let mut log = open_log(&paths.log_file()).expect("log");
    let total = compute_ld_scores(&paths, &config, Some(2), &mut log).expect("ld scores");
    assert_eq!(total.m, 4);

    let df = read_table(&paths.ld_output("EUR", 1, "l2.ldscore.gz")).expect("read ldscore");
    assert_eq!(string_column(&df, "SNP").expect("SNP"), vec!["rs1", "rs3", "rs4"]);
    assert!(f64_column(&df, "L2").expect("L2").iter().all(|v| v.is_some()));
    let m = read_count_row(&paths.ld_output("EUR", 1, "l2.M")).expect("M");
    assert_eq!(m, vec![4.0]);
    let m_5_50 = read_count_row(&paths.ld_output("EUR", 1, "l2.M_5_50")).expect("M_5_50");
    assert_eq!(m_5_50, vec![total.m_5_50 as f64]);
}

#[test]
fn failing_chromosome_fails_the_stage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = PathConfig::new(dir.path().join("input"), dir.path().join("data"));
    let mut config = LdScoreConfig::new("EUR");
    config.chromosomes = vec![1, 2];
    let mut log = open_log(&paths.log_file()).expect("log");
    let err = compute_ld_scores(&paths, &config, None, &mut log).expect_err("no panels");
    let message = format!("{err:#}");
    assert!(message.contains("chromosome 1"));
    assert!(message.contains("chromosome 2"));
}
