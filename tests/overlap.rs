use std::io::Write;
use std::path::Path;

use ndarray::array;

use sldsc::annotation::write_annotation;
use sldsc::config::PathConfig;
use sldsc::io::create_gz;
use sldsc::overlap::{
    annotation_overlap, assemble, baseline_overlap, load_overlap, read_frequency_mask,
    total_snps,
};

fn write_gz(path: &Path, text: &str) {
    let mut out = create_gz(path).expect("create gz");
    out.write_all(text.as_bytes()).expect("write gz");
    out.finish().expect("finish gz").flush().expect("flush gz");
}

fn write_plain(path: &Path, text: &str) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, text).expect("write");
}

fn fixture() -> (tempfile::TempDir, PathConfig) {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = PathConfig::new(dir.path().join("input"), dir.path().join("data"));
    write_plain(
        &paths.frq("EUR", 1),
        "CHR SNP A1 A2 MAF NCHROBS\n1 rs1 A G 0.5 100\n1 rs2 A G 0.01 100\n1 rs3 A G 0.3 100\n1 rs4 A G 0.2 100\n",
    );
    write_gz(
        &paths.baseline_file("EUR", 1, "annot.gz"),
        "CHR\tBP\tSNP\tCM\tbase\tA\n1\t1\trs1\t0\t1\t1\n1\t2\trs2\t0\t1\t1\n1\t3\trs3\t0\t1\t0\n1\t4\trs4\t0\t1\t1\n",
    );
    (dir, paths)
}

#[test]
fn frequency_band_is_exclusive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("chr.1.frq");
    write_plain(
        &path,
        "CHR SNP A1 A2 MAF NCHROBS\n1 a A G 0.05 1\n1 b A G 0.06 1\n1 c A G 0.95 1\n1 d A G 0.5 1\n",
    );
    assert_eq!(
        read_frequency_mask(&path).expect("mask"),
        vec![false, true, false, true]
    );
}

#[test]
fn baseline_overlap_counts_in_band_rows() {
    let (_dir, paths) = fixture();
    let overlap = baseline_overlap(&paths, "EUR", &[1]).expect("overlap");
    assert_eq!(overlap, array![[3.0, 2.0], [2.0, 2.0]]);
    assert_eq!(total_snps(overlap.view()), 3.0);
}

#[test]
fn custom_annotation_extends_baseline() {
    let (_dir, paths) = fixture();
    write_annotation(&[true, true, false, false], &paths.annotation("EUR", 1)).expect("annotation");
    let baseline = baseline_overlap(&paths, "EUR", &[1]).expect("baseline");
    let overlap = annotation_overlap(&paths, "EUR", &[1], baseline.view()).expect("overlap");
    assert_eq!(
        overlap,
        array![[3.0, 2.0, 1.0], [2.0, 2.0, 1.0], [1.0, 1.0, 1.0]]
    );
}

#[test]
fn annotation_rows_must_match_frequencies() {
    let (_dir, paths) = fixture();
    write_annotation(&[true, true, false], &paths.annotation("EUR", 1)).expect("annotation");
    let baseline = baseline_overlap(&paths, "EUR", &[1]).expect("baseline");
    assert!(annotation_overlap(&paths, "EUR", &[1], baseline.view()).is_err());
}

#[test]
fn assemble_places_cross_block_symmetrically() {
    let b = array![[4.0, 1.0], [1.0, 2.0]];
    let bt = array![[3.0], [0.0]];
    let t = array![[5.0]];
    let full = assemble(b.view(), bt.view(), t.view()).expect("assemble");
    assert_eq!(
        full,
        array![[4.0, 1.0, 3.0], [1.0, 2.0, 0.0], [3.0, 0.0, 5.0]]
    );
}

#[test]
fn overlap_files_must_be_square() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.overlap.gz");
    sldsc::io::write_matrix(array![[1.0, 2.0]].view(), &path).expect("write");
    assert!(load_overlap(&path).is_err());
}
