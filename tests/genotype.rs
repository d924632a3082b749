use sldsc::error::SldscError;
use sldsc::genotype::{GENOTYPE_LOOKUP, GenotypePanel, MISSING, PanelId, encode_call, pack_calls};
use sldsc::types::SnpInfo;

fn snps(count: usize) -> Vec<SnpInfo> {
    (0..count)
        .map(|i| SnpInfo {
            chromosome: "1".to_string(),
            rsid: format!("rs{}", i + 1),
            cm: i as f64 * 0.1,
            bp: 1000 * (i as u64 + 1),
        })
        .collect()
}

fn panel_id() -> PanelId {
    PanelId {
        ancestry: "EUR".to_string(),
        chromosome: 1,
    }
}

fn bed_bytes(rows: &[Vec<u8>]) -> Vec<u8> {
    let mut bytes = vec![0x6c, 0x1b, 0x01];
    for row in rows {
        bytes.extend(pack_calls(row).expect("pack calls"));
    }
    bytes
}

#[test]
fn lookup_decodes_bit_pairs_lowest_first() {
    // 0b11_10_01_00: pairs 00, 01, 10, 11 from the lowest bits.
    assert_eq!(GENOTYPE_LOOKUP[0b1110_0100], [0, MISSING, 1, 2]);
    assert_eq!(GENOTYPE_LOOKUP[0x00], [0, 0, 0, 0]);
    assert_eq!(GENOTYPE_LOOKUP[0xff], [2, 2, 2, 2]);
    assert_eq!(GENOTYPE_LOOKUP[0x55], [MISSING; 4]);
}

#[test]
fn every_lookup_entry_inverts_encoding() {
    for (byte, calls) in GENOTYPE_LOOKUP.iter().enumerate() {
        let packed = calls
            .iter()
            .enumerate()
            .fold(0u8, |acc, (k, &c)| acc | (encode_call(c).expect("encodable") << (2 * k)));
        assert_eq!(packed as usize, byte);
    }
}

#[test]
fn decode_trims_padding_and_keeps_request_order() {
    let rows = vec![
        vec![0, 1, 2, MISSING, 2, 1],
        vec![2, 2, 0, 0, 1, 0],
        vec![1, 0, MISSING, 2, 0, 2],
    ];
    let panel = GenotypePanel::from_bytes(panel_id(), snps(3), 6, &bed_bytes(&rows))
        .expect("panel");
    assert_eq!(panel.num_snps(), 3);

    let all = panel.decode_all().expect("decode all");
    assert_eq!(all.dim(), (3, 6));
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(all.row(i).to_vec(), *row);
    }

    let picked = panel.decode(&[2, 0]).expect("decode subset");
    assert_eq!(picked.row(0).to_vec(), rows[2]);
    assert_eq!(picked.row(1).to_vec(), rows[0]);
}

#[test]
fn decode_rejects_out_of_range_rows() {
    let panel = GenotypePanel::from_bytes(panel_id(), snps(1), 4, &bed_bytes(&[vec![0, 1, 2, 0]]))
        .expect("panel");
    let err = panel.decode(&[1]).expect_err("out of range");
    assert!(matches!(err, SldscError::InvalidArgument(_)));
}

#[test]
fn header_errors_are_format_errors() {
    let bad_magic = [0x6d, 0x1b, 0x01, 0x00];
    let err = GenotypePanel::from_bytes(panel_id(), snps(1), 4, &bad_magic).expect_err("magic");
    assert!(matches!(err, SldscError::Format { .. }));

    let individual_major = [0x6c, 0x1b, 0x00, 0x00];
    let err = GenotypePanel::from_bytes(panel_id(), snps(1), 4, &individual_major)
        .expect_err("mode");
    assert!(matches!(err, SldscError::Format { .. }));

    let short = [0x6c];
    let err = GenotypePanel::from_bytes(panel_id(), snps(1), 4, &short).expect_err("short");
    assert!(matches!(err, SldscError::Format { .. }));
}

#[test]
fn truncated_payload_is_rejected() {
    // Two SNPs of five individuals need two bytes each.
    let bytes = [0x6c, 0x1b, 0x01, 0x00, 0x00, 0x00];
    let err = GenotypePanel::from_bytes(panel_id(), snps(2), 5, &bytes).expect_err("truncated");
    assert!(matches!(err, SldscError::Format { .. }));
}

#[test]
fn invalid_counts_cannot_be_packed() {
    assert!(encode_call(3).is_none());
    assert!(matches!(
        pack_calls(&[0, 3]),
        Err(SldscError::InvalidArgument(_))
    ));
}

#[test]
fn open_reads_side_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stem = dir.path().join("chr1");
    std::fs::write(
        stem.with_extension("bim"),
        "1\trs1\t0.0\t100\tA\tG\n1\trs2\t0.5\t200\tC\tT\n",
    )
    .expect("write bim");
    std::fs::write(
        stem.with_extension("fam"),
        "f1 i1 0 0 1 -9\nf2 i2 0 0 2 -9\nf3 i3 0 0 1 -9\n",
    )
    .expect("write fam");
    std::fs::write(
        stem.with_extension("bed"),
        bed_bytes(&[vec![0, 1, 2], vec![2, MISSING, 0]]),
    )
    .expect("write bed");

    let panel = GenotypePanel::open(&stem, panel_id()).expect("open panel");
    assert_eq!(panel.num_individuals, 3);
    assert_eq!(panel.snps[1].rsid, "rs2");
    assert_eq!(panel.snps[1].bp, 200);
    let calls = panel.decode_all().expect("decode");
    assert_eq!(calls.row(1).to_vec(), vec![2, MISSING, 0]);
}
