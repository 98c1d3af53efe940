use embedbag::lookup::case::LookupCase;
use embedbag::lookup::quant::quantize_rowwise;
use embedbag::lookup::table::{EmbeddingTable, TableData};
use embedbag::lookup::{ElementKind, KernelTier};
use half::f16;
use pretty_assertions::assert_eq;
use std::fs::File;
use std::io::Write;

fn write_header(f: &mut File, dtype: u32, rows: u32, block: u32, has_sb: u32) {
    f.write_all(b"EMBTBL01").unwrap();
    f.write_all(&1u32.to_le_bytes()).unwrap();
    for v in [dtype, rows, block, has_sb] {
        f.write_all(&v.to_le_bytes()).unwrap();
    }
}

#[test]
fn reads_hand_written_f32_table() {
    let path = "target/embedbag_f32_table.emb";
    let mut f = File::create(path).unwrap();
    write_header(&mut f, 0, 2, 3, 0);
    for x in [1.0f32, 2.0, 3.0, -1.0, -2.0, -3.0] {
        f.write_all(&x.to_le_bytes()).unwrap();
    }
    drop(f);
    let t = EmbeddingTable::load(path).unwrap();
    assert_eq!(t.rows, 2);
    assert_eq!(t.block_size, 3);
    assert_eq!(t.kind(), ElementKind::F32);
    assert_eq!(t.scale_bias, None);
    let out = t.lookup(&[0, 1, 1], &[1, 2], None, false, None).unwrap();
    assert_eq!(out, vec![1.0, 2.0, 3.0, -2.0, -4.0, -6.0]);
}

#[test]
fn saved_quantized_table_loads_back() {
    let path = "target/embedbag_u8_table.emb";
    let values: Vec<f32> = (0..12).map(|i| i as f32 * 0.5 - 2.0).collect();
    let t = EmbeddingTable::from_quant(quantize_rowwise(&values, 4).unwrap());
    t.save(path).unwrap();
    let back = EmbeddingTable::load(path).unwrap();
    assert_eq!(back, t);
    assert_eq!(back.kind(), ElementKind::U8);
    // scale-bias stored with the table is applied on lookup
    let out = back.lookup(&[2], &[1], None, false, Some(KernelTier::Generic)).unwrap();
    for (got, want) in out.iter().zip(&values[8..12]) {
        assert!((got - want).abs() < 1e-5, "{} vs {}", got, want);
    }
}

#[test]
fn saved_half_table_loads_back() {
    let path = "target/embedbag_f16_table.emb";
    let data: Vec<f16> = [0.5f32, 1.5, -0.25, 8.0].iter().copied().map(f16::from_f32).collect();
    let t = EmbeddingTable::new(2, TableData::F16(data)).unwrap();
    t.save(path).unwrap();
    assert_eq!(EmbeddingTable::load(path).unwrap(), t);
}

#[test]
fn truncated_payload_is_an_error() {
    let path = "target/embedbag_truncated.emb";
    let mut f = File::create(path).unwrap();
    write_header(&mut f, 0, 4, 4, 0);
    f.write_all(&1.0f32.to_le_bytes()).unwrap();
    drop(f);
    let err = EmbeddingTable::load(path).unwrap_err();
    assert!(format!("{:#}", err).contains("table data"), "{:#}", err);
}

#[test]
fn oversized_header_is_an_error() {
    // byte count overflows usize
    let path = "target/embedbag_overflow.emb";
    let mut f = File::create(path).unwrap();
    write_header(&mut f, 0, u32::MAX, u32::MAX, 0);
    drop(f);
    let err = EmbeddingTable::load(path).unwrap_err();
    assert!(err.to_string().contains("overflow"), "{:#}", err);

    // 4 GiB declared, nothing behind it
    let path = "target/embedbag_huge.emb";
    let mut f = File::create(path).unwrap();
    write_header(&mut f, 0, 1 << 20, 1 << 10, 1);
    f.write_all(&[0u8; 16]).unwrap();
    drop(f);
    let err = EmbeddingTable::load(path).unwrap_err();
    assert!(format!("{:#}", err).contains("table data"), "{:#}", err);
}

#[test]
fn missing_scale_bias_is_an_error() {
    let path = "target/embedbag_short_sb.emb";
    let mut f = File::create(path).unwrap();
    write_header(&mut f, 2, 2, 2, 1);
    f.write_all(&[1, 2, 3, 4]).unwrap();
    f.write_all(&1.0f32.to_le_bytes()).unwrap();
    drop(f);
    let err = EmbeddingTable::load(path).unwrap_err();
    assert!(format!("{:#}", err).contains("scale_bias"), "{:#}", err);
}

#[test]
fn bad_magic_and_dtype_rejected() {
    let path = "target/embedbag_bad_magic.emb";
    File::create(path).unwrap().write_all(b"NOTATABLE0000000").unwrap();
    assert!(EmbeddingTable::load(path).is_err());

    let path = "target/embedbag_bad_dtype.emb";
    let mut f = File::create(path).unwrap();
    write_header(&mut f, 7, 1, 1, 0);
    drop(f);
    let err = EmbeddingTable::load(path).unwrap_err();
    assert!(err.to_string().contains("dtype"), "{}", err);
}

#[test]
fn ragged_table_rejected() {
    assert!(EmbeddingTable::new(3, TableData::F32(vec![0.0; 7])).is_err());
}

#[test]
fn case_file_runs_against_table() {
    let path = "target/embedbag_case.json";
    std::fs::write(path, r#"{"indices": [1, 0, 1], "lengths": [2, 0, 1], "weights": [2.0, 1.0, 0.5], "normalize": true}"#).unwrap();
    let case = LookupCase::from_path(path).unwrap();
    assert_eq!(case.lengths, vec![2, 0, 1]);
    let t = EmbeddingTable::new(2, TableData::F32(vec![1.0, 1.0, 2.0, 4.0])).unwrap();
    let rows = case.run(&t, None).unwrap();
    assert_eq!(rows, vec![vec![2.5, 4.5], vec![0.0, 0.0], vec![1.0, 2.0]]);
}

#[test]
fn case_defaults_and_bad_case() {
    let case: LookupCase = serde_json::from_str(r#"{"indices": [0], "lengths": [1]}"#).unwrap();
    assert_eq!(case.weights, None);
    assert!(!case.normalize);

    let t = EmbeddingTable::new(1, TableData::F32(vec![3.0])).unwrap();
    let bad = LookupCase { indices: vec![0, 0], lengths: vec![1], weights: None, normalize: false };
    let err = bad.run(&t, None).unwrap_err();
    assert!(format!("{:#}", err).contains("sum of lengths"), "{:#}", err);
}
