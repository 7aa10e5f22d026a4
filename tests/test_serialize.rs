use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};

use graphbwt::headers::GbwtHeader;
use graphbwt::DynamicGBWT;

fn serialize_to_vec(gbwt: &DynamicGBWT) -> Vec<u8> {
    let mut bytes: Vec<u8> = Vec::new();
    gbwt.serialize(&mut bytes).unwrap();
    bytes
}

fn roundtrip(gbwt: &DynamicGBWT) -> DynamicGBWT {
    let bytes = serialize_to_vec(gbwt);
    let loaded = DynamicGBWT::load(&mut bytes.as_slice()).unwrap();
    let mut report: Vec<u8> = Vec::new();
    let same = gbwt.compare(&loaded, &mut report).unwrap();
    assert!(same, "{}", String::from_utf8_lossy(&report));
    assert_eq!(*gbwt, loaded);
    loaded
}

#[test]
fn test_roundtrip_empty_index() {
    roundtrip(&DynamicGBWT::new());
}

#[test]
fn test_roundtrip_small_indexes() {
    let texts: Vec<Vec<usize>> = vec![
        vec![0],
        vec![3, 5, 7, 0],
        vec![2, 4, 0, 2, 5, 0],
        vec![2, 2, 2, 0, 3, 2, 3, 0, 2, 3, 2, 3, 0],
    ];
    for text in texts {
        let mut gbwt = DynamicGBWT::new();
        gbwt.insert(&text);
        let loaded = roundtrip(&gbwt);
        // The reloaded index keeps answering queries.
        for id in 0..gbwt.sequences() {
            assert_eq!(gbwt.extract(id), loaded.extract(id));
        }
    }
}

#[test]
fn test_roundtrip_with_alphabet_offset() {
    // A nonzero alphabet offset exercises the compacted-id mapping when
    // the incoming edges are rebuilt at load time.
    let mut gbwt = DynamicGBWT::new();
    gbwt.insert(&[100, 102, 0, 100, 103, 0]);
    assert_eq!(gbwt.header().offset(), 99);
    let loaded = roundtrip(&gbwt);

    let record = loaded.record(102);
    assert_eq!(record.incoming(), &[(100, 1)]);
    let mut merged = loaded;
    merged.merge(&gbwt, 0);
    assert_eq!(merged.sequences(), 4);
}

#[test]
fn test_roundtrip_on_disk() {
    let mut gbwt = DynamicGBWT::new();
    gbwt.insert(&[2, 4, 6, 0, 2, 5, 6, 0, 3, 5, 0]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("index{}", DynamicGBWT::EXTENSION));
    {
        let mut writer = BufWriter::new(File::create(&path).unwrap());
        gbwt.serialize(&mut writer).unwrap();
        writer.flush().unwrap();
    }

    let mut reader = BufReader::new(File::open(&path).unwrap());
    let loaded = DynamicGBWT::load(&mut reader).unwrap();
    assert_eq!(gbwt, loaded);

    // Nothing should remain after the index.
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_load_rejects_bad_tag() {
    let mut gbwt = DynamicGBWT::new();
    gbwt.insert(&[2, 4, 0]);
    let mut bytes = serialize_to_vec(&gbwt);
    bytes[0] ^= 0xFF;
    let error = DynamicGBWT::load(&mut bytes.as_slice()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidData);
}

#[test]
fn test_load_rejects_unsupported_version() {
    let mut gbwt = DynamicGBWT::new();
    gbwt.insert(&[2, 4, 0]);
    let mut bytes = serialize_to_vec(&gbwt);
    bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
    assert!(DynamicGBWT::load(&mut bytes.as_slice()).is_err());
}

#[test]
fn test_load_accepts_older_version() {
    let mut gbwt = DynamicGBWT::new();
    gbwt.insert(&[2, 4, 0]);
    let mut bytes = serialize_to_vec(&gbwt);
    bytes[4..8].copy_from_slice(&1u32.to_le_bytes());
    let loaded = DynamicGBWT::load(&mut bytes.as_slice()).unwrap();
    assert_eq!(loaded.header().version(), 1);
    assert_eq!(loaded.sequences(), gbwt.sequences());
    assert_eq!(loaded.extract(0), vec![2, 4]);
}

#[test]
fn test_load_rejects_unknown_flags() {
    let mut gbwt = DynamicGBWT::new();
    gbwt.insert(&[2, 4, 0]);
    let mut bytes = serialize_to_vec(&gbwt);
    bytes[40..48].copy_from_slice(&0x8000u64.to_le_bytes());
    let error = DynamicGBWT::load(&mut bytes.as_slice()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidData);
}

#[test]
fn test_load_rejects_truncated_input() {
    let mut gbwt = DynamicGBWT::new();
    gbwt.insert(&[2, 4, 0, 2, 5, 0]);
    let bytes = serialize_to_vec(&gbwt);
    for length in [0, 20, GbwtHeader::SIZE, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            DynamicGBWT::load(&mut &bytes[..length]).is_err(),
            "length {} accepted",
            length
        );
    }
}

#[test]
fn test_sequences_preserved_across_merge_of_loaded_indexes() {
    let mut left = DynamicGBWT::new();
    left.insert(&[2, 4, 6, 0, 3, 5, 0]);
    let mut right = DynamicGBWT::new();
    right.insert(&[2, 5, 6, 0]);

    let mut loaded_left = roundtrip(&left);
    let loaded_right = roundtrip(&right);
    loaded_left.merge(&loaded_right, 0);

    let mut direct = left.clone();
    direct.merge(&right, 0);
    assert_eq!(loaded_left, direct);
}
