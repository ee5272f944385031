use crate::*;

fn encode(kt: KeyType, v: KeyValue) -> Key {
    kt.encode("k", v).expect("encodable")
}

// -------------------- Order preservation --------------------

#[test]
fn int64_encoding_preserves_order() {
    let values = [i64::MIN, -1_000, -1, 0, 1, 42, i64::MAX];
    let keys: Vec<Key> = values
        .iter()
        .map(|&v| encode(KeyType::Int64, KeyValue::Int(v)))
        .collect();
    for pair in keys.windows(2) {
        assert!(pair[0].as_bytes() < pair[1].as_bytes());
    }
}

#[test]
fn uint64_encoding_preserves_order() {
    let a = encode(KeyType::UInt64, KeyValue::UInt(9));
    let b = encode(KeyType::UInt64, KeyValue::UInt(10));
    assert!(a.as_bytes() < b.as_bytes());
}

#[test]
fn decode_inverts_encode() {
    let k = encode(KeyType::Int64, KeyValue::Int(-7));
    assert_eq!(KeyType::Int64.decode(&k), Some(KeyValue::Int(-7)));
    assert_eq!(KeyType::Int64.render(&k), "-7");

    let s = encode(KeyType::String, KeyValue::Str("alice".into()));
    assert_eq!(KeyType::String.render(&s), "alice");
}

// -------------------- Type checks --------------------

#[test]
fn string_key_rejects_integer() {
    let err = KeyType::String
        .encode("user", KeyValue::Int(1))
        .unwrap_err();
    assert!(matches!(err, MetadataError::KeyTypeMismatch { .. }));
    assert!(err.to_string().contains("user"));
}

#[test]
fn string_key_accepts_utf8_bytes_only() {
    assert!(KeyType::String
        .encode("k", KeyValue::Bytes(b"ok".to_vec()))
        .is_ok());
    assert!(KeyType::String
        .encode("k", KeyValue::Bytes(vec![0xff, 0xfe]))
        .is_err());
}

#[test]
fn uint64_rejects_negative() {
    assert!(KeyType::UInt64.encode("k", KeyValue::Int(-1)).is_err());
    assert!(KeyType::UInt64.encode("k", KeyValue::Int(5)).is_ok());
}

#[test]
fn int64_rejects_out_of_range_unsigned() {
    assert!(KeyType::Int64.encode("k", KeyValue::UInt(u64::MAX)).is_err());
}

// -------------------- Comparator & identifiers --------------------

#[test]
fn descending_order_reverses_comparison() {
    use std::cmp::Ordering;
    assert_eq!(KeyOrder::Ascending.compare(b"a", b"b"), Ordering::Less);
    assert_eq!(KeyOrder::Descending.compare(b"a", b"b"), Ordering::Greater);
    assert_eq!(KeyOrder::Descending.compare(b"a", b"a"), Ordering::Equal);
}

#[test]
fn identifiers_parse_case_insensitively() {
    assert_eq!("INT64".parse::<KeyType>().unwrap(), KeyType::Int64);
    assert_eq!("Desc".parse::<KeyOrder>().unwrap(), KeyOrder::Descending);
    assert_eq!("CRC32".parse::<HashType>().unwrap(), HashType::Crc32);
    assert!("md5".parse::<HashType>().is_err());
}

#[test]
fn key_display_falls_back_to_hex() {
    assert_eq!(Key::from_bytes(b"abc".to_vec()).to_string(), "abc");
    assert_eq!(Key::from_bytes(vec![0x00, 0xff]).to_string(), "0x00ff");
}
