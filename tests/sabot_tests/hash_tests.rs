//! Tests for value hashing, table sizing and value construction
//!
//! These tests verify:
//! - Placeholders hash to zero so Free-padded tuples hash like their prefix
//! - Scalar hashes are CRC-64 of the little-endian payload
//! - Hash table sizes keep the load factor under 0.75
//! - Set and map constructors canonicalize their elements
//! - Depth and tuple helpers

use crc::{Crc, CRC_64_ECMA_182};
use sabot::sabot::{get_hash, suggest_hash_size, HASH_LOAD_FACTOR};
use sabot::{SabotError, Type, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn crc64(bytes: &[u8]) -> u64 {
    Crc::<u64>::new(&CRC_64_ECMA_182).checksum(bytes)
}

// =============================================================================
// get_hash Tests
// =============================================================================

#[test]
fn test_scalar_hash_is_crc_of_payload() {
    assert_eq!(get_hash(&Value::Int32(7)), crc64(&7i32.to_le_bytes()));
    assert_eq!(get_hash(&Value::UInt64(42)), crc64(&42u64.to_le_bytes()));
    assert_eq!(get_hash(&Value::str("hello")), crc64(b"hello"));
    assert_eq!(get_hash(&Value::Blob(vec![1, 2, 3])), crc64(&[1, 2, 3]));
}

#[test]
fn test_placeholders_hash_to_zero() {
    assert_eq!(get_hash(&Value::free(Type::Str)), 0);
    assert_eq!(get_hash(&Value::Tombstone), 0);
    assert_eq!(get_hash(&Value::Void), 0);
    assert_eq!(get_hash(&Value::opt(Type::Int32, None).unwrap()), 0);
}

#[test]
fn test_free_padded_tuple_hashes_like_prefix() {
    let prefix = Value::tuple([Value::Int32(1)]);
    let padded = Value::tuple([Value::Int32(1), Value::free(Type::Str)]);
    let doubly = Value::tuple([Value::Int32(1), Value::free(Type::Str), Value::free(Type::Int64)]);

    assert_eq!(get_hash(&prefix), get_hash(&padded));
    assert_eq!(get_hash(&prefix), get_hash(&doubly));
}

#[test]
fn test_equal_values_hash_equal() {
    let a = Value::tuple([Value::Int64(10), Value::str("key")]);
    let b = Value::tuple([Value::Int64(10), Value::str("key")]);

    assert_eq!(get_hash(&a), get_hash(&b));
}

#[test]
fn test_tuple_hash_depends_on_position() {
    let a = Value::tuple([Value::Int32(1), Value::Int32(2)]);
    let b = Value::tuple([Value::Int32(2), Value::Int32(1)]);

    assert_ne!(get_hash(&a), get_hash(&b));
}

#[test]
fn test_desc_hashes_like_inner() {
    assert_eq!(
        get_hash(&Value::desc(Value::Int32(3))),
        get_hash(&Value::Int32(3))
    );
}

#[test]
fn test_distinct_strings_hash_differently() {
    let hashes: std::collections::HashSet<u64> = (0..1000)
        .map(|i| get_hash(&Value::str(format!("key-{}", i))))
        .collect();

    assert_eq!(hashes.len(), 1000);
}

// =============================================================================
// suggest_hash_size Tests
// =============================================================================

#[test]
fn test_smallest_table_has_97_slots() {
    assert_eq!(suggest_hash_size(0), 97);
    assert_eq!(suggest_hash_size(1), 97);
    assert_eq!(suggest_hash_size(72), 97);
}

#[test]
fn test_table_grows_past_load_factor() {
    assert_eq!(suggest_hash_size(73), 193);
    assert_eq!(suggest_hash_size(1000), 1381);
}

#[test]
fn test_table_sizes_respect_load_factor() {
    for n in [10u64, 500, 5_000, 50_000, 1_000_000] {
        let size = suggest_hash_size(n);
        assert!(
            (n as f64) / (size as f64) <= HASH_LOAD_FACTOR,
            "{} entries in {} slots",
            n,
            size
        );
    }
}

// =============================================================================
// Value Construction Tests
// =============================================================================

#[test]
fn test_set_sorts_and_dedups() {
    let set = Value::set(
        Type::Int32,
        vec![Value::Int32(3), Value::Int32(1), Value::Int32(3)],
    )
    .unwrap();

    assert_eq!(
        set,
        Value::Set(Type::Int32, vec![Value::Int32(1), Value::Int32(3)])
    );
}

#[test]
fn test_map_keeps_last_value_for_key() {
    let map = Value::map(
        Type::Str,
        Type::Int32,
        vec![
            (Value::str("b"), Value::Int32(1)),
            (Value::str("a"), Value::Int32(2)),
            (Value::str("b"), Value::Int32(3)),
        ],
    )
    .unwrap();

    assert_eq!(
        map,
        Value::Map(
            Type::Str,
            Type::Int32,
            vec![
                (Value::str("a"), Value::Int32(2)),
                (Value::str("b"), Value::Int32(3)),
            ]
        )
    );
}

#[test]
fn test_container_rejects_wrong_element_type() {
    let result = Value::vector(Type::Int32, vec![Value::str("x")]);

    assert!(matches!(result, Err(SabotError::Invariant(_))));
}

#[test]
fn test_depth_counts_nesting() {
    let nested = Value::vector(
        Type::vector(Type::Int8),
        vec![Value::vector(Type::Int8, vec![Value::Int8(1)]).unwrap()],
    )
    .unwrap();

    assert_eq!(Value::Int32(1).depth(), 0);
    assert_eq!(Value::opt(Type::Int32, None).unwrap().depth(), 1);
    assert_eq!(Value::tuple([Value::Int32(1)]).depth(), 1);
    assert_eq!(nested.depth(), 2);
}

#[test]
fn test_leading_defined_and_truncation() {
    let key = Value::tuple([
        Value::Int32(1),
        Value::str("a"),
        Value::free(Type::Int64),
    ]);

    assert_eq!(key.num_leading_defined(), Some(2));
    assert_eq!(
        key.truncated(2),
        Some(Value::tuple([Value::Int32(1), Value::str("a")]))
    );
    assert_eq!(key.truncated(4), None);
    assert_eq!(Value::Int32(1).num_leading_defined(), None);
}

#[test]
fn test_type_bytes_round_trip() {
    let ty = Type::tuple([
        Type::map(Type::Str, Type::set(Type::Int64)),
        Type::record([("name", Type::Str)]),
    ]);

    let bytes = ty.to_bytes().unwrap();
    assert_eq!(Type::from_bytes(&bytes).unwrap(), ty);
    assert_eq!(ty.to_string(), "(map<str, set<int64>>, {name: str})");
}
