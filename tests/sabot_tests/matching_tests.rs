//! Tests for prefix matching
//!
//! These tests verify:
//! - Top-level tuples match on their common leading fields
//! - Free query fields unify with any concrete stored field
//! - A Free over a mismatched type degrades to a prefix match, settled by
//!   the first common field
//! - Nested tuples and records require equal arity
//! - Unreachable and unsupported pairings are reported as errors

use sabot::sabot::{match_prefix_state, match_prefix_type, PrefixMatch};
use sabot::{SabotError, Type, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn key(id: i32, name: &str) -> Value {
    Value::tuple([Value::Int32(id), Value::str(name)])
}

// =============================================================================
// Type Matching Tests
// =============================================================================

#[test]
fn test_identical_tuple_types_unify() {
    let ty = Type::tuple([Type::Int32, Type::Str]);

    assert_eq!(match_prefix_type(&ty, &ty).unwrap(), PrefixMatch::Unifies);
}

#[test]
fn test_top_level_tuple_compares_common_prefix() {
    let short = Type::tuple([Type::Int32]);
    let long = Type::tuple([Type::Int32, Type::Str]);

    assert_eq!(match_prefix_type(&short, &long).unwrap(), PrefixMatch::Unifies);
    assert_eq!(match_prefix_type(&long, &short).unwrap(), PrefixMatch::Unifies);
}

#[test]
fn test_kind_mismatch_is_no_match() {
    let query = Type::tuple([Type::Str]);
    let stored = Type::tuple([Type::Int32]);

    assert_eq!(match_prefix_type(&query, &stored).unwrap(), PrefixMatch::NoMatch);
}

#[test]
fn test_free_of_same_type_unifies() {
    let query = Type::tuple([Type::Int32, Type::free(Type::Str)]);
    let stored = Type::tuple([Type::Int32, Type::Str]);

    assert_eq!(match_prefix_type(&query, &stored).unwrap(), PrefixMatch::Unifies);
}

#[test]
fn test_free_of_other_type_is_prefix_match() {
    let query = Type::tuple([Type::free(Type::Str), Type::Int32]);
    let stored = Type::tuple([Type::Int64, Type::Int32]);

    let result = match_prefix_type(&query, &stored).unwrap();
    assert_eq!(result, PrefixMatch::PrefixMatch);
    assert!(result.is_prefix_match());
}

#[test]
fn test_mismatch_after_free_still_fails() {
    let query = Type::tuple([Type::free(Type::Str), Type::Int32]);
    let stored = Type::tuple([Type::Int64, Type::Str]);

    assert_eq!(match_prefix_type(&query, &stored).unwrap(), PrefixMatch::NoMatch);
}

#[test]
fn test_nested_tuples_need_equal_arity() {
    let query = Type::tuple([Type::tuple([Type::Int32])]);
    let stored = Type::tuple([Type::tuple([Type::Int32, Type::Str])]);

    assert_eq!(match_prefix_type(&query, &stored).unwrap(), PrefixMatch::NoMatch);
}

#[test]
fn test_records_need_same_field_names() {
    let query = Type::tuple([Type::record([("a", Type::Int32)])]);
    let renamed = Type::tuple([Type::record([("b", Type::Int32)])]);
    let longer = Type::tuple([Type::record([("a", Type::Int32), ("b", Type::Str)])]);

    assert_eq!(match_prefix_type(&query, &query).unwrap(), PrefixMatch::Unifies);
    assert_eq!(match_prefix_type(&query, &renamed).unwrap(), PrefixMatch::NoMatch);
    assert_eq!(match_prefix_type(&query, &longer).unwrap(), PrefixMatch::NoMatch);
}

#[test]
fn test_map_takes_weaker_of_key_and_value() {
    let query = Type::tuple([Type::map(Type::Int32, Type::free(Type::Str))]);
    let stored = Type::tuple([Type::map(Type::Int32, Type::Int64)]);

    assert_eq!(match_prefix_type(&query, &stored).unwrap(), PrefixMatch::PrefixMatch);
}

#[test]
fn test_free_against_free_is_unreachable() {
    let query = Type::tuple([Type::free(Type::Int32)]);
    let stored = Type::tuple([Type::free(Type::Int32)]);

    let result = match_prefix_type(&query, &stored);
    assert!(matches!(result, Err(SabotError::Unreachable(_))));
}

#[test]
fn test_concrete_against_stored_free_is_unreachable() {
    let query = Type::tuple([Type::Int32]);
    let stored = Type::tuple([Type::free(Type::Int32)]);

    let result = match_prefix_type(&query, &stored);
    assert!(matches!(result, Err(SabotError::Unreachable(_))));
}

#[test]
fn test_free_of_free_mismatch_is_unsupported() {
    let query = Type::tuple([Type::free(Type::free(Type::Int32))]);
    let stored = Type::tuple([Type::Str]);

    let result = match_prefix_type(&query, &stored);
    assert!(matches!(result, Err(SabotError::Unsupported(_))));
}

// =============================================================================
// State Matching Tests
// =============================================================================

#[test]
fn test_equal_states_unify() {
    assert_eq!(
        match_prefix_state(&key(1, "a"), &key(1, "a")).unwrap(),
        PrefixMatch::Unifies
    );
}

#[test]
fn test_different_states_do_not_match() {
    assert_eq!(
        match_prefix_state(&key(1, "a"), &key(1, "b")).unwrap(),
        PrefixMatch::NoMatch
    );
    assert_eq!(
        match_prefix_state(&key(1, "a"), &key(1, "ab")).unwrap(),
        PrefixMatch::NoMatch
    );
}

#[test]
fn test_free_field_unifies_with_any_value() {
    let query = Value::tuple([Value::free(Type::Int32), Value::Int32(5)]);

    let hit = Value::tuple([Value::Int32(3), Value::Int32(5)]);
    let miss = Value::tuple([Value::Int32(3), Value::Int32(6)]);

    assert_eq!(match_prefix_state(&query, &hit).unwrap(), PrefixMatch::Unifies);
    assert_eq!(match_prefix_state(&query, &miss).unwrap(), PrefixMatch::NoMatch);
}

#[test]
fn test_trailing_free_matches_stored_prefix() {
    let query = Value::tuple([Value::Int32(1), Value::free(Type::Str)]);

    assert_eq!(match_prefix_state(&query, &key(1, "x")).unwrap(), PrefixMatch::Unifies);
    assert_eq!(match_prefix_state(&query, &key(2, "x")).unwrap(), PrefixMatch::NoMatch);
}

#[test]
fn test_short_query_matches_longer_stored_key() {
    let query = Value::tuple([Value::Int32(1)]);

    assert_eq!(match_prefix_state(&query, &key(1, "x")).unwrap(), PrefixMatch::Unifies);
}

#[test]
fn test_type_level_prefix_match_is_kept() {
    let query = Value::tuple([Value::free(Type::Str), Value::Int32(1)]);
    let stored = Value::tuple([Value::Int64(9), Value::Int32(1)]);

    assert_eq!(match_prefix_state(&query, &stored).unwrap(), PrefixMatch::PrefixMatch);
}

#[test]
fn test_type_level_prefix_match_ignores_later_fields() {
    let query = Value::tuple([Value::free(Type::Str), Value::Int32(5)]);
    let stored = Value::tuple([Value::Int64(3), Value::Int32(6)]);

    assert_eq!(match_prefix_state(&query, &stored).unwrap(), PrefixMatch::PrefixMatch);
}

#[test]
fn test_type_level_prefix_match_needs_first_field() {
    let query = Value::tuple([Value::Int64(4), Value::free(Type::Str)]);
    let stored = Value::tuple([Value::Int64(3), Value::Int32(6)]);

    assert_eq!(match_prefix_type(&query.ty(), &stored.ty()).unwrap(), PrefixMatch::PrefixMatch);
    assert_eq!(match_prefix_state(&query, &stored).unwrap(), PrefixMatch::NoMatch);
}

#[test]
fn test_nan_unifies_by_bit_pattern() {
    let query = Value::tuple([Value::Double(f64::NAN)]);
    let stored = Value::tuple([Value::Double(f64::NAN)]);

    assert_eq!(match_prefix_state(&query, &stored).unwrap(), PrefixMatch::Unifies);
}

#[test]
fn test_nested_containers_compare_elementwise() {
    let inner = |elems: Vec<i32>| {
        Value::vector(Type::Int32, elems.into_iter().map(Value::Int32).collect()).unwrap()
    };
    let query = Value::tuple([inner(vec![1, 2])]);

    assert_eq!(
        match_prefix_state(&query, &Value::tuple([inner(vec![1, 2])])).unwrap(),
        PrefixMatch::Unifies
    );
    assert_eq!(
        match_prefix_state(&query, &Value::tuple([inner(vec![1, 2, 3])])).unwrap(),
        PrefixMatch::NoMatch
    );
}

#[test]
fn test_opt_presence_must_agree() {
    let some = Value::tuple([Value::opt(Type::Int32, Some(Value::Int32(1))).unwrap()]);
    let none = Value::tuple([Value::opt(Type::Int32, None).unwrap()]);

    assert_eq!(match_prefix_state(&some, &some).unwrap(), PrefixMatch::Unifies);
    assert_eq!(match_prefix_state(&none, &none).unwrap(), PrefixMatch::Unifies);
    assert_eq!(match_prefix_state(&some, &none).unwrap(), PrefixMatch::NoMatch);
}

#[test]
fn test_non_tuple_states_are_rejected() {
    let result = match_prefix_state(&Value::Int32(1), &Value::Int32(1));

    assert!(matches!(result, Err(SabotError::Invariant(_))));
}
