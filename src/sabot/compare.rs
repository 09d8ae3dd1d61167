//! Type and value comparison
//!
//! Four algorithms, each a single match over the pair of kinds:
//!
//! - [`compare_types`]: structural type identity order. Tuples that agree on
//!   their common prefix compare equal regardless of arity.
//! - [`order_types`]: the order used by hash and prefix-match machinery.
//!   `Free<T>` sorts before `Opt<T>`, which sorts before `T`.
//! - [`compare_states`]: structural value comparison. Different kinds order by
//!   kind rank; pairs that no valid type can produce are `Unreachable`.
//! - [`order_states`]: `order_types` on the values' types, then
//!   `compare_states`.

use std::cmp::Ordering;

use crate::error::{Result, SabotError};

use super::{Comparison, Kind, Type, Value};

// =============================================================================
// Types
// =============================================================================

pub fn compare_types(lhs: &Type, rhs: &Type) -> Comparison {
    match (lhs, rhs) {
        (Type::Desc(a), Type::Desc(b))
        | (Type::Free(a), Type::Free(b))
        | (Type::Opt(a), Type::Opt(b))
        | (Type::Set(a), Type::Set(b))
        | (Type::Vector(a), Type::Vector(b)) => compare_types(a, b),
        (Type::Map(ak, av), Type::Map(bk, bv)) => match compare_types(ak, bk) {
            Comparison::Eq => compare_types(av, bv),
            other => other,
        },
        (Type::Record(a), Type::Record(b)) => compare_fields(a, b, compare_types),
        (Type::Tuple(a), Type::Tuple(b)) => compare_prefix(a, b, compare_types),
        _ => by_rank(lhs.kind(), rhs.kind()),
    }
}

pub fn order_types(lhs: &Type, rhs: &Type) -> Comparison {
    match (lhs, rhs) {
        (Type::Free(a), Type::Free(b)) | (Type::Opt(a), Type::Opt(b)) => order_types(a, b),
        (Type::Free(a), Type::Opt(b)) => match order_types(a, b) {
            Comparison::Eq => Comparison::Lt,
            other => other,
        },
        (Type::Opt(a), Type::Free(b)) => match order_types(a, b) {
            Comparison::Eq => Comparison::Gt,
            other => other,
        },
        (Type::Free(inner), other) | (Type::Opt(inner), other) => {
            if order_types(inner, other).is_le() {
                Comparison::Lt
            } else {
                Comparison::Gt
            }
        }
        (other, Type::Free(inner)) | (other, Type::Opt(inner)) => {
            if order_types(other, inner).is_ge() {
                Comparison::Gt
            } else {
                Comparison::Lt
            }
        }
        (Type::Desc(a), Type::Desc(b))
        | (Type::Set(a), Type::Set(b))
        | (Type::Vector(a), Type::Vector(b)) => order_types(a, b),
        (Type::Map(ak, av), Type::Map(bk, bv)) => match order_types(ak, bk) {
            Comparison::Eq => order_types(av, bv),
            other => other,
        },
        (Type::Record(a), Type::Record(b)) => compare_fields(a, b, order_types),
        (Type::Tuple(a), Type::Tuple(b)) => compare_prefix(a, b, order_types),
        _ => by_rank(lhs.kind(), rhs.kind()),
    }
}

/// Field by field, name first. A record that is a prefix of another sorts first.
fn compare_fields(
    lhs: &[(String, Type)],
    rhs: &[(String, Type)],
    cmp: fn(&Type, &Type) -> Comparison,
) -> Comparison {
    for ((ln, lt), (rn, rt)) in lhs.iter().zip(rhs) {
        let names = Comparison::from_ordering(ln.as_bytes().cmp(rn.as_bytes()));
        if names.is_ne() {
            return names;
        }
        let types = cmp(lt, rt);
        if types.is_ne() {
            return types;
        }
    }
    Comparison::from_ordering(lhs.len().cmp(&rhs.len()))
}

/// Element by element with no arity tie-break: a tuple equals any tuple it
/// is a prefix of.
fn compare_prefix(lhs: &[Type], rhs: &[Type], cmp: fn(&Type, &Type) -> Comparison) -> Comparison {
    for (l, r) in lhs.iter().zip(rhs) {
        let c = cmp(l, r);
        if c.is_ne() {
            return c;
        }
    }
    Comparison::Eq
}

fn by_rank(lhs: Kind, rhs: Kind) -> Comparison {
    Comparison::from_ordering(lhs.rank().cmp(&rhs.rank()))
}

// =============================================================================
// States
// =============================================================================

pub fn compare_states(lhs: &Value, rhs: &Value) -> Result<Comparison> {
    use Comparison as C;

    let c = match (lhs, rhs) {
        (Value::Int8(a), Value::Int8(b)) => C::from(a.cmp(b)),
        (Value::Int16(a), Value::Int16(b)) => C::from(a.cmp(b)),
        (Value::Int32(a), Value::Int32(b)) => C::from(a.cmp(b)),
        (Value::Int64(a), Value::Int64(b)) => C::from(a.cmp(b)),
        (Value::UInt8(a), Value::UInt8(b)) => C::from(a.cmp(b)),
        (Value::UInt16(a), Value::UInt16(b)) => C::from(a.cmp(b)),
        (Value::UInt32(a), Value::UInt32(b)) => C::from(a.cmp(b)),
        (Value::UInt64(a), Value::UInt64(b)) => C::from(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => C::from(a.cmp(b)),
        (Value::Char(a), Value::Char(b)) => C::from(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => C::from_partial(a.partial_cmp(b)),
        (Value::Double(a), Value::Double(b)) => C::from_partial(a.partial_cmp(b)),
        (Value::Duration(a), Value::Duration(b)) | (Value::TimePoint(a), Value::TimePoint(b)) => {
            C::from(a.cmp(b))
        }
        (Value::Uuid(a), Value::Uuid(b)) => C::from(a.cmp(b)),
        (Value::Blob(a), Value::Blob(b)) => C::from(a.as_slice().cmp(b.as_slice())),
        (Value::Str(a), Value::Str(b)) => C::from(a.as_bytes().cmp(b.as_bytes())),
        (Value::Tombstone, Value::Tombstone)
        | (Value::Void, Value::Void)
        | (Value::Free(_), Value::Free(_)) => C::Eq,
        (Value::Desc(a), Value::Desc(b)) => compare_states(a, b)?.reverse(),
        (Value::Opt(_, a), Value::Opt(_, b)) => match (a, b) {
            (Some(a), Some(b)) => compare_states(a, b)?,
            (a, b) => C::from(a.is_some().cmp(&b.is_some())),
        },
        (Value::Set(_, a), Value::Set(_, b))
        | (Value::Vector(_, a), Value::Vector(_, b))
        | (Value::Tuple(a), Value::Tuple(b)) => compare_seq(a, b)?,
        (Value::Map(_, _, a), Value::Map(_, _, b)) => {
            for ((lk, lv), (rk, rv)) in a.iter().zip(b) {
                let c = compare_states(lk, rk)?;
                if c.is_ne() {
                    return Ok(c);
                }
                let c = compare_states(lv, rv)?;
                if c.is_ne() {
                    return Ok(c);
                }
            }
            C::from(a.len().cmp(&b.len()))
        }
        (Value::Record(a), Value::Record(b)) => {
            for ((ln, lv), (rn, rv)) in a.iter().zip(b) {
                let c = C::from(ln.as_bytes().cmp(rn.as_bytes()));
                if c.is_ne() {
                    return Ok(c);
                }
                let c = compare_states(lv, rv)?;
                if c.is_ne() {
                    return Ok(c);
                }
            }
            C::from(a.len().cmp(&b.len()))
        }
        _ => {
            let (lk, rk) = (lhs.kind(), rhs.kind());
            if matches!(lk, Kind::Free | Kind::Tombstone) || matches!(rk, Kind::Free | Kind::Tombstone) {
                return Err(SabotError::Unreachable(format!(
                    "compare_states({}, {})",
                    lk, rk
                )));
            }
            by_rank(lk, rk)
        }
    };
    Ok(c)
}

pub fn order_states(lhs: &Value, rhs: &Value) -> Result<Comparison> {
    match order_types(&lhs.ty(), &rhs.ty()) {
        Comparison::Eq => compare_states(lhs, rhs),
        other => Ok(other),
    }
}

/// A total `Ordering` for sorting: `order_states`, falling back to the
/// canonical encoding when the values are unordered or incomparable.
pub fn total_state_order(lhs: &Value, rhs: &Value) -> Ordering {
    match order_states(lhs, rhs).ok().and_then(Comparison::to_ordering) {
        Some(ordering) => ordering,
        None => canonical_order(lhs, rhs),
    }
}

pub(crate) fn canonical_order(lhs: &Value, rhs: &Value) -> Ordering {
    match (bincode::serialize(lhs), bincode::serialize(rhs)) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(
                lhs = %lhs.kind(),
                rhs = %rhs.kind(),
                "Canonical encoding failed, values left unordered: {}",
                e
            );
            Ordering::Equal
        }
    }
}

/// True when both values have the same canonical encoding
pub(crate) fn same_encoding(lhs: &Value, rhs: &Value) -> Result<bool> {
    Ok(bincode::serialize(lhs)? == bincode::serialize(rhs)?)
}

fn compare_seq(lhs: &[Value], rhs: &[Value]) -> Result<Comparison> {
    for (l, r) in lhs.iter().zip(rhs) {
        let c = compare_states(l, r)?;
        if c.is_ne() {
            return Ok(c);
        }
    }
    Ok(Comparison::from(lhs.len().cmp(&rhs.len())))
}
