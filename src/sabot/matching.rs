//! Prefix matching of (possibly Free-bearing) queries against stored values
//!
//! The left side is the query, the right side the stored value. Results only
//! ever degrade: `Unifies` → `PrefixMatch` → `NoMatch`, and `NoMatch` ends
//! the walk immediately.

use crate::error::{Result, SabotError};

use super::{Kind, Type, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrefixMatch {
    NoMatch,
    PrefixMatch,
    Unifies,
}

impl PrefixMatch {
    /// True for both `PrefixMatch` and `Unifies`
    pub fn is_prefix_match(self) -> bool {
        self != PrefixMatch::NoMatch
    }
}

// =============================================================================
// Types
// =============================================================================

/// Match a query type against a stored type.
///
/// Top-level tuples compare their common leading fields; nested tuples and
/// records must agree on arity.
pub fn match_prefix_type(lhs: &Type, rhs: &Type) -> Result<PrefixMatch> {
    match (lhs, rhs) {
        (Type::Tuple(l), Type::Tuple(r)) => match_type_elems(l.iter().zip(r)),
        _ => match_type(lhs, rhs),
    }
}

fn match_type(lhs: &Type, rhs: &Type) -> Result<PrefixMatch> {
    match (lhs, rhs) {
        (Type::Free(_), Type::Free(_)) => Err(SabotError::Unreachable(
            "match_prefix_type(free, free)".to_string(),
        )),
        (_, Type::Free(_)) => Err(SabotError::Unreachable(format!(
            "match_prefix_type({}, free)",
            lhs.kind()
        ))),
        (Type::Free(inner), other) => match match_type(inner, other)? {
            PrefixMatch::Unifies => Ok(PrefixMatch::Unifies),
            PrefixMatch::NoMatch => Ok(PrefixMatch::PrefixMatch),
            PrefixMatch::PrefixMatch => Err(SabotError::Unsupported(
                "free of a free type in a prefix match".to_string(),
            )),
        },
        (Type::Desc(a), Type::Desc(b))
        | (Type::Opt(a), Type::Opt(b))
        | (Type::Set(a), Type::Set(b))
        | (Type::Vector(a), Type::Vector(b)) => match_type(a, b),
        (Type::Map(ak, av), Type::Map(bk, bv)) => match match_type(ak, bk)? {
            PrefixMatch::NoMatch => Ok(PrefixMatch::NoMatch),
            keys => Ok(keys.min(match_type(av, bv)?)),
        },
        (Type::Record(l), Type::Record(r)) => {
            if l.len() != r.len() {
                return Ok(PrefixMatch::NoMatch);
            }
            if l.iter().zip(r).any(|((ln, _), (rn, _))| ln != rn) {
                return Ok(PrefixMatch::NoMatch);
            }
            match_type_elems(l.iter().map(|(_, t)| t).zip(r.iter().map(|(_, t)| t)))
        }
        (Type::Tuple(l), Type::Tuple(r)) => {
            if l.len() != r.len() {
                return Ok(PrefixMatch::NoMatch);
            }
            match_type_elems(l.iter().zip(r))
        }
        _ if lhs.kind() == rhs.kind() => Ok(PrefixMatch::Unifies),
        _ => Ok(PrefixMatch::NoMatch),
    }
}

fn match_type_elems<'a>(pairs: impl Iterator<Item = (&'a Type, &'a Type)>) -> Result<PrefixMatch> {
    let mut result = PrefixMatch::Unifies;
    for (l, r) in pairs {
        match match_type(l, r)? {
            PrefixMatch::NoMatch => return Ok(PrefixMatch::NoMatch),
            m => result = result.min(m),
        }
    }
    Ok(result)
}

// =============================================================================
// States
// =============================================================================

/// Match a query tuple against a stored tuple (or stored tuple prefix).
///
/// The types are matched first; a type mismatch short-circuits. Then each
/// common leading field must unify: a Free query field unifies with any
/// concrete stored field, everything else must be equal. When the types
/// only prefix-match, only the first common field is checked.
pub fn match_prefix_state(lhs: &Value, rhs: &Value) -> Result<PrefixMatch> {
    let result = match_prefix_type(&lhs.ty(), &rhs.ty())?;
    if result == PrefixMatch::NoMatch {
        return Ok(result);
    }
    let (l, r) = match (lhs, rhs) {
        (Value::Tuple(l), Value::Tuple(r)) => (l, r),
        _ => {
            return Err(SabotError::Invariant(format!(
                "prefix match needs two tuples, got {} and {}",
                lhs.kind(),
                rhs.kind()
            )))
        }
    };
    for (le, re) in l.iter().zip(r) {
        if !state_unifies(le, re)? {
            return Ok(PrefixMatch::NoMatch);
        }
        // A type-level prefix match is settled by the first field
        if result == PrefixMatch::PrefixMatch {
            break;
        }
    }
    Ok(result)
}

fn state_unifies(lhs: &Value, rhs: &Value) -> Result<bool> {
    let unifies = match (lhs, rhs) {
        (Value::Free(_), Value::Free(_) | Value::Tombstone) | (_, Value::Free(_)) => {
            return Err(unreachable_pair(lhs.kind(), rhs.kind()))
        }
        (Value::Free(_), _) => true,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
        (Value::Blob(a), Value::Blob(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Tombstone, Value::Tombstone) | (Value::Void, Value::Void) => true,
        (Value::Desc(a), Value::Desc(b)) => state_unifies(a, b)?,
        (Value::Opt(_, a), Value::Opt(_, b)) => match (a, b) {
            (Some(a), Some(b)) => state_unifies(a, b)?,
            (None, None) => true,
            _ => false,
        },
        (Value::Set(_, a), Value::Set(_, b))
        | (Value::Vector(_, a), Value::Vector(_, b))
        | (Value::Tuple(a), Value::Tuple(b)) => seq_unifies(a, b)?,
        (Value::Record(a), Value::Record(b)) => {
            a.len() == b.len() && {
                let mut all = true;
                for ((_, l), (_, r)) in a.iter().zip(b) {
                    if !state_unifies(l, r)? {
                        all = false;
                        break;
                    }
                }
                all
            }
        }
        (Value::Map(_, _, a), Value::Map(_, _, b)) => {
            a.len() == b.len() && {
                let mut all = true;
                for ((lk, lv), (rk, rv)) in a.iter().zip(b) {
                    if !state_unifies(lk, rk)? || !state_unifies(lv, rv)? {
                        all = false;
                        break;
                    }
                }
                all
            }
        }
        _ if lhs.kind() == rhs.kind() => lhs.inline_bytes() == rhs.inline_bytes(),
        _ => return Err(unreachable_pair(lhs.kind(), rhs.kind())),
    };
    Ok(unifies)
}

fn seq_unifies(lhs: &[Value], rhs: &[Value]) -> Result<bool> {
    if lhs.len() != rhs.len() {
        return Ok(false);
    }
    for (l, r) in lhs.iter().zip(rhs) {
        if !state_unifies(l, r)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn unreachable_pair(lhs: Kind, rhs: Kind) -> SabotError {
    SabotError::Unreachable(format!("match_prefix_state({}, {})", lhs, rhs))
}
