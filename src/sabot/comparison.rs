//! Four-valued comparison result

use std::cmp::Ordering;

/// Result of comparing two types or two values.
///
/// `Ne` means "not equal, but not ordered either" (e.g. a NaN float).
/// `is_ne()` is true for every outcome other than `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Lt,
    Eq,
    Gt,
    Ne,
}

impl Comparison {
    pub fn from_ordering(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Comparison::Lt,
            Ordering::Equal => Comparison::Eq,
            Ordering::Greater => Comparison::Gt,
        }
    }

    /// `None` (unordered) maps to `Ne`
    pub fn from_partial(ordering: Option<Ordering>) -> Self {
        ordering.map_or(Comparison::Ne, Comparison::from_ordering)
    }

    pub fn to_ordering(self) -> Option<Ordering> {
        match self {
            Comparison::Lt => Some(Ordering::Less),
            Comparison::Eq => Some(Ordering::Equal),
            Comparison::Gt => Some(Ordering::Greater),
            Comparison::Ne => None,
        }
    }

    /// Swap the sides. `Ne` stays `Ne`.
    pub fn reverse(self) -> Self {
        match self {
            Comparison::Lt => Comparison::Gt,
            Comparison::Gt => Comparison::Lt,
            other => other,
        }
    }

    pub fn is_eq(self) -> bool {
        self == Comparison::Eq
    }

    pub fn is_ne(self) -> bool {
        self != Comparison::Eq
    }

    pub fn is_lt(self) -> bool {
        self == Comparison::Lt
    }

    pub fn is_gt(self) -> bool {
        self == Comparison::Gt
    }

    pub fn is_le(self) -> bool {
        matches!(self, Comparison::Lt | Comparison::Eq)
    }

    pub fn is_ge(self) -> bool {
        matches!(self, Comparison::Gt | Comparison::Eq)
    }
}

impl From<Ordering> for Comparison {
    fn from(ordering: Ordering) -> Self {
        Comparison::from_ordering(ordering)
    }
}
