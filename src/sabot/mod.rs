//! Sabot Module
//!
//! The dynamically typed value runtime: a closed set of kinds, the types and
//! values built from them, and the pairwise algorithms over them.
//!
//! ```text
//!   Type  ──compare_types / order_types──────►  Comparison {Lt, Eq, Gt, Ne}
//!   Value ──compare_states / order_states────►  Comparison
//!   Value ──match_prefix_state (query, stored)►  PrefixMatch {NoMatch, PrefixMatch, Unifies}
//!   Value ──get_hash─────────────────────────►  u64
//! ```

mod compare;
mod comparison;
mod hash;
mod kind;
mod matching;
mod types;
mod value;

pub use compare::{compare_states, compare_types, order_states, order_types, total_state_order};
pub use comparison::Comparison;
pub use hash::{get_hash, suggest_hash_size, HASH_LOAD_FACTOR};
pub use kind::Kind;
pub use matching::{match_prefix_state, match_prefix_type, PrefixMatch};
pub use types::Type;
pub use value::Value;

pub(crate) use compare::{canonical_order, same_encoding};
