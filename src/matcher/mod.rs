//! Target address matching.
//!
//! Matching is byte-exact: the target string supplied at start is compared
//! verbatim against every derived address, with no normalization.

mod target;

pub use target::{matches, Target};
