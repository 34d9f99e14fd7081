//! Key range partitioning.
//!
//! Splits an inclusive `u64` range into ascending, disjoint chunks that
//! concurrent workers claim with a single atomic operation each.

mod partitioner;
mod range;

pub use partitioner::Partitioner;
pub use range::{Chunk, KeyRange};
