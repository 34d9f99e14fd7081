//! Lock-free chunk hand-out.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{Chunk, KeyRange};

/// Hands out successive chunks of a [`KeyRange`] to concurrent callers.
///
/// Chunk `i` covers `[low + i * chunk_size, low + (i + 1) * chunk_size - 1]`,
/// clipped to `high`. Each call atomically claims the next index, so every
/// chunk goes to exactly one caller and the union of all chunks is the range.
#[derive(Debug)]
pub struct Partitioner {
    range: KeyRange,
    chunk_size: u64,
    chunk_count: u64,
    next_index: AtomicU64,
}

impl Partitioner {
    /// Creates a partitioner with its cursor at `range.low()`.
    ///
    /// A `chunk_size` of zero is treated as one.
    pub fn new(range: KeyRange, chunk_size: u64) -> Self {
        let mut chunk_size = chunk_size.max(1);
        // The full domain in single-scalar chunks has 2^64 chunks, one more
        // than the index can count.
        if chunk_size == 1 && range.span() == u64::MAX {
            chunk_size = 2;
        }
        let chunk_count = range.span() / chunk_size + 1;

        Self {
            range,
            chunk_size,
            chunk_count,
            next_index: AtomicU64::new(0),
        }
    }

    /// Claims the next chunk, or `None` once the range is exhausted.
    #[inline]
    pub fn next_chunk(&self) -> Option<Chunk> {
        let index = self
            .next_index
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| {
                (i < self.chunk_count).then(|| i + 1)
            })
            .ok()?;

        // index < chunk_count, so offset <= span and nothing below overflows.
        let offset = index * self.chunk_size;
        let start = self.range.low() + offset;
        let end = start + (self.chunk_size - 1).min(self.range.span() - offset);
        Some(Chunk { start, end })
    }

    /// Effective chunk size.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Total number of chunks the range splits into.
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Returns true once every chunk has been handed out.
    pub fn is_exhausted(&self) -> bool {
        self.next_index.load(Ordering::Relaxed) >= self.chunk_count
    }
}
