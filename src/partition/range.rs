//! Inclusive scalar ranges.

use std::fmt;

/// An inclusive range of scalars, `low <= high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRange {
    low: u64,
    high: u64,
}

impl KeyRange {
    /// Creates a range, or `None` if `low > high`.
    pub const fn new(low: u64, high: u64) -> Option<Self> {
        if low > high {
            None
        } else {
            Some(Self { low, high })
        }
    }

    #[inline]
    pub const fn low(&self) -> u64 {
        self.low
    }

    #[inline]
    pub const fn high(&self) -> u64 {
        self.high
    }

    /// `high - low`; always fits in a `u64`.
    #[inline]
    pub const fn span(&self) -> u64 {
        self.high - self.low
    }

    /// Number of scalars in the range.
    ///
    /// Saturates at `u64::MAX` for the full `[0, u64::MAX]` domain, which
    /// holds one more scalar than a `u64` can count.
    #[inline]
    pub const fn size(&self) -> u64 {
        self.span().saturating_add(1)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// A contiguous, inclusive sub-range claimed by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    /// Number of scalars in the chunk. Chunks never cover the full domain.
    #[inline]
    pub const fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}
