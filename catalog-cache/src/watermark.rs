//! Watermarks for ordering fetches against invalidations.
//!
//! Every fetch start and every invalidation draws a watermark from one
//! per-cache clock. A fetch result is admissible for an entry only when its
//! watermark is newer than the entry's floor, which is raised by each
//! invalidation that hits the entry.

use chrono::{DateTime, Utc};

/// A watermark representing a point in the cache's history.
///
/// Watermarks are monotonically increasing and can be compared to determine
/// whether a fetch was started before or after an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this watermark was drawn.
    pub observed_at: DateTime<Utc>,
}

impl Watermark {
    /// Create a new watermark with the given sequence number.
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            observed_at: Utc::now(),
        }
    }

    /// Create a zero watermark (beginning of time).
    pub fn zero() -> Self {
        Self {
            sequence: 0,
            observed_at: DateTime::UNIX_EPOCH,
        }
    }

    /// Check if this watermark is newer than another.
    pub fn is_newer_than(&self, other: &Watermark) -> bool {
        self.sequence > other.sequence
    }

    /// Check if this watermark is at least as fresh as another.
    pub fn is_at_least(&self, other: &Watermark) -> bool {
        self.sequence >= other.sequence
    }

    /// Calculate the sequence gap between two watermarks.
    pub fn gap(&self, other: &Watermark) -> u64 {
        self.sequence.abs_diff(other.sequence)
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::zero()
    }
}

/// Source of watermarks for one cache instance. Not shared across caches.
#[derive(Debug, Default)]
pub struct WatermarkClock {
    sequence: u64,
}

impl WatermarkClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw the next watermark.
    pub fn tick(&mut self) -> Watermark {
        self.sequence += 1;
        Watermark::new(self.sequence)
    }

    /// The most recently drawn watermark.
    pub fn current(&self) -> Watermark {
        Watermark::new(self.sequence)
    }
}
