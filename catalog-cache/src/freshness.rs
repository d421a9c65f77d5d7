//! Freshness contracts for cache reads.
//!
//! Callers state how old a fresh entry may be before it is refetched, and
//! reads return [`CacheRead`] which carries the age and origin of the value.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::watermark::Watermark;

/// Freshness requirement for cache reads.
///
/// Invalidation always wins: a stale entry is refetched under either mode.
/// The modes only differ for entries no write has touched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Refetch fresh entries older than `max_staleness`.
    ///
    /// Use this for views that should pick up changes made through channels
    /// that do not invalidate the cache, at the cost of extra fetches.
    BestEffort {
        /// Maximum acceptable age for cached data.
        max_staleness: Duration,
    },

    /// Serve any entry no invalidation has marked stale, however old.
    #[default]
    Consistent,
}

impl Freshness {
    /// Create a BestEffort freshness with the given max staleness.
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    /// Create a Consistent freshness requirement.
    pub fn consistent() -> Self {
        Self::Consistent
    }

    /// Returns true if this is a BestEffort freshness.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::BestEffort { .. })
    }

    /// Returns true if this is a Consistent freshness.
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Whether a value fetched at `fetched_at` may still be served at `now`.
    pub fn accepts(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Consistent => true,
            Self::BestEffort { max_staleness } => {
                let age = now
                    .signed_duration_since(fetched_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                age <= *max_staleness
            }
        }
    }
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug)]
pub struct CacheRead<T> {
    /// The cached value, shared with the cache and other readers.
    value: Arc<T>,
    /// When the fetch producing this value completed.
    fetched_at: DateTime<Utc>,
    /// The watermark of the fetch producing this value.
    watermark: Watermark,
    /// Whether this was a cache hit or miss.
    was_cache_hit: bool,
}

impl<T> Clone for CacheRead<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
            watermark: self.watermark,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> CacheRead<T> {
    /// Create a new cache read from a cache hit.
    pub fn from_cache(value: Arc<T>, fetched_at: DateTime<Utc>, watermark: Watermark) -> Self {
        Self {
            value,
            fetched_at,
            watermark,
            was_cache_hit: true,
        }
    }

    /// Create a new cache read from a completed fetch.
    pub fn from_fetch(value: Arc<T>, fetched_at: DateTime<Utc>, watermark: Watermark) -> Self {
        Self {
            value,
            fetched_at,
            watermark,
            was_cache_hit: false,
        }
    }

    /// Shared handle to the underlying value.
    pub fn into_shared(self) -> Arc<T> {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Check if the data was fetched at or after the given timestamp.
    pub fn is_fresh_as_of(&self, timestamp: DateTime<Utc>) -> bool {
        self.fetched_at >= timestamp
    }

    /// Duration since the data was fetched.
    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Watermark of the fetch that produced the value.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }
}

impl<T: Clone> CacheRead<T> {
    /// Clone the underlying value out of the shared handle.
    pub fn into_value(self) -> T {
        Arc::try_unwrap(self.value).unwrap_or_else(|shared| (*shared).clone())
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_best_effort() {
        let freshness = Freshness::best_effort(Duration::from_secs(60));
        assert!(freshness.is_best_effort());
        assert!(!freshness.is_consistent());
    }

    #[test]
    fn test_freshness_default_is_consistent() {
        assert!(Freshness::default().is_consistent());
    }

    #[test]
    fn test_best_effort_rejects_old_values() {
        let now = Utc::now();
        let freshness = Freshness::best_effort(Duration::from_secs(30));
        assert!(freshness.accepts(now - chrono::Duration::seconds(10), now));
        assert!(!freshness.accepts(now - chrono::Duration::seconds(31), now));
        assert!(Freshness::consistent().accepts(now - chrono::Duration::days(2), now));
    }

    #[test]
    fn test_cache_read_flags() {
        let hit = CacheRead::from_cache(Arc::new(1), Utc::now(), Watermark::new(1));
        assert!(hit.was_cache_hit());
        let miss = CacheRead::from_fetch(Arc::new(2), Utc::now(), Watermark::new(2));
        assert!(miss.was_cache_miss());
        assert_eq!(miss.into_value(), 2);
    }

    #[test]
    fn test_cache_read_staleness() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let read = CacheRead::from_cache(Arc::new("test"), past, Watermark::zero());
        let staleness = read.staleness();
        assert!(staleness >= Duration::from_secs(4));
        assert!(staleness <= Duration::from_secs(10));
    }

    #[test]
    fn test_cache_read_is_fresh_as_of() {
        let fetched_at = Utc::now();
        let read = CacheRead::from_cache(Arc::new("test"), fetched_at, Watermark::zero());
        assert!(read.is_fresh_as_of(fetched_at - chrono::Duration::seconds(10)));
        assert!(read.is_fresh_as_of(fetched_at));
        assert!(!read.is_fresh_as_of(fetched_at + chrono::Duration::seconds(10)));
    }
}
