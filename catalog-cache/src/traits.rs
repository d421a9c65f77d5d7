//! Query fetcher trait, query keys, errors and statistics.
//!
//! This module defines what a cacheable query must provide and the error
//! types the cache surfaces to its readers.

use async_trait::async_trait;
use catalog_core::CacheTag;
use std::fmt;
use thiserror::Error;

/// Identity of a cached query: the operation plus its canonical parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub operation: String,
    pub params: String,
}

impl QueryKey {
    pub fn new(operation: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: params.into(),
        }
    }

    /// A key for an operation that takes no parameters.
    pub fn operation(operation: impl Into<String>) -> Self {
        Self::new(operation, "")
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.params)
    }
}

/// A read-only query the cache can execute on a miss.
///
/// # Implementation Requirements
///
/// - `key()` must be identical for every instance describing the same
///   operation and parameters; the cache de-duplicates on it
/// - `provides_tags(None)` returns the tags known before the result arrives
///   (for example the collection tag of a list); they are registered when a
///   fetch starts so an invalidation racing the first fetch is not missed
/// - `provides_tags(Some(output))` returns the full tag set for a result
#[async_trait]
pub trait QueryFetcher: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn key(&self) -> QueryKey;

    fn provides_tags(&self, output: Option<&Self::Output>) -> Vec<CacheTag>;

    async fn fetch(&self) -> Result<Self::Output, FetchError>;
}

/// Failure of the underlying fetch, as reported to every waiting reader.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Server rejected request: {message}")]
    Rejected { status: Option<u16>, message: String },

    #[error("Malformed response: {message}")]
    Decode { message: String },
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message } | Self::Rejected { message, .. } | Self::Decode { message } => {
                message
            }
        }
    }
}

/// Errors returned by cache reads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Cached value for {key} has a different type than requested")]
    TypeMismatch { key: QueryKey },

    #[error("Fetch for {key} ended without a result")]
    Cancelled { key: QueryKey },
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a fresh entry.
    pub hits: u64,
    /// Reads that had to start a fetch.
    pub misses: u64,
    /// Reads that joined a fetch already in flight.
    pub joined: u64,
    /// Network fetches started, including background refetches.
    pub fetches: u64,
    /// Subscribed entries marked stale and refetched by an invalidation.
    pub refetched: u64,
    /// Unsubscribed entries dropped by an invalidation.
    pub dropped: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.joined;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 15,
            joined: 5,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_query_key_display() {
        assert_eq!(QueryKey::operation("records.list").to_string(), "records.list()");
        assert_eq!(QueryKey::new("records.get", "42").to_string(), "records.get(42)");
    }

    #[test]
    fn test_fetch_error_message() {
        let err = FetchError::rejected(Some(409), "Record is locked");
        assert_eq!(err.message(), "Record is locked");
        let err = FetchError::transport("connection refused");
        assert!(err.to_string().contains("connection refused"));
    }
}
