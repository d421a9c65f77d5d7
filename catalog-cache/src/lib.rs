//! Tag-indexed query result cache.
//!
//! Each entry holds the outcome of one query keyed by operation and
//! parameters, together with the invalidation tags the result provides.
//! Writes name the tags they affect and the cache evicts or refetches every
//! entry sharing one of them.
//!
//! # Design Philosophy
//!
//! A cache that hides its staleness produces stale reads after writes. This
//! crate orders every fetch against every invalidation with a per-cache
//! [`Watermark`] clock: a result is only admissible for an entry if its fetch
//! started after the entry's last invalidation. Concurrent readers of one key
//! share a single fetch, and a failed refetch keeps the previous value in
//! place so views can keep rendering while they report the error.
//!
//! # Example
//!
//! ```ignore
//! let cache = QueryCache::default();
//!
//! // Any number of concurrent reads issue one network call.
//! let read = cache.read(ListRecords::new(transport.clone())).await?;
//!
//! // A view keeps the entry alive and is refetched in the background.
//! let mut list = cache.subscribe(ListRecords::new(transport));
//! cache.invalidate(&CacheTag::for_create());
//! list.changed().await;
//! ```

pub mod freshness;
pub mod query_cache;
pub mod tag_index;
pub mod traits;
pub mod watermark;

pub use freshness::{CacheRead, Freshness};
pub use query_cache::{
    CacheConfig, EntryInfo, EntryStatus, InvalidationReport, QueryCache, QueryState,
    QuerySubscription,
};
pub use tag_index::{keys_to_invalidate, TagIndex};
pub use traits::{CacheError, CacheStats, FetchError, QueryFetcher, QueryKey};
pub use watermark::{Watermark, WatermarkClock};
