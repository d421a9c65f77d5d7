//! The query cache: de-duplicated fetches, tag invalidation, subscriptions.
//!
//! One [`QueryCache`] is shared by every view of a session. Its state lives
//! behind a synchronous mutex that is never held across an `.await`; fetches
//! run as spawned tasks so a reader going away does not cancel a fetch other
//! readers are waiting on.
//!
//! ```text
//! read(key) ──► fresh entry? ──yes──► hit
//!                   │no
//!                   ▼
//!           fetch in flight newer than the entry floor? ──yes──► join it
//!                   │no
//!                   ▼
//!              start fetch (watermark = clock.tick())
//! ```
//!
//! Invalidation raises the floor of every hit entry to a fresh watermark.
//! Completions at or below the floor are discarded, which is what keeps a
//! fetch started before a write from landing after it.

use crate::freshness::{CacheRead, Freshness};
use crate::tag_index::{keys_to_invalidate, TagIndex};
use crate::traits::{CacheError, CacheStats, FetchError, QueryFetcher, QueryKey};
use crate::watermark::{Watermark, WatermarkClock};
use catalog_core::CacheTag;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Object-safe face of a [`QueryFetcher`], so entries of different output
/// types share one map.
trait ErasedQuery: Send + Sync {
    fn fetch(&self) -> BoxFuture<'static, Result<ErasedValue, FetchError>>;
    fn tags_for(&self, value: Option<&ErasedValue>) -> BTreeSet<CacheTag>;
}

struct Erased<Q>(Arc<Q>);

impl<Q: QueryFetcher> ErasedQuery for Erased<Q> {
    fn fetch(&self) -> BoxFuture<'static, Result<ErasedValue, FetchError>> {
        let query = Arc::clone(&self.0);
        Box::pin(async move {
            let output = query.fetch().await?;
            Ok(Arc::new(output) as ErasedValue)
        })
    }

    fn tags_for(&self, value: Option<&ErasedValue>) -> BTreeSet<CacheTag> {
        let output = value.and_then(|value| (**value).downcast_ref::<Q::Output>());
        self.0.provides_tags(output).into_iter().collect()
    }
}

fn erase<Q: QueryFetcher>(query: &Arc<Q>) -> Arc<dyn ErasedQuery> {
    Arc::new(Erased(Arc::clone(query)))
}

fn downcast<T: Send + Sync + 'static>(key: &QueryKey, value: ErasedValue) -> Result<Arc<T>, CacheError> {
    value
        .downcast::<T>()
        .map_err(|_| CacheError::TypeMismatch { key: key.clone() })
}

#[derive(Clone)]
struct StoredValue {
    value: ErasedValue,
    fetched_at: DateTime<Utc>,
    watermark: Watermark,
}

#[derive(Clone)]
struct Completion {
    watermark: Watermark,
    fetched_at: DateTime<Utc>,
    result: Result<ErasedValue, FetchError>,
}

struct InFlight {
    watermark: Watermark,
    done: watch::Receiver<Option<Completion>>,
}

struct Entry {
    query: Arc<dyn ErasedQuery>,
    /// Identifies this incarnation of the key; subscriptions from an earlier
    /// incarnation (before a reset) must not touch a later one.
    generation: u64,
    value: Option<StoredValue>,
    stale: bool,
    in_flight: Option<InFlight>,
    /// Completions at or below this watermark are not admissible.
    floor: Watermark,
    last_error: Option<FetchError>,
    subscribers: usize,
    version: watch::Sender<u64>,
}

impl Entry {
    fn new(query: Arc<dyn ErasedQuery>, created: Watermark) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            query,
            generation: created.sequence,
            value: None,
            stale: false,
            in_flight: None,
            floor: created,
            last_error: None,
            subscribers: 0,
            version,
        }
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    fn fresh_value(&self, freshness: &Freshness, now: DateTime<Utc>) -> Option<StoredValue> {
        self.value
            .as_ref()
            .filter(|stored| !self.stale && stored.watermark.is_newer_than(&self.floor))
            .filter(|stored| freshness.accepts(stored.fetched_at, now))
            .cloned()
    }

    fn joinable(&self) -> Option<(Watermark, watch::Receiver<Option<Completion>>)> {
        self.in_flight
            .as_ref()
            .filter(|in_flight| in_flight.watermark.is_newer_than(&self.floor))
            .map(|in_flight| (in_flight.watermark, in_flight.done.clone()))
    }

    fn status(&self) -> EntryStatus {
        if self.in_flight.is_some() {
            EntryStatus::InFlight
        } else if self.stale || self.value.is_none() {
            EntryStatus::Stale
        } else {
            EntryStatus::Fresh
        }
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<QueryKey, Entry>,
    index: TagIndex,
    clock: WatermarkClock,
    stats: CacheStats,
}

impl CacheInner {
    fn ensure_entry(&mut self, key: &QueryKey, query: Arc<dyn ErasedQuery>) -> &mut Entry {
        let clock = &mut self.clock;
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(query, clock.tick()))
    }
}

/// Cache-wide settings.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Freshness applied by [`QueryCache::read`] and by subscriptions.
    pub default_freshness: Freshness,
}

impl CacheConfig {
    pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.default_freshness = Freshness::best_effort(max_staleness);
        self
    }
}

/// Freshness flag of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Fresh,
    Stale,
    InFlight,
}

/// Point-in-time view of one entry, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub status: EntryStatus,
    pub has_value: bool,
    /// Watermark of the fetch that produced the stored value.
    pub value_watermark: Option<Watermark>,
    /// Watermark of the entry's creation or last invalidation.
    pub floor: Watermark,
    pub subscribers: usize,
    pub tags: BTreeSet<CacheTag>,
    pub last_error: Option<FetchError>,
}

/// What an invalidation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Subscribed entries marked stale with a background refetch started.
    pub refetching: Vec<QueryKey>,
    /// Unsubscribed entries removed from the cache.
    pub dropped: Vec<QueryKey>,
}

impl InvalidationReport {
    pub fn is_empty(&self) -> bool {
        self.refetching.is_empty() && self.dropped.is_empty()
    }
}

struct Shared {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
}

/// Tag-indexed query result cache.
///
/// Cloning is cheap and every clone shares the same entries. Operations that
/// may start a fetch (`read`, `subscribe`, `invalidate`) must run inside a
/// Tokio runtime.
#[derive(Clone)]
pub struct QueryCache {
    shared: Arc<Shared>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("QueryCache")
            .field("entries", &inner.entries.len())
            .field("watermark", &inner.clock.current().sequence)
            .finish()
    }
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(CacheInner::default()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Read with the cache's default freshness.
    pub async fn read<Q: QueryFetcher>(&self, query: Q) -> Result<CacheRead<Q::Output>, CacheError> {
        let freshness = self.shared.config.default_freshness.clone();
        self.read_with(query, freshness).await
    }

    /// Read `query`, fetching at most once per key across concurrent callers.
    ///
    /// The returned value was produced by a fetch started after the entry's
    /// last invalidation.
    pub async fn read_with<Q: QueryFetcher>(
        &self,
        query: Q,
        freshness: Freshness,
    ) -> Result<CacheRead<Q::Output>, CacheError> {
        let query = Arc::new(query);
        let key = query.key();

        loop {
            let (watermark, mut done) = {
                let mut inner = self.lock();
                let entry = inner.ensure_entry(&key, erase(&query));

                if let Some(stored) = entry.fresh_value(&freshness, Utc::now()) {
                    inner.stats.hits += 1;
                    let value = downcast(&key, stored.value)?;
                    return Ok(CacheRead::from_cache(value, stored.fetched_at, stored.watermark));
                }

                let joinable = entry.joinable();
                let pending = match joinable {
                    Some(in_flight) => {
                        inner.stats.joined += 1;
                        debug!(key = %key, watermark = in_flight.0.sequence, "Joining in-flight fetch");
                        in_flight
                    }
                    None => {
                        inner.stats.misses += 1;
                        self.start_fetch(&mut inner, &key)
                            .ok_or_else(|| CacheError::Cancelled { key: key.clone() })?
                    }
                };
                pending
            };

            let completion = match done.wait_for(Option::is_some).await {
                Ok(slot) => (*slot).clone(),
                Err(_) => None,
            };
            let Some(completion) = completion else {
                return Err(CacheError::Cancelled { key });
            };

            let outcome = {
                let inner = self.lock();
                let settled = match inner.entries.get(&key) {
                    Some(entry) if completion.watermark.is_newer_than(&entry.floor) => {
                        Some(Self::settle(&key, entry, completion))
                    }
                    _ => None,
                };
                settled
            };

            match outcome {
                Some(result) => return result,
                None => {
                    debug!(
                        key = %key,
                        watermark = watermark.sequence,
                        "Fetch superseded by invalidation, reading again"
                    );
                }
            }
        }
    }

    fn settle<T: Send + Sync + 'static>(
        key: &QueryKey,
        entry: &Entry,
        completion: Completion,
    ) -> Result<CacheRead<T>, CacheError> {
        let value = completion.result?;
        match &entry.value {
            // a later fetch already landed; hand out the newer value
            Some(stored) if stored.watermark.is_newer_than(&completion.watermark) => {
                let value = downcast(key, stored.value.clone())?;
                Ok(CacheRead::from_fetch(value, stored.fetched_at, stored.watermark))
            }
            _ => {
                let value = downcast(key, value)?;
                Ok(CacheRead::from_fetch(value, completion.fetched_at, completion.watermark))
            }
        }
    }

    fn start_fetch(
        &self,
        inner: &mut CacheInner,
        key: &QueryKey,
    ) -> Option<(Watermark, watch::Receiver<Option<Completion>>)> {
        let watermark = inner.clock.tick();
        let entry = inner.entries.get_mut(key)?;
        let (tx, rx) = watch::channel(None);
        entry.in_flight = Some(InFlight {
            watermark,
            done: rx.clone(),
        });
        let future = entry.query.fetch();
        let early_tags = entry.query.tags_for(None);
        entry.bump();
        inner.index.extend(key, early_tags);
        inner.stats.fetches += 1;

        debug!(key = %key, watermark = watermark.sequence, "Fetch started");

        let cache = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result = future.await;
            let completion = Completion {
                watermark,
                fetched_at: Utc::now(),
                result,
            };
            cache.complete(&key, &completion);
            tx.send_replace(Some(completion));
        });

        Some((watermark, rx))
    }

    fn complete(&self, key: &QueryKey, completion: &Completion) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(entry) = inner.entries.get_mut(key) else {
            debug!(key = %key, watermark = completion.watermark.sequence, "Entry gone, result discarded");
            return;
        };

        if entry
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.watermark == completion.watermark)
        {
            entry.in_flight = None;
        }

        if !completion.watermark.is_newer_than(&entry.floor) {
            debug!(
                key = %key,
                watermark = completion.watermark.sequence,
                floor = entry.floor.sequence,
                "Result predates invalidation, discarded"
            );
            entry.bump();
            return;
        }

        if entry
            .value
            .as_ref()
            .is_some_and(|stored| stored.watermark.is_newer_than(&completion.watermark))
        {
            debug!(key = %key, watermark = completion.watermark.sequence, "Out-of-order result discarded");
            entry.bump();
            return;
        }

        match &completion.result {
            Ok(value) => {
                let tags = entry.query.tags_for(Some(value));
                entry.value = Some(StoredValue {
                    value: Arc::clone(value),
                    fetched_at: completion.fetched_at,
                    watermark: completion.watermark,
                });
                entry.stale = false;
                entry.last_error = None;
                entry.bump();
                inner.index.replace(key, tags);
                debug!(key = %key, watermark = completion.watermark.sequence, "Fetch stored");
            }
            Err(err) => {
                warn!(
                    key = %key,
                    watermark = completion.watermark.sequence,
                    kept_value = entry.value.is_some(),
                    error = %err,
                    "Fetch failed"
                );
                entry.last_error = Some(err.clone());
                entry.bump();
            }
        }
    }

    /// Mark every entry carrying any of `tags` stale.
    ///
    /// Subscribed entries are refetched in the background; the others are
    /// dropped and fetched again on their next read.
    pub fn invalidate(&self, tags: &[CacheTag]) -> InvalidationReport {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let at = inner.clock.tick();
        let keys = keys_to_invalidate(&inner.index, tags);
        let mut report = InvalidationReport::default();

        for key in keys {
            let subscribed = match inner.entries.get_mut(&key) {
                Some(entry) if entry.subscribers > 0 => {
                    entry.stale = true;
                    entry.floor = at;
                    entry.bump();
                    true
                }
                _ => false,
            };

            if subscribed {
                self.start_fetch(inner, &key);
                inner.stats.refetched += 1;
                report.refetching.push(key);
            } else {
                inner.entries.remove(&key);
                inner.index.remove(&key);
                inner.stats.dropped += 1;
                report.dropped.push(key);
            }
        }

        debug!(
            watermark = at.sequence,
            tags = ?tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
            refetching = report.refetching.len(),
            dropped = report.dropped.len(),
            "Invalidated"
        );
        report
    }

    /// Register an active view of `query`.
    ///
    /// Starts a fetch when the entry has no usable value and none is in
    /// flight. The entry is kept (and refetched on invalidation) until every
    /// subscription for it is dropped.
    pub fn subscribe<Q: QueryFetcher>(&self, query: Q) -> QuerySubscription<Q::Output> {
        let freshness = self.shared.config.default_freshness.clone();
        self.subscribe_with(query, freshness)
    }

    /// [`subscribe`](Self::subscribe) with an explicit freshness for the
    /// initial decision to fetch.
    pub fn subscribe_with<Q: QueryFetcher>(
        &self,
        query: Q,
        freshness: Freshness,
    ) -> QuerySubscription<Q::Output> {
        let query = Arc::new(query);
        let key = query.key();

        let mut inner = self.lock();
        let entry = inner.ensure_entry(&key, erase(&query));
        entry.subscribers += 1;
        let generation = entry.generation;
        let version = entry.version.subscribe();
        let needs_fetch =
            entry.in_flight.is_none() && entry.fresh_value(&freshness, Utc::now()).is_none();
        if needs_fetch {
            self.start_fetch(&mut inner, &key);
        }
        drop(inner);

        debug!(key = %key, "Query subscribed");
        QuerySubscription {
            cache: self.clone(),
            key,
            generation,
            version,
            _output: PhantomData,
        }
    }

    fn release(&self, key: &QueryKey, generation: u64) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.generation == generation {
                entry.subscribers = entry.subscribers.saturating_sub(1);
                debug!(key = %key, remaining = entry.subscribers, "Query released");
            }
        }
    }

    fn refetch_key(&self, key: &QueryKey, generation: u64) -> bool {
        let mut inner = self.lock();
        let idle = inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation && entry.in_flight.is_none());
        idle && self.start_fetch(&mut inner, key).is_some()
    }

    fn state_of<T: Send + Sync + 'static>(&self, key: &QueryKey, generation: u64) -> QueryState<T> {
        let inner = self.lock();
        let Some(entry) = inner
            .entries
            .get(key)
            .filter(|entry| entry.generation == generation)
        else {
            return QueryState::default();
        };
        let data = entry
            .value
            .as_ref()
            .and_then(|stored| Arc::clone(&stored.value).downcast::<T>().ok());
        let is_fetching = entry.in_flight.is_some();
        QueryState {
            is_loading: data.is_none() && is_fetching,
            is_fetching,
            is_stale: entry.stale,
            is_error: entry.last_error.is_some(),
            error: entry.last_error.clone(),
            fetched_at: entry.value.as_ref().map(|stored| stored.fetched_at),
            data,
        }
    }

    /// Last stored value for `query`, without fetching.
    pub fn peek<Q: QueryFetcher>(&self, query: &Q) -> Option<Arc<Q::Output>> {
        let key = query.key();
        let inner = self.lock();
        let stored = inner.entries.get(&key)?.value.as_ref()?;
        Arc::clone(&stored.value).downcast::<Q::Output>().ok()
    }

    pub fn entry_status(&self, key: &QueryKey) -> Option<EntryStatus> {
        self.lock().entries.get(key).map(Entry::status)
    }

    pub fn inspect(&self, key: &QueryKey) -> Option<EntryInfo> {
        let inner = self.lock();
        let entry = inner.entries.get(key)?;
        Some(EntryInfo {
            status: entry.status(),
            has_value: entry.value.is_some(),
            value_watermark: entry.value.as_ref().map(|stored| stored.watermark),
            floor: entry.floor,
            subscribers: entry.subscribers,
            tags: inner.index.tags_of(key).cloned().unwrap_or_default(),
            last_error: entry.last_error.clone(),
        })
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entry_count: inner.entries.len() as u64,
            ..inner.stats.clone()
        }
    }

    /// The most recent watermark drawn by this cache.
    pub fn watermark(&self) -> Watermark {
        self.lock().clock.current()
    }

    /// Drop every entry. Results of fetches started before the reset are
    /// discarded when they complete; subscriptions taken before it go quiet.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let at = inner.clock.tick();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.index.clear();
        inner.stats = CacheStats::default();
        info!(watermark = at.sequence, dropped, "Cache reset");
    }
}

/// Read model of a subscribed query.
#[derive(Debug)]
pub struct QueryState<T> {
    pub data: Option<Arc<T>>,
    /// No value yet and a fetch is running.
    pub is_loading: bool,
    pub is_fetching: bool,
    /// Invalidated and not yet replaced by a fresh result.
    pub is_stale: bool,
    /// The last fetch failed; `data`, if any, predates the failure.
    pub is_error: bool,
    pub error: Option<FetchError>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_fetching: false,
            is_stale: false,
            is_error: false,
            error: None,
            fetched_at: None,
        }
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
            is_error: self.is_error,
            error: self.error.clone(),
            fetched_at: self.fetched_at,
        }
    }
}

/// An active view of one cached query. Dropping it releases the entry.
pub struct QuerySubscription<T> {
    cache: QueryCache,
    key: QueryKey,
    generation: u64,
    version: watch::Receiver<u64>,
    _output: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QuerySubscription<T> {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState<T> {
        self.cache.state_of(&self.key, self.generation)
    }

    /// Wait until the entry changes. Returns `false` once the entry is gone
    /// (cache reset) and no further changes will be observed.
    pub async fn changed(&mut self) -> bool {
        self.version.changed().await.is_ok()
    }

    /// Start a fetch now unless one is already running.
    pub fn refetch(&self) -> bool {
        self.cache.refetch_key(&self.key, self.generation)
    }
}

impl<T> std::fmt::Debug for QuerySubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> Drop for QuerySubscription<T> {
    fn drop(&mut self) {
        self.cache.release(&self.key, self.generation);
    }
}
