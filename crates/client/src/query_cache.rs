//! In-memory query cache with request coalescing, subscriptions and
//! prefix invalidation.
//!
//! Values are stored type-erased and keyed by [`QueryKey`]. Each key has at
//! most one fetch in flight; later callers await the same result. Fetches run
//! as spawned tasks, so a caller that goes away never aborts a fetch another
//! subscriber may be waiting on.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_channel::oneshot;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use synonymer_shared::ApiError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Value = Arc<dyn Any + Send + Sync>;
type FetchResult = Result<Value, ApiError>;
type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchResult> + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, FetchResult>>;
type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Hierarchical cache key, e.g. `["explanations", "detail", "42"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// A new key with `segment` appended.
    pub fn child(&self, segment: impl ToString) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    /// True if `prefix` is this key or one of its ancestors.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl<const N: usize> From<[&str; N]> for QueryKey {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Holds a value younger than its stale time.
    Fresh,
    /// Value (if any) may be outdated and is refetched on next access.
    Stale,
    /// A fetch is in flight.
    Fetching,
    /// The last fetch failed; an older value may still be present.
    Error,
}

/// Delivered to subscribers whenever their entry changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub state: EntryState,
}

/// Per-read options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// How long a fetched value is served without refetching. Zero means
    /// every read refetches (concurrent reads still coalesce).
    pub stale_time: Duration,
}

impl QueryOptions {
    pub fn stale_after(stale_time: Duration) -> Self {
        Self { stale_time }
    }
}

struct CacheEntry {
    value: Option<Value>,
    fetched_at: Option<Instant>,
    state: EntryState,
    stale_time: Duration,
    /// Last fetcher used for this key, kept so invalidation can refetch for subscribers.
    fetcher: Option<Fetcher>,
    in_flight: Option<InFlight>,
    fetch_id: Option<u64>,
    invalidated_in_flight: bool,
}

struct PendingFetch {
    id: u64,
    key: QueryKey,
    fetcher: Fetcher,
    done: oneshot::Sender<FetchResult>,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            value: None,
            fetched_at: None,
            state: EntryState::Stale,
            stale_time: Duration::ZERO,
            fetcher: None,
            in_flight: None,
            fetch_id: None,
            invalidated_in_flight: false,
        }
    }

    fn is_fresh(&self) -> bool {
        self.state == EntryState::Fresh
            && self.value.is_some()
            && self
                .fetched_at
                .is_some_and(|at| at.elapsed() < self.stale_time)
    }

    fn effective_state(&self) -> EntryState {
        if self.state == EntryState::Fresh && !self.is_fresh() {
            EntryState::Stale
        } else {
            self.state
        }
    }

    fn value_as<T: Clone + 'static>(&self) -> Option<T> {
        let value = self.value.as_ref()?;
        (**value).downcast_ref::<T>().cloned()
    }

    /// Mark the entry as fetching and hand back the work to launch once the
    /// lock is released. `None` if no fetcher was ever registered.
    fn begin_fetch(&mut self, key: &QueryKey, id: u64) -> Option<PendingFetch> {
        let fetcher = self.fetcher.clone()?;
        let (done, result) = oneshot::channel::<FetchResult>();
        let in_flight = result
            .map(|r| {
                r.unwrap_or_else(|_| Err(ApiError::Network("fetch was cancelled".to_string())))
            })
            .boxed()
            .shared();

        self.state = EntryState::Fetching;
        self.in_flight = Some(in_flight);
        self.fetch_id = Some(id);
        self.invalidated_in_flight = false;

        Some(PendingFetch {
            id,
            key: key.clone(),
            fetcher,
            done,
        })
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<QueryKey, CacheEntry>,
    subscribers: HashMap<u64, (QueryKey, Callback)>,
    next_subscriber: u64,
    next_fetch: u64,
}

impl CacheState {
    fn next_fetch_id(&mut self) -> u64 {
        self.next_fetch += 1;
        self.next_fetch
    }

    fn has_subscribers(&self, key: &QueryKey) -> bool {
        self.subscribers.values().any(|(k, _)| k == key)
    }

    fn events_for(&self, key: &QueryKey, state: EntryState) -> Vec<(Callback, CacheEvent)> {
        self.subscribers
            .values()
            .filter(|(k, _)| k == key)
            .map(|(_, callback)| {
                (
                    callback.clone(),
                    CacheEvent {
                        key: key.clone(),
                        state,
                    },
                )
            })
            .collect()
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn dispatch(events: Vec<(Callback, CacheEvent)>) {
    for (callback, event) in events {
        callback(&event);
    }
}

/// Shared, cheaply cloneable handle to the cache.
#[derive(Clone, Default)]
pub struct QueryCache {
    state: Arc<Mutex<CacheState>>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("QueryCache")
            .field("entries", &state.entries.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key` if it is fresh, otherwise fetch it.
    ///
    /// Concurrent calls for the same key share one fetch. The fetcher is
    /// remembered so that [`QueryCache::invalidate`] can refetch for
    /// subscribers later.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: QueryKey,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let fetcher: Fetcher = Arc::new(move || {
            let fut = fetcher();
            async move { fut.await.map(|value| Arc::new(value) as Value) }.boxed()
        });

        let mut events = Vec::new();
        let mut pending = None;
        let in_flight = {
            let mut state = lock(&self.state);
            let id = state.next_fetch_id();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(CacheEntry::new);
            entry.stale_time = options.stale_time;
            entry.fetcher = Some(fetcher);

            if entry.is_fresh() {
                if let Some(value) = entry.value_as::<T>() {
                    debug!(%key, "cache hit");
                    return Ok(value);
                }
            }

            match entry.in_flight.clone() {
                Some(in_flight) => {
                    debug!(%key, "joining in-flight fetch");
                    in_flight
                }
                None => {
                    pending = entry.begin_fetch(&key, id);
                    let in_flight = entry.in_flight.clone();
                    events = state.events_for(&key, EntryState::Fetching);
                    match in_flight {
                        Some(in_flight) => in_flight,
                        None => {
                            return Err(ApiError::Deserialize(format!(
                                "no fetcher registered for {key}"
                            )))
                        }
                    }
                }
            }
        };

        dispatch(events);
        if let Some(pending) = pending {
            self.launch(pending);
        }

        let value = in_flight.await?;
        (*value).downcast_ref::<T>().cloned().ok_or_else(|| {
            ApiError::Deserialize(format!("cached value for {key} has an unexpected type"))
        })
    }

    fn launch(&self, pending: PendingFetch) {
        let PendingFetch {
            id,
            key,
            fetcher,
            done,
        } = pending;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let cache = self.clone();
                let fut = fetcher();
                runtime.spawn(async move {
                    let result = fut.await;
                    cache.complete(&key, id, result.clone());
                    let _ = done.send(result);
                });
            }
            Err(_) => {
                warn!(%key, "no async runtime available, leaving entry unfetched");
                let result = Err(ApiError::Network("no async runtime available".to_string()));
                self.complete(&key, id, result.clone());
                let _ = done.send(result);
            }
        }
    }

    fn complete(&self, key: &QueryKey, id: u64, result: FetchResult) {
        let mut pending = None;
        let events = {
            let mut state = lock(&self.state);
            let next_id = state.next_fetch_id();
            let subscribed = state.has_subscribers(key);
            let Some(entry) = state.entries.get_mut(key) else {
                debug!(%key, "dropping result for an entry that no longer exists");
                return;
            };
            if entry.fetch_id != Some(id) {
                debug!(%key, "dropping result of a superseded fetch");
                return;
            }

            entry.in_flight = None;
            entry.fetch_id = None;
            match result {
                Ok(value) => {
                    entry.value = Some(value);
                    entry.fetched_at = Some(Instant::now());
                    entry.state = if entry.invalidated_in_flight {
                        EntryState::Stale
                    } else {
                        EntryState::Fresh
                    };
                }
                Err(e) => {
                    warn!(%key, error = %e, "query failed");
                    entry.state = EntryState::Error;
                }
            }

            if std::mem::take(&mut entry.invalidated_in_flight) && subscribed {
                debug!(%key, "entry was invalidated mid-fetch, refetching");
                pending = entry.begin_fetch(key, next_id);
            }

            let now = entry.state;
            state.events_for(key, now)
        };

        dispatch(events);
        if let Some(pending) = pending {
            self.launch(pending);
        }
    }

    /// Mark every entry under `prefix` stale. Entries with subscribers are
    /// refetched right away; the rest wait for their next read. Returns the
    /// number of entries matched.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut events = Vec::new();
        let mut pending = Vec::new();
        let matched = {
            let mut state = lock(&self.state);
            let keys: Vec<QueryKey> = state
                .entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();

            for key in &keys {
                let subscribed = state.has_subscribers(key);
                let id = state.next_fetch_id();
                let Some(entry) = state.entries.get_mut(key) else {
                    continue;
                };

                if entry.state == EntryState::Fetching {
                    entry.invalidated_in_flight = true;
                    continue;
                }

                let before = entry.effective_state();
                entry.state = EntryState::Stale;
                if subscribed {
                    if let Some(fetch) = entry.begin_fetch(key, id) {
                        pending.push(fetch);
                    }
                }

                let after = entry.state;
                if after != before {
                    events.extend(state.events_for(key, after));
                }
            }
            keys.len()
        };

        debug!(%prefix, matched, refetching = pending.len(), "invalidated");
        dispatch(events);
        for fetch in pending {
            self.launch(fetch);
        }
        matched
    }

    /// Drop every entry and subscription. Results of fetches started before
    /// the reset are discarded when they arrive.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        let entries = state.entries.len();
        let subscribers = state.subscribers.len();
        state.entries.clear();
        state.subscribers.clear();
        info!(entries, subscribers, "query cache reset");
    }

    /// Register `callback` for changes to `key`. The callback runs on
    /// whichever task caused the change and must not block.
    pub fn subscribe(
        &self,
        key: QueryKey,
        callback: impl Fn(&CacheEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut state = lock(&self.state);
        state.next_subscriber += 1;
        let id = state.next_subscriber;
        state.subscribers.insert(id, (key, Arc::new(callback)));
        Subscription {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Store `value` as a fresh result for `key`. A fetch already in flight
    /// for `key` still answers its callers but no longer updates the entry.
    pub fn set_query_data<T>(&self, key: QueryKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        let events = {
            let mut state = lock(&self.state);
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(CacheEntry::new);
            if entry.fetch_id.take().is_some() {
                debug!(%key, "value set while fetching, superseding the fetch");
                entry.in_flight = None;
                entry.invalidated_in_flight = false;
            }
            entry.value = Some(Arc::new(value));
            entry.fetched_at = Some(Instant::now());
            entry.state = EntryState::Fresh;
            let now = entry.state;
            state.events_for(&key, now)
        };
        dispatch(events);
    }

    /// Cached value for `key` regardless of freshness.
    pub fn get_query_data<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        lock(&self.state).entries.get(key)?.value_as()
    }

    /// Cached value for `key` only if it is still fresh.
    pub fn get_fresh_query_data<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        let state = lock(&self.state);
        let entry = state.entries.get(key)?;
        if entry.is_fresh() {
            entry.value_as()
        } else {
            None
        }
    }

    pub fn entry_state(&self, key: &QueryKey) -> Option<EntryState> {
        lock(&self.state)
            .entries
            .get(key)
            .map(CacheEntry::effective_state)
    }

    /// Forget a single entry. Subscribers are kept and are not notified.
    pub fn remove(&self, key: &QueryKey) -> bool {
        lock(&self.state).entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`QueryCache::subscribe`]; unsubscribes when dropped.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    state: Weak<Mutex<CacheState>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).subscribers.remove(&self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
