//! Short-lived memoization of successful `GET` responses

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};

use crate::{DedupKey, DedupKeyRef, Response};

/// Default number of cached responses
pub const DEFAULT_CAPACITY: usize = 50;

/// Default period of the background sweeper
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct CacheEntry {
    response: Response,
    stored_at: Instant,
    /// `None` when the TTL reaches past any representable instant
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_key: HashMap<DedupKey, CacheEntry>,
    insertion_order: VecDeque<DedupKey>,
    generation: u64,
}

impl Entries {
    fn remove(&mut self, key: &DedupKeyRef) -> Option<CacheEntry> {
        let entry = self.by_key.remove(key)?;
        self.insertion_order.retain(|k| k.as_str() != key.as_str());
        Some(entry)
    }
}

/// A bounded, time-boxed cache of responses keyed by request identity
///
/// Entries are never served once their TTL has elapsed. Expired entries are
/// removed when next looked up, by [`purge_expired()`][Self::purge_expired()],
/// or by a background sweeper. When full, the oldest insertion is evicted.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResponseCache {
    /// Constructs a cache holding at most `capacity` responses, at least one
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    /// Looks up an unexpired response
    pub fn get(&self, key: &DedupKeyRef) -> Option<Response> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let entry = entries.by_key.get(key)?;
        if entry.is_live(now) {
            tracing::trace!(
                age_ms = now.duration_since(entry.stored_at).as_millis() as u64,
                "response served from cache"
            );
            return Some(entry.response.clone());
        }

        entries.remove(key);
        tracing::trace!("cached response expired");
        None
    }

    /// Stores a response for `ttl`
    ///
    /// Only success responses are stored; returns whether the response was
    /// stored. Storing under an existing key replaces that entry.
    pub fn put(&self, key: DedupKey, response: Response, ttl: Duration) -> bool {
        self.store(None, key, response, ttl)
    }

    /// The current generation, advanced by every [`clear()`][Self::clear()]
    pub fn generation(&self) -> u64 {
        self.entries.lock().generation
    }

    /// Stores a response for `ttl`, unless the cache was cleared since
    /// `generation` was read
    ///
    /// A response fetched before a clear is never stored after it.
    pub fn put_if_current(
        &self,
        generation: u64,
        key: DedupKey,
        response: Response,
        ttl: Duration,
    ) -> bool {
        self.store(Some(generation), key, response, ttl)
    }

    fn store(
        &self,
        generation: Option<u64>,
        key: DedupKey,
        response: Response,
        ttl: Duration,
    ) -> bool {
        if !response.is_success() || ttl.is_zero() {
            return false;
        }

        let stored_at = Instant::now();
        let entry = CacheEntry {
            response,
            stored_at,
            expires_at: stored_at.checked_add(ttl),
        };

        let mut entries = self.entries.lock();
        if generation.is_some_and(|generation| generation != entries.generation) {
            tracing::trace!(key = %key, "cache cleared while the response was in flight, not storing");
            return false;
        }

        entries.remove(&key);
        entries.insertion_order.push_back(key.clone());
        entries.by_key.insert(key, entry);

        while entries.by_key.len() > self.capacity {
            let Some(oldest) = entries.insertion_order.pop_front() else {
                break;
            };
            entries.by_key.remove(&oldest);
            tracing::debug!(key = %oldest, "response cache full, evicted oldest entry");
        }

        true
    }

    /// Removes a single entry
    pub fn invalidate(&self, key: &DedupKeyRef) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Removes every entry
    ///
    /// Responses still in flight when the cache is cleared will not be
    /// stored through [`put_if_current()`][Self::put_if_current()].
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.by_key.clear();
        entries.insertion_order.clear();
        entries.generation = entries.generation.wrapping_add(1);
    }

    /// Removes every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let Entries {
            by_key,
            insertion_order,
            ..
        } = &mut *entries;
        let before = by_key.len();
        by_key.retain(|_, entry| entry.is_live(now));
        insertion_order.retain(|key| by_key.contains_key(key));

        before - by_key.len()
    }

    /// The number of entries held, including expired ones not yet removed
    pub fn len(&self) -> usize {
        self.entries.lock().by_key.len()
    }

    /// Whether no entries are held
    pub fn is_empty(&self) -> bool {
        self.entries.lock().by_key.is_empty()
    }

    /// Spawns a task that purges expired entries every `period`
    ///
    /// The task ends on its own once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(sweep(cache, period))
    }
}

async fn sweep(cache: Weak<ResponseCache>, period: Duration) {
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;

        let Some(cache) = cache.upgrade() else {
            break;
        };

        let purged = cache.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "swept expired responses");
        }
    }
}
