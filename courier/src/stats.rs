use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters kept by an orchestrator
#[derive(Debug, Default)]
pub(crate) struct Stats {
    transport_calls: AtomicU64,
    dedup_joins: AtomicU64,
    cache_hits: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl Stats {
    pub(crate) fn transport_call(&self) {
        self.transport_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transport_calls: self.transport_calls.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Counters observed at one instant, for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Attempts handed to the transport
    pub transport_calls: u64,
    /// Calls that joined an identical request already in flight
    pub dedup_joins: u64,
    /// Calls answered from the response cache
    pub cache_hits: u64,
    /// Attempts made after a failed attempt
    pub retries: u64,
    /// Requests that ended in an error
    pub failures: u64,
}
