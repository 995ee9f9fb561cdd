//! Backpressure on outbound calls

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of calls allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT: usize = 6;

/// Bounds the number of outbound calls in flight
///
/// Waiters are served in the order they started waiting.
#[derive(Clone, Debug)]
pub struct ConcurrencyGate {
    slots: Arc<Semaphore>,
    max: usize,
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl ConcurrencyGate {
    /// Constructs a gate with `max` slots, at least one
    pub fn new(max: usize) -> Self {
        let max = max.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            slots: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits for a free slot
    ///
    /// The slot is released when the returned permit is dropped.
    pub async fn acquire(&self) -> SlotPermit {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");
        SlotPermit { _permit: permit }
    }

    /// Takes a free slot without waiting, if there is one
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|permit| SlotPermit { _permit: permit })
    }

    /// The total number of slots
    #[inline]
    pub fn max(&self) -> usize {
        self.max
    }

    /// The number of slots currently held
    pub fn in_use(&self) -> usize {
        self.max - self.slots.available_permits()
    }
}

/// A held slot of a [`ConcurrencyGate`]
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}
