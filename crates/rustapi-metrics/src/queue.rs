//! Thread-safe FIFO of payloads awaiting delivery.

use crate::payload::Payload;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Pending payloads, in insertion order.
///
/// Capacity is unbounded; the controller keeps it small by flushing once
/// the flush threshold is reached. Every push and every drain takes the
/// lock once, so concurrent drains partition the contents without
/// duplicating or losing a payload.
#[derive(Debug, Default)]
pub struct PayloadQueue {
    items: Mutex<VecDeque<Payload>>,
}

impl PayloadQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload and return the new length.
    pub fn push(&self, payload: Payload) -> usize {
        let mut items = self.lock();
        items.push_back(payload);
        items.len()
    }

    /// Atomically remove up to `max` payloads from the front.
    pub fn drain(&self, max: usize) -> Vec<Payload> {
        let mut items = self.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Current number of pending payloads.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while the lock is held can't leave the deque half-mutated,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Payload>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
