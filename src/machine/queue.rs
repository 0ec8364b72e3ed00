// Event Queue
// Bounded FIFO of event records shared between asynchronous producers and one consumer

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// What `push` does when the queue is already full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Discard the oldest pending record to make room (preserves recent events)
    #[default]
    DropOldest,
    /// Discard the record being pushed (preserves pending events)
    DropNewest,
}

/// Fixed-capacity event queue.
///
/// Every method takes `&self`; wrap it in an `Arc` to hand it to producers.
/// Pushing never blocks for longer than the internal lock is held and never
/// fails: overflow is resolved by the configured policy.
#[derive(Debug)]
pub struct EventQueue<E> {
    records: Mutex<VecDeque<E>>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl<E: Copy + PartialEq> EventQueue<E> {
    /// Create a queue holding at most `capacity` records (at least one).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a record. Returns the record discarded by the overflow policy, if any.
    pub fn push(&self, event: E) -> Option<E> {
        let mut records = self.records.lock();
        let discarded = if records.len() < self.capacity {
            None
        } else {
            match self.policy {
                OverflowPolicy::DropOldest => records.pop_front(),
                OverflowPolicy::DropNewest => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(capacity = self.capacity, "Event queue full, newest record dropped");
                    return Some(event);
                }
            }
        };
        records.push_back(event);

        if discarded.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(capacity = self.capacity, "Event queue full, oldest record dropped");
        }
        discarded
    }

    /// Remove and return the oldest record
    pub fn pop(&self) -> Option<E> {
        self.records.lock().pop_front()
    }

    /// Discard every pending record, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut records = self.records.lock();
        let count = records.len();
        records.clear();
        count
    }

    /// Discard pending records equal to `event`, keeping the order of the rest
    pub fn remove(&self, event: E) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|pending| *pending != event);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Records lost to overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy of the pending records, oldest first
    pub fn snapshot(&self) -> Vec<E> {
        self.records.lock().iter().copied().collect()
    }
}
