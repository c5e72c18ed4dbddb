//! Abort tombstones
//!
//! Aborted transactions are evicted from the table after the retention
//! window, but callers may still ask about them. The tombstone set keeps the
//! abort reason of evicted ids so their status stays `Aborted` instead of
//! degrading to `Unknown`. Bounded by capacity (oldest first out) and by age.

use meridian_core::{AbortReason, TransactionId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Default)]
struct TombstoneInner {
    reasons: HashMap<TransactionId, AbortReason>,
    order: VecDeque<(TransactionId, Instant)>,
}

pub(crate) struct TombstoneSet {
    inner: Mutex<TombstoneInner>,
    capacity: usize,
    ttl: Duration,
}

impl TombstoneSet {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(TombstoneInner::default()),
            capacity,
            ttl,
        }
    }

    pub(crate) fn insert(&self, transaction_id: TransactionId, reason: AbortReason, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.reasons.insert(transaction_id, reason).is_none() {
            inner.order.push_back((transaction_id, now));
        }
        while inner.order.len() > self.capacity {
            if let Some((oldest, _)) = inner.order.pop_front() {
                inner.reasons.remove(&oldest);
            }
        }
    }

    pub(crate) fn get(&self, transaction_id: TransactionId) -> Option<AbortReason> {
        self.inner.lock().reasons.get(&transaction_id).cloned()
    }

    pub(crate) fn contains(&self, transaction_id: TransactionId) -> bool {
        self.inner.lock().reasons.contains_key(&transaction_id)
    }

    /// Drop tombstones older than the ttl
    pub(crate) fn prune(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let mut pruned = 0;
        while let Some(&(id, inserted)) = inner.order.front() {
            if now.saturating_duration_since(inserted) < self.ttl {
                break;
            }
            inner.order.pop_front();
            inner.reasons.remove(&id);
            pruned += 1;
        }
        pruned
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().reasons.len()
    }
}
