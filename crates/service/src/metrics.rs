//! Request counters for the service façade

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Counters for batched requests
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    start_requests: AtomicU64,
    started_transactions: AtomicU64,
    start_latency_micros: AtomicU64,
    commit_requests: AtomicU64,
    committed_infos: AtomicU64,
    commit_latency_micros: AtomicU64,
    abort_requests: AtomicU64,
}

/// Serializable view of [`ServiceMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetricsSnapshot {
    /// Batched start calls
    pub start_requests: u64,
    /// Transactions started across all start calls
    pub started_transactions: u64,
    /// Cumulative time spent in start calls
    pub start_latency_micros: u64,
    /// Batched commit calls
    pub commit_requests: u64,
    /// Transaction infos submitted across all commit calls
    pub committed_infos: u64,
    /// Cumulative time spent in commit calls
    pub commit_latency_micros: u64,
    /// Abort calls
    pub abort_requests: u64,
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

impl ServiceMetrics {
    pub(crate) fn record_start(&self, batch: usize, elapsed: Duration) {
        self.start_requests.fetch_add(1, Ordering::Relaxed);
        self.started_transactions
            .fetch_add(batch as u64, Ordering::Relaxed);
        self.start_latency_micros
            .fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, batch: usize, elapsed: Duration) {
        self.commit_requests.fetch_add(1, Ordering::Relaxed);
        self.committed_infos.fetch_add(batch as u64, Ordering::Relaxed);
        self.commit_latency_micros
            .fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.abort_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> ServiceMetricsSnapshot {
        ServiceMetricsSnapshot {
            start_requests: self.start_requests.load(Ordering::Relaxed),
            started_transactions: self.started_transactions.load(Ordering::Relaxed),
            start_latency_micros: self.start_latency_micros.load(Ordering::Relaxed),
            commit_requests: self.commit_requests.load(Ordering::Relaxed),
            committed_infos: self.committed_infos.load(Ordering::Relaxed),
            commit_latency_micros: self.commit_latency_micros.load(Ordering::Relaxed),
            abort_requests: self.abort_requests.load(Ordering::Relaxed),
        }
    }
}

/// Logs service counters at most once per interval
pub(crate) struct ServiceReporter {
    interval: Duration,
    last: Mutex<Instant>,
}

impl ServiceReporter {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn try_report(&self, metrics: &ServiceMetrics) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        if now.saturating_duration_since(*last) < self.interval {
            return false;
        }
        *last = now;
        drop(last);

        let snapshot = metrics.snapshot();
        let average = |total: u64, count: u64| if count == 0 { 0 } else { total / count };
        info!(
            target: "meridian::service",
            start_requests = snapshot.start_requests,
            avg_start_batch = average(snapshot.started_transactions, snapshot.start_requests),
            avg_start_micros = average(snapshot.start_latency_micros, snapshot.start_requests),
            commit_requests = snapshot.commit_requests,
            avg_commit_batch = average(snapshot.committed_infos, snapshot.commit_requests),
            avg_commit_micros = average(snapshot.commit_latency_micros, snapshot.commit_requests),
            abort_requests = snapshot.abort_requests,
            "Transaction service statistics"
        );
        true
    }
}
