//! Coordinator counters and the periodic metrics reporter

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Atomic counters updated on the hot paths
///
/// All updates use `Relaxed` ordering; counters are statistics, not
/// synchronisation.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub(crate) start_requests: AtomicU64,
    pub(crate) commit_requests: AtomicU64,
    pub(crate) abort_requests: AtomicU64,
    pub(crate) aborted: AtomicU64,
    pub(crate) aborted_missing_dependency: AtomicU64,
    pub(crate) aborted_dependency: AtomicU64,
    pub(crate) timeouts: AtomicU64,
    pub(crate) committed: AtomicU64,
    pub(crate) checkpointed: AtomicU64,
    pub(crate) group_commit_batches: AtomicU64,
    pub(crate) checkpoint_failures: AtomicU64,
    pub(crate) checkpoint_stalled: AtomicBool,
}

impl CoordinatorMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self, table_size: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            start_requests: self.start_requests.load(Ordering::Relaxed),
            commit_requests: self.commit_requests.load(Ordering::Relaxed),
            abort_requests: self.abort_requests.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            aborted_missing_dependency: self.aborted_missing_dependency.load(Ordering::Relaxed),
            aborted_dependency: self.aborted_dependency.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            checkpointed: self.checkpointed.load(Ordering::Relaxed),
            group_commit_batches: self.group_commit_batches.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            checkpoint_stalled: self.checkpoint_stalled.load(Ordering::Relaxed),
            table_size,
        }
    }
}

/// Serializable view of [`CoordinatorMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// `start_transaction` calls
    pub start_requests: u64,
    /// `commit_transaction` calls
    pub commit_requests: u64,
    /// `abort_transaction` calls
    pub abort_requests: u64,
    /// Transactions moved to Aborted, any cause
    pub aborted: u64,
    /// Aborts because a dependency was not in the table
    pub aborted_missing_dependency: u64,
    /// Aborts because a dependency aborted
    pub aborted_dependency: u64,
    /// Aborts because the transaction timed out
    pub timeouts: u64,
    /// Transactions with a durable commit record
    pub committed: u64,
    /// Transactions acknowledged by all their resources
    pub checkpointed: u64,
    /// Successful log appends
    pub group_commit_batches: u64,
    /// Failed checkpoint batch attempts
    pub checkpoint_failures: u64,
    /// A checkpoint batch has exceeded the stall threshold
    pub checkpoint_stalled: bool,
    /// Entries in the transaction table
    pub table_size: usize,
}

/// Logs counter rates once per interval
pub struct MetricsReporter {
    interval: Duration,
    last: Mutex<(Instant, MetricsSnapshot)>,
}

impl MetricsReporter {
    /// Reporter that logs at most once per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new((Instant::now(), MetricsSnapshot::default())),
        }
    }

    /// Log rates since the previous report if the interval has elapsed
    ///
    /// Returns whether a report was emitted.
    pub fn try_report(&self, metrics: &CoordinatorMetrics, table_size: usize) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        let elapsed = now.saturating_duration_since(last.0);
        if elapsed < self.interval {
            return false;
        }

        let current = metrics.snapshot(table_size);
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let rate = |now: u64, before: u64| now.saturating_sub(before) as f64 / secs;
        let previous = &last.1;
        info!(
            target: "meridian::metrics",
            start_per_sec = rate(current.start_requests, previous.start_requests),
            commit_per_sec = rate(current.commit_requests, previous.commit_requests),
            abort_per_sec = rate(current.aborted, previous.aborted),
            checkpoint_per_sec = rate(current.checkpointed, previous.checkpointed),
            aborted_missing_dependency = current.aborted_missing_dependency,
            aborted_dependency = current.aborted_dependency,
            timeouts = current.timeouts,
            checkpoint_failures = current.checkpoint_failures,
            checkpoint_stalled = current.checkpoint_stalled,
            table_size = current.table_size,
            "Transaction coordinator statistics"
        );
        *last = (now, current);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = CoordinatorMetrics::default();
        CoordinatorMetrics::incr(&metrics.committed);
        CoordinatorMetrics::add(&metrics.checkpointed, 3);
        metrics.checkpoint_stalled.store(true, Ordering::Relaxed);

        let snapshot = metrics.snapshot(9);
        assert_eq!(snapshot.committed, 1);
        assert_eq!(snapshot.checkpointed, 3);
        assert!(snapshot.checkpoint_stalled);
        assert_eq!(snapshot.table_size, 9);
    }

    #[test]
    fn test_reporter_respects_interval() {
        let metrics = CoordinatorMetrics::default();
        let reporter = MetricsReporter::new(Duration::from_secs(3600));
        assert!(!reporter.try_report(&metrics, 0));

        let eager = MetricsReporter::new(Duration::ZERO);
        assert!(eager.try_report(&metrics, 0));
    }
}
