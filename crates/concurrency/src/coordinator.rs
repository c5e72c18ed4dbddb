//! Transaction coordinator
//!
//! Owns the transaction table and drives every transaction through
//! start, dependency resolution, group commit and checkpoint.
//!
//! ## Threads
//!
//! | Thread | Work |
//! |--------|------|
//! | caller threads | `start_transaction`, `commit_transaction`, `abort_transaction`, status queries |
//! | `meridian-alloc` | reserves id windows in the start record |
//! | `meridian-deps` | resolves dependents of validated transactions, feeds group commit |
//! | `meridian-commit` | appends batches of commit records to the log |
//! | `meridian-checkpoint` | notifies resources and marks transactions checkpointed |
//! | `meridian-maintenance` | truncation, timeouts, window advance, eviction, metrics |
//!
//! ## Lock order
//!
//! Entry locks are taken in ascending transaction id order. Queue locks and
//! the tombstone lock are leaves: nothing else is acquired while holding
//! them. The table map is never accessed while an entry lock is held;
//! maintenance scans lock entries under a shard read lock, never the reverse.

use crate::allocator::TransactionIdAllocator;
use crate::checkpoint::CheckpointState;
use crate::metrics::{CoordinatorMetrics, MetricsReporter, MetricsSnapshot};
use crate::resource::ResourceDirectory;
use crate::signal::StageSignal;
use crate::tombstone::TombstoneSet;
use crate::transaction::{TransactionEntry, TransactionInfo, TransactionRecord, TransactionState};
use dashmap::DashMap;
use meridian_core::{
    AbortReason, CoordinatorConfig, Error, Lsn, Result, TransactionId, TransactionStatus,
};
use meridian_durability::{CommitRecord, LogStorage, TransactionLog};
use parking_lot::{Mutex, MutexGuard, RwLock};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Summary of the replay performed by [`TransactionCoordinator::start`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Commit records replayed as committed transactions
    pub records_replayed: usize,
    /// LSN of the first replayed record, 0 for an empty log
    pub first_lsn: Lsn,
    /// LSN of the last replayed record, 0 for an empty log
    pub last_lsn: Lsn,
    /// Start record read after replay
    pub start_record: TransactionId,
}

pub(crate) type EntryQueue = Mutex<VecDeque<Arc<TransactionEntry>>>;

pub(crate) fn pop_front<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().pop_front()
}

/// State shared between the public handle and the stage threads
pub(crate) struct CoordinatorInner {
    pub(crate) config: CoordinatorConfig,
    pub(crate) log: Arc<TransactionLog>,
    pub(crate) allocator: TransactionIdAllocator,
    pub(crate) resources: Arc<dyn ResourceDirectory>,
    pub(crate) table: DashMap<TransactionId, Arc<TransactionEntry>>,
    pub(crate) tombstones: TombstoneSet,

    pub(crate) dependency_queue: EntryQueue,
    pub(crate) group_commit_queue: Mutex<VecDeque<(CommitRecord, Arc<TransactionEntry>)>>,
    pub(crate) checkpoint_queue: EntryQueue,
    pub(crate) checkpoint: Mutex<CheckpointState>,

    pub(crate) dependency_signal: StageSignal,
    pub(crate) group_commit_signal: StageSignal,
    pub(crate) checkpoint_signal: StageSignal,
    pub(crate) maintenance_signal: StageSignal,

    pub(crate) checkpointed_lsn: AtomicU64,
    pub(crate) truncated_through: AtomicU64,
    /// Held shared while an id is issued and inserted, exclusive while the
    /// active window advances, so the window never passes an id that is
    /// issued but not yet in the table. Never held while waiting for ids.
    pub(crate) start_gate: RwLock<()>,
    pub(crate) maintenance_lock: Mutex<()>,
    pub(crate) fatal: Mutex<Option<String>>,
    pub(crate) shutdown: AtomicBool,

    pub(crate) metrics: CoordinatorMetrics,
    pub(crate) reporter: MetricsReporter,
}

enum CommitOutcome {
    Pending,
    Validated,
    Aborted(AbortReason, SmallVec<[TransactionId; 4]>),
}

impl CoordinatorInner {
    fn new(
        config: CoordinatorConfig,
        log: Arc<TransactionLog>,
        resources: Arc<dyn ResourceDirectory>,
    ) -> Self {
        let allocator = TransactionIdAllocator::new(Arc::clone(&log), &config);
        let tombstones = TombstoneSet::new(
            config.abort_tombstone_capacity,
            config.transaction_record_preservation(),
        );
        let reporter = MetricsReporter::new(config.metrics_report_interval());
        Self {
            config,
            log,
            allocator,
            resources,
            table: DashMap::new(),
            tombstones,
            dependency_queue: Mutex::new(VecDeque::new()),
            group_commit_queue: Mutex::new(VecDeque::new()),
            checkpoint_queue: Mutex::new(VecDeque::new()),
            checkpoint: Mutex::new(CheckpointState::default()),
            dependency_signal: StageSignal::new(),
            group_commit_signal: StageSignal::new(),
            checkpoint_signal: StageSignal::new(),
            maintenance_signal: StageSignal::new(),
            checkpointed_lsn: AtomicU64::new(0),
            truncated_through: AtomicU64::new(0),
            start_gate: RwLock::new(()),
            maintenance_lock: Mutex::new(()),
            fatal: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            metrics: CoordinatorMetrics::default(),
            reporter,
        }
    }

    pub(crate) fn lookup(&self, transaction_id: TransactionId) -> Option<Arc<TransactionEntry>> {
        self.table
            .get(&transaction_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn recover_record(&self, record: &CommitRecord, stats: &mut RecoveryStats, now: Instant) {
        if stats.records_replayed == 0 {
            stats.first_lsn = record.lsn;
            self.checkpointed_lsn
                .store(record.lsn.saturating_sub(1), Ordering::Release);
        }
        stats.records_replayed += 1;
        stats.last_lsn = record.lsn;

        let entry = Arc::new(TransactionEntry::recovered(record, now));
        self.table.insert(record.transaction_id, Arc::clone(&entry));
        self.checkpoint_queue.lock().push_back(entry);
    }

    fn start_transaction(&self, timeout: Duration) -> Result<TransactionId> {
        loop {
            {
                let _gate = self.start_gate.read();
                if let Some(id) = self.allocator.try_new_transaction_id()? {
                    let entry = TransactionEntry::started(id, timeout, Instant::now());
                    self.table.insert(id, Arc::new(entry));
                    debug!(target: "meridian::txn", transaction_id = id, ?timeout, "Transaction started");
                    return Ok(id);
                }
            }
            // Wait outside the gate so maintenance keeps running
            self.allocator.wait_for_headroom()?;
        }
    }

    pub(crate) fn status(&self, transaction_id: TransactionId) -> TransactionStatus {
        if let Some(entry) = self.lookup(transaction_id) {
            return entry.lock().status();
        }
        match self.tombstones.get(transaction_id) {
            Some(reason) => TransactionStatus::Aborted { reason },
            None => TransactionStatus::Unknown,
        }
    }

    /// Abort `transaction_id` if it is still abortable, then cascade
    pub(crate) fn abort(&self, transaction_id: TransactionId, reason: AbortReason) -> bool {
        match self.abort_entry(transaction_id, reason) {
            Some(waiters) => {
                self.cascade(transaction_id, waiters);
                true
            }
            None => false,
        }
    }

    fn abort_entry(
        &self,
        transaction_id: TransactionId,
        reason: AbortReason,
    ) -> Option<SmallVec<[TransactionId; 4]>> {
        let entry = self.lookup(transaction_id)?;
        let mut record = entry.lock();
        if !record.state.is_abortable() {
            return None;
        }
        match &reason {
            AbortReason::Cascading { .. } => {
                CoordinatorMetrics::incr(&self.metrics.aborted_dependency)
            }
            AbortReason::Timeout { .. } => CoordinatorMetrics::incr(&self.metrics.timeouts),
            _ => {}
        }
        CoordinatorMetrics::incr(&self.metrics.aborted);
        debug!(target: "meridian::txn", transaction_id, %reason, "Transaction aborted");
        Some(record.mark_aborted(reason, Instant::now()))
    }

    /// Abort everything transitively waiting on `origin`
    fn cascade(&self, origin: TransactionId, waiters: SmallVec<[TransactionId; 4]>) {
        let mut work: Vec<(TransactionId, TransactionId)> =
            waiters.into_iter().map(|waiting| (waiting, origin)).collect();
        while let Some((transaction_id, dependency_id)) = work.pop() {
            let reason = AbortReason::Cascading {
                transaction_id,
                dependency_id,
            };
            if let Some(next) = self.abort_entry(transaction_id, reason) {
                work.extend(next.into_iter().map(|waiting| (waiting, transaction_id)));
            }
        }
    }

    fn commit(&self, info: TransactionInfo) -> Result<()> {
        let transaction_id = info.transaction_id;
        let entry = match self.lookup(transaction_id) {
            Some(entry) => entry,
            None => {
                let reason = self
                    .tombstones
                    .get(transaction_id)
                    .unwrap_or(AbortReason::PresumedAborted { transaction_id });
                return Err(reason.into());
            }
        };

        // Resolve dependency entries before taking any entry lock
        let mut dependencies = Vec::with_capacity(info.dependencies.len());
        let mut unresolvable = None;
        for &dependency_id in info.dependencies.iter().filter(|&&id| id != transaction_id) {
            match self.lookup(dependency_id) {
                Some(dependency) => dependencies.push(dependency),
                None => {
                    unresolvable = Some(if self.tombstones.contains(dependency_id) {
                        AbortReason::Cascading {
                            transaction_id,
                            dependency_id,
                        }
                    } else {
                        AbortReason::MissingDependency {
                            transaction_id,
                            dependency_id,
                        }
                    });
                    break;
                }
            }
        }

        if let Some(reason) = unresolvable {
            return self.abort_unresolvable(&entry, info, reason);
        }

        let mut ordered: Vec<&Arc<TransactionEntry>> =
            dependencies.iter().chain(std::iter::once(&entry)).collect();
        ordered.sort_by_key(|candidate| candidate.id);

        let mut own: Option<MutexGuard<'_, TransactionRecord>> = None;
        let mut dependency_guards = Vec::with_capacity(dependencies.len());
        for candidate in ordered {
            let guard = candidate.lock();
            if candidate.id == transaction_id {
                own = Some(guard);
            } else {
                dependency_guards.push(guard);
            }
        }
        let Some(mut own) = own else {
            return Err(Error::invalid_operation(format!(
                "transaction {} vanished while committing",
                transaction_id
            )));
        };

        if own.state != TransactionState::Started {
            return Self::existing_outcome(&own);
        }
        own.info = info;

        let mut aborted_dependency = None;
        let mut pending = 0;
        for dependency in dependency_guards.iter_mut() {
            match dependency.state {
                TransactionState::Aborted => {
                    aborted_dependency = Some(dependency.id);
                    break;
                }
                TransactionState::Started | TransactionState::PendingDependency => {
                    dependency.waiting.push(transaction_id);
                    pending += 1;
                }
                TransactionState::Validated
                | TransactionState::Committed
                | TransactionState::Checkpointed => {}
            }
        }

        let outcome = if let Some(dependency_id) = aborted_dependency {
            CoordinatorMetrics::incr(&self.metrics.aborted);
            CoordinatorMetrics::incr(&self.metrics.aborted_dependency);
            let reason = AbortReason::Cascading {
                transaction_id,
                dependency_id,
            };
            let waiters = own.mark_aborted(reason.clone(), Instant::now());
            CommitOutcome::Aborted(reason, waiters)
        } else if pending > 0 {
            own.pending_count = pending;
            own.transition(TransactionState::PendingDependency);
            CommitOutcome::Pending
        } else {
            own.transition(TransactionState::Validated);
            // Queued while still locked so a dependent that observes
            // Validated is always queued behind this transaction.
            self.dependency_queue.lock().push_back(Arc::clone(&entry));
            CommitOutcome::Validated
        };
        drop(dependency_guards);
        drop(own);

        match outcome {
            CommitOutcome::Aborted(reason, waiters) => {
                debug!(target: "meridian::txn", transaction_id, %reason, "Commit aborted by dependency");
                self.cascade(transaction_id, waiters);
                Err(reason.into())
            }
            CommitOutcome::Validated => {
                debug!(target: "meridian::txn", transaction_id, "Transaction validated");
                self.dependency_signal.notify();
                Ok(())
            }
            CommitOutcome::Pending => {
                debug!(target: "meridian::txn", transaction_id, pending, "Transaction waiting on dependencies");
                Ok(())
            }
        }
    }

    fn abort_unresolvable(
        &self,
        entry: &TransactionEntry,
        info: TransactionInfo,
        reason: AbortReason,
    ) -> Result<()> {
        let waiters = {
            let mut record = entry.lock();
            if record.state != TransactionState::Started {
                return Self::existing_outcome(&record);
            }
            record.info = info;
            if matches!(reason, AbortReason::MissingDependency { .. }) {
                CoordinatorMetrics::incr(&self.metrics.aborted_missing_dependency);
            } else {
                CoordinatorMetrics::incr(&self.metrics.aborted_dependency);
            }
            CoordinatorMetrics::incr(&self.metrics.aborted);
            record.mark_aborted(reason.clone(), Instant::now())
        };
        debug!(target: "meridian::txn", transaction_id = entry.id, %reason, "Commit aborted, dependency unavailable");
        self.cascade(entry.id, waiters);
        Err(reason.into())
    }

    /// Outcome for a commit request on a transaction that is past Started
    fn existing_outcome(record: &TransactionRecord) -> Result<()> {
        match (&record.state, &record.abort_reason) {
            (TransactionState::Aborted, Some(reason)) => Err(reason.clone().into()),
            (TransactionState::Aborted, None) => Err(AbortReason::PresumedAborted {
                transaction_id: record.id,
            }
            .into()),
            _ => Ok(()),
        }
    }

    pub(crate) fn record_fatal(&self, message: String) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(message);
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Handle to a running coordinator
///
/// Dropping the handle shuts the coordinator down.
pub struct TransactionCoordinator {
    inner: Arc<CoordinatorInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    recovery: RecoveryStats,
}

impl TransactionCoordinator {
    /// Recover from `storage` and start all background stages
    ///
    /// Every commit record in the log is replayed as a committed
    /// transaction and queued for checkpoint, so resources are notified
    /// again after a restart. Id allocation resumes above the start record.
    pub fn start(
        storage: Box<dyn LogStorage>,
        resources: Arc<dyn ResourceDirectory>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let log = Arc::new(TransactionLog::new(storage));
        log.initialize()?;

        let inner = Arc::new(CoordinatorInner::new(config, Arc::clone(&log), resources));
        let mut recovery = RecoveryStats::default();
        let now = Instant::now();
        let mut next = log.first_commit_record()?;
        while let Some(record) = next {
            inner.recover_record(&record, &mut recovery, now);
            next = log.next_commit_record()?;
        }
        log.end_recovery()?;
        recovery.start_record = log.start_record()?;
        inner.allocator.start(recovery.start_record)?;

        let coordinator = Self {
            inner: Arc::clone(&inner),
            workers: Mutex::new(Vec::new()),
            recovery,
        };
        coordinator.spawn_worker("meridian-deps", dependency_worker)?;
        coordinator.spawn_worker("meridian-commit", group_commit_worker)?;
        coordinator.spawn_worker("meridian-checkpoint", checkpoint_worker)?;
        coordinator.spawn_worker("meridian-maintenance", maintenance_worker)?;

        if coordinator.recovery.records_replayed > 0 {
            inner.checkpoint_signal.notify();
        }
        info!(
            target: "meridian::txn",
            replayed = coordinator.recovery.records_replayed,
            start_record = coordinator.recovery.start_record,
            "Transaction coordinator started"
        );
        Ok(coordinator)
    }

    fn spawn_worker(&self, name: &str, body: fn(&CoordinatorInner)) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(&inner));
        match handle {
            Ok(handle) => {
                self.workers.lock().push(handle);
                Ok(())
            }
            Err(e) => {
                self.shutdown();
                Err(e.into())
            }
        }
    }

    /// What recovery found when this coordinator started
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery
    }

    /// Configuration the coordinator was started with
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Issue a new transaction id and track it as Started
    ///
    /// The transaction is aborted by maintenance if it has not requested
    /// commit within `timeout`.
    pub fn start_transaction(&self, timeout: Duration) -> Result<TransactionId> {
        CoordinatorMetrics::incr(&self.inner.metrics.start_requests);
        if self.inner.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        self.inner.start_transaction(timeout)
    }

    /// Abort a Started or PendingDependency transaction and its dependents
    ///
    /// Does nothing for unknown ids or transactions already past
    /// validation. Returns whether this call performed the abort.
    pub fn abort_transaction(&self, transaction_id: TransactionId, reason: AbortReason) -> bool {
        CoordinatorMetrics::incr(&self.inner.metrics.abort_requests);
        self.inner.abort(transaction_id, reason)
    }

    /// Request commit of a started transaction
    ///
    /// `Ok` means the request was accepted: the transaction is validated or
    /// waiting on dependencies, and its outcome is observed through
    /// [`transaction_status`](Self::transaction_status).
    ///
    /// # Errors
    ///
    /// - `TransactionAborted` when the id is unknown (presumed aborted), the
    ///   transaction was already aborted, or a dependency is missing or
    ///   aborted
    /// - `CoordinatorFailed` after a fatal log append failure
    /// - `ShuttingDown` after [`shutdown`](Self::shutdown)
    pub fn commit_transaction(&self, info: TransactionInfo) -> Result<()> {
        CoordinatorMetrics::incr(&self.inner.metrics.commit_requests);
        if let Some(message) = self.inner.fatal.lock().clone() {
            return Err(Error::CoordinatorFailed(message));
        }
        if self.inner.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        self.inner.commit(info)
    }

    /// Externally visible status of a transaction
    pub fn transaction_status(&self, transaction_id: TransactionId) -> TransactionStatus {
        self.inner.status(transaction_id)
    }

    /// Internal state of a transaction still in the table
    pub fn transaction_state(&self, transaction_id: TransactionId) -> Option<TransactionState> {
        self.inner
            .lookup(transaction_id)
            .map(|entry| entry.lock().state)
    }

    /// Highest id at which every transaction is resolved, 0 if none
    ///
    /// Every id at or below it is committed, aborted, or presumed aborted,
    /// so a reader at this id observes a stable state.
    pub fn read_only_transaction_id(&self) -> TransactionId {
        self.inner
            .allocator
            .smallest_active_transaction_id()
            .saturating_sub(1)
    }

    /// Lowest id that may still be unresolved
    pub fn smallest_active_transaction_id(&self) -> TransactionId {
        self.inner.allocator.smallest_active_transaction_id()
    }

    /// Last id handed out
    pub fn highest_active_transaction_id(&self) -> TransactionId {
        self.inner.allocator.highest_active_transaction_id()
    }

    /// Highest LSN whose transaction every resource has acknowledged
    pub fn checkpointed_lsn(&self) -> Lsn {
        self.inner.checkpointed_lsn.load(Ordering::Acquire)
    }

    /// Entries currently held in the transaction table
    pub fn table_len(&self) -> usize {
        self.inner.table.len()
    }

    /// Run one maintenance pass on the calling thread
    pub fn run_maintenance(&self) {
        self.inner.maintain(Instant::now());
    }

    /// Message of the fatal log failure, if one happened
    pub fn fatal_error(&self) -> Option<String> {
        self.inner.fatal.lock().clone()
    }

    /// Snapshot of the coordinator counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(self.inner.table.len())
    }

    /// Stop every background stage and join their threads. Idempotent.
    ///
    /// Queued work that has not reached the log is dropped; transactions
    /// that did not commit durably are presumed aborted after restart.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Releases callers waiting on the id window before the workers join
        self.inner.allocator.shutdown();
        for signal in [
            &self.inner.dependency_signal,
            &self.inner.group_commit_signal,
            &self.inner.checkpoint_signal,
            &self.inner.maintenance_signal,
        ] {
            signal.notify();
        }
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                error!(target: "meridian::txn", "Coordinator worker panicked");
            }
        }
        info!(target: "meridian::txn", "Transaction coordinator stopped");
    }
}

impl Drop for TransactionCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dependency_worker(inner: &CoordinatorInner) {
    while inner.dependency_signal.wait(&inner.shutdown, None) {
        inner.complete_dependencies();
    }
}

fn group_commit_worker(inner: &CoordinatorInner) {
    while inner.group_commit_signal.wait(&inner.shutdown, None) {
        loop {
            match inner.group_commit() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    inner.record_fatal(e.to_string());
                    return;
                }
            }
        }
    }
}

fn checkpoint_worker(inner: &CoordinatorInner) {
    let mut timeout = None;
    while inner.checkpoint_signal.wait(&inner.shutdown, timeout) {
        inner.run_checkpoints();
        timeout = inner.checkpoint_retry_delay(Instant::now());
    }
}

fn maintenance_worker(inner: &CoordinatorInner) {
    let interval = inner.config.log_maintenance_interval();
    while inner.maintenance_signal.wait(&inner.shutdown, Some(interval)) {
        inner.maintain(Instant::now());
        inner.reporter.try_report(&inner.metrics, inner.table.len());
    }
}
