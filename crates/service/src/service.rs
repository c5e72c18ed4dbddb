//! The transaction service façade
//!
//! Batches coordinator calls for remote callers: one request starts many
//! transactions, or submits many commits and collects the outcomes of
//! earlier ones.

use crate::command::Command;
use crate::error::Result;
use crate::metrics::{ServiceMetrics, ServiceMetricsSnapshot, ServiceReporter};
use crate::output::Output;
use crate::types::{CommitResult, CommitTransactionsResponse, StartTransactionsResponse};
use meridian_concurrency::{TransactionCoordinator, TransactionInfo};
use meridian_core::{AbortReason, TransactionId, TransactionStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Batched request surface over a [`TransactionCoordinator`]
pub struct TransactionService {
    coordinator: Arc<TransactionCoordinator>,
    metrics: ServiceMetrics,
    reporter: ServiceReporter,
}

impl TransactionService {
    /// Serve requests against `coordinator`
    pub fn new(coordinator: Arc<TransactionCoordinator>) -> Self {
        let reporter = ServiceReporter::new(coordinator.config().metrics_report_interval());
        Self {
            coordinator,
            metrics: ServiceMetrics::default(),
            reporter,
        }
    }

    /// The coordinator behind this service
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// Start one transaction per timeout
    ///
    /// Ids are returned in request order. The read-only id and abort lower
    /// bound are sampled after the last start.
    pub fn start_transactions(&self, timeouts: &[Duration]) -> Result<StartTransactionsResponse> {
        let started = Instant::now();
        let transaction_ids = timeouts
            .iter()
            .map(|&timeout| self.coordinator.start_transaction(timeout))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let read_only_transaction_id = self.coordinator.read_only_transaction_id();
        self.metrics.record_start(timeouts.len(), started.elapsed());
        self.reporter.try_report(&self.metrics);
        debug!(
            target: "meridian::service",
            count = transaction_ids.len(),
            read_only_transaction_id,
            "Started transactions"
        );

        Ok(StartTransactionsResponse {
            transaction_ids,
            read_only_transaction_id,
            abort_lower_bound: read_only_transaction_id,
        })
    }

    /// Submit commits, then report outcomes for `status_queries`
    ///
    /// A commit that aborts immediately is reported as a failure under its
    /// id. For queried ids: committed is success, aborted is failure with
    /// the reason, unknown is failure without a reason, and in-progress ids
    /// are left out. An immediate abort is never overwritten by the status
    /// lookup.
    pub fn commit_transactions(
        &self,
        transactions: Vec<TransactionInfo>,
        status_queries: &BTreeSet<TransactionId>,
    ) -> Result<CommitTransactionsResponse> {
        let started = Instant::now();
        let submitted = transactions.len();
        let mut results = BTreeMap::new();

        for info in transactions {
            let transaction_id = info.transaction_id;
            if let Err(e) = self.coordinator.commit_transaction(info) {
                let Some(reason) = e.abort_reason().cloned() else {
                    return Err(e.into());
                };
                results.insert(transaction_id, CommitResult::aborted(reason));
            }
        }

        for &transaction_id in status_queries {
            let result = match self.coordinator.transaction_status(transaction_id) {
                TransactionStatus::InProgress => continue,
                TransactionStatus::Committed => CommitResult::committed(),
                TransactionStatus::Aborted { reason } => CommitResult::aborted(reason),
                TransactionStatus::Unknown => CommitResult::unknown(),
            };
            results.entry(transaction_id).or_insert(result);
        }

        let read_only_transaction_id = self.coordinator.read_only_transaction_id();
        self.metrics.record_commit(submitted, started.elapsed());
        self.reporter.try_report(&self.metrics);
        debug!(
            target: "meridian::service",
            submitted,
            queried = status_queries.len(),
            resolved = results.len(),
            "Processed commit request"
        );

        Ok(CommitTransactionsResponse {
            results,
            read_only_transaction_id,
            abort_lower_bound: read_only_transaction_id,
        })
    }

    /// Abort `transaction_id` with a caller-supplied cause
    pub fn abort_transaction(&self, transaction_id: TransactionId, cause: &str) {
        self.metrics.record_abort();
        self.coordinator
            .abort_transaction(transaction_id, AbortReason::requested(transaction_id, cause));
    }

    /// Execute a serialized command
    pub fn execute(&self, command: Command) -> Result<Output> {
        debug!(target: "meridian::service", command = command.name(), "Executing command");
        match command {
            Command::StartTransactions { timeouts_ms } => {
                let timeouts: Vec<Duration> =
                    timeouts_ms.into_iter().map(Duration::from_millis).collect();
                self.start_transactions(&timeouts).map(Output::Started)
            }
            Command::CommitTransactions {
                transactions,
                status_queries,
            } => self
                .commit_transactions(transactions, &status_queries)
                .map(Output::Committed),
            Command::AbortTransaction {
                transaction_id,
                cause,
            } => {
                self.abort_transaction(transaction_id, &cause);
                Ok(Output::Unit)
            }
        }
    }

    /// Execute commands in order, collecting each result
    pub fn execute_many(&self, commands: Vec<Command>) -> Vec<Result<Output>> {
        commands
            .into_iter()
            .map(|command| self.execute(command))
            .collect()
    }

    /// Snapshot of the request counters
    pub fn metrics(&self) -> ServiceMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for TransactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionService")
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

