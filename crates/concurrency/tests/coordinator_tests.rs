//! Coordinator integration tests
//!
//! Each test drives a real coordinator (background stages running) over a
//! shared `MemoryLogStorage`, so restarts are simulated by starting a second
//! coordinator on `storage.reopen()`.

mod common;

use common::*;
use meridian_concurrency::{
    ResourceRegistry, TransactionCoordinator, TransactionInfo, TransactionState,
};
use meridian_core::{
    AbortReason, CoordinatorConfig, Error, TransactionStatus, MAX_CHECKPOINT_BATCH_SIZE,
};
use meridian_durability::MemoryLogStorage;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn setup() -> (MemoryLogStorage, Arc<ResourceRegistry>) {
    (MemoryLogStorage::new(), Arc::new(ResourceRegistry::new()))
}

fn aborted_reason(status: TransactionStatus) -> AbortReason {
    match status {
        TransactionStatus::Aborted { reason } => reason,
        other => panic!("expected Aborted, got {:?}", other),
    }
}

// ============================================================================
// Commit path
// ============================================================================

mod commit_path {
    use super::*;

    #[test]
    fn test_end_to_end_commit_and_checkpoint() {
        let (storage, registry) = setup();
        let gate = GatedResource::new();
        registry.register("R1", gate.clone());
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        assert_eq!(id, 1);
        assert_eq!(coordinator.transaction_status(id), TransactionStatus::InProgress);

        coordinator
            .commit_transaction(TransactionInfo::new(id).with_write("R1", 1))
            .unwrap();

        // Durable, but R1 has not acknowledged yet
        assert!(wait_until(|| gate.entered() > 0));
        assert_eq!(coordinator.transaction_state(id), Some(TransactionState::Committed));
        assert_eq!(coordinator.transaction_status(id), TransactionStatus::Committed);
        assert_eq!(coordinator.checkpointed_lsn(), 0);

        gate.open();
        assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));
        assert_eq!(coordinator.transaction_status(id), TransactionStatus::Committed);
        assert_eq!(coordinator.checkpointed_lsn(), 1);

        let records = storage.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transaction_id, id);
        assert_eq!(records[0].resources[0].as_str(), "R1");
    }

    #[test]
    fn test_commit_without_writes_still_logged() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
        assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));
        assert_eq!(storage.records().len(), 1);
    }

    #[test]
    fn test_dependent_waits_for_dependency() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let a = coordinator.start_transaction(LONG).unwrap();
        let b = coordinator.start_transaction(LONG).unwrap();

        coordinator
            .commit_transaction(TransactionInfo::new(b).with_dependency(a))
            .unwrap();
        assert_eq!(
            coordinator.transaction_state(b),
            Some(TransactionState::PendingDependency)
        );
        assert_eq!(coordinator.transaction_status(b), TransactionStatus::InProgress);

        coordinator.commit_transaction(TransactionInfo::new(a)).unwrap();
        assert!(wait_until(|| {
            coordinator.transaction_status(b) == TransactionStatus::Committed
        }));

        let records = storage.records();
        let lsn_of = |id| {
            records
                .iter()
                .find(|r| r.transaction_id == id)
                .map(|r| r.lsn)
                .unwrap()
        };
        assert!(lsn_of(a) < lsn_of(b));
    }

    #[test]
    fn test_dependency_on_committed_transaction_resolves_immediately() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let a = coordinator.start_transaction(LONG).unwrap();
        coordinator.commit_transaction(TransactionInfo::new(a)).unwrap();
        assert!(wait_until(|| coordinator.transaction_status(a).is_resolved()));

        let b = coordinator.start_transaction(LONG).unwrap();
        coordinator
            .commit_transaction(TransactionInfo::new(b).with_dependency(a))
            .unwrap();
        assert_ne!(
            coordinator.transaction_state(b),
            Some(TransactionState::PendingDependency)
        );
        assert!(wait_until(|| {
            coordinator.transaction_status(b) == TransactionStatus::Committed
        }));
    }

    #[test]
    fn test_self_dependency_is_ignored() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator
            .commit_transaction(TransactionInfo::new(id).with_dependency(id))
            .unwrap();
        assert!(wait_until(|| {
            coordinator.transaction_status(id) == TransactionStatus::Committed
        }));
    }

    #[test]
    fn test_second_commit_request_is_ignored() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
        coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
        assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));
        assert_eq!(storage.records().len(), 1);
    }
}

// ============================================================================
// Aborts
// ============================================================================

mod aborts {
    use super::*;

    #[test]
    fn test_commit_of_unknown_transaction_is_presumed_aborted() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let err = coordinator
            .commit_transaction(TransactionInfo::new(4242))
            .unwrap_err();
        assert!(matches!(
            err.abort_reason(),
            Some(AbortReason::PresumedAborted { transaction_id: 4242 })
        ));
        assert_eq!(coordinator.transaction_status(4242), TransactionStatus::Unknown);
    }

    #[test]
    fn test_missing_dependency_aborts_immediately() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        let err = coordinator
            .commit_transaction(TransactionInfo::new(id).with_dependency(999))
            .unwrap_err();
        assert!(matches!(err, Error::TransactionAborted { .. }));

        let reason = aborted_reason(coordinator.transaction_status(id));
        assert_eq!(
            reason,
            AbortReason::MissingDependency {
                transaction_id: id,
                dependency_id: 999
            }
        );
        assert_eq!(coordinator.metrics().aborted_missing_dependency, 1);
    }

    #[test]
    fn test_cascading_abort_closure() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let a = coordinator.start_transaction(LONG).unwrap();
        let b = coordinator.start_transaction(LONG).unwrap();
        let c = coordinator.start_transaction(LONG).unwrap();

        coordinator
            .commit_transaction(TransactionInfo::new(b).with_dependency(a))
            .unwrap();
        coordinator
            .commit_transaction(TransactionInfo::new(c).with_dependency(b))
            .unwrap();

        assert!(coordinator.abort_transaction(a, AbortReason::requested(a, "x")));

        assert_eq!(
            aborted_reason(coordinator.transaction_status(a)),
            AbortReason::requested(a, "x")
        );
        let b_reason = aborted_reason(coordinator.transaction_status(b));
        assert_eq!(b_reason.upstream(), Some(a));
        let c_reason = aborted_reason(coordinator.transaction_status(c));
        assert_eq!(c_reason.upstream(), Some(b));
        assert!(storage.records().is_empty());
    }

    #[test]
    fn test_commit_depending_on_aborted_transaction_aborts() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let a = coordinator.start_transaction(LONG).unwrap();
        let b = coordinator.start_transaction(LONG).unwrap();
        coordinator.abort_transaction(a, AbortReason::requested(a, "conflict"));

        let err = coordinator
            .commit_transaction(TransactionInfo::new(b).with_dependency(a))
            .unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(&AbortReason::Cascading {
                transaction_id: b,
                dependency_id: a
            })
        );
    }

    #[test]
    fn test_abort_after_validation_has_no_effect() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
        assert!(wait_until(|| {
            coordinator.transaction_status(id) == TransactionStatus::Committed
        }));
        assert!(!coordinator.abort_transaction(id, AbortReason::requested(id, "late")));
        assert_eq!(coordinator.transaction_status(id), TransactionStatus::Committed);
    }

    #[test]
    fn test_abort_is_idempotent() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        assert!(coordinator.abort_transaction(id, AbortReason::requested(id, "first")));
        assert!(!coordinator.abort_transaction(id, AbortReason::requested(id, "second")));
        assert_eq!(
            aborted_reason(coordinator.transaction_status(id)),
            AbortReason::requested(id, "first")
        );
        assert!(!coordinator.abort_transaction(777, AbortReason::requested(777, "unknown")));
    }

    #[test]
    fn test_commit_after_abort_reports_abort() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator.abort_transaction(id, AbortReason::requested(id, "gone"));
        let err = coordinator.commit_transaction(TransactionInfo::new(id)).unwrap_err();
        assert_eq!(err.abort_reason(), Some(&AbortReason::requested(id, "gone")));
    }

    #[test]
    fn test_timeout_aborts_started_transaction() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator
            .start_transaction(Duration::from_millis(1))
            .unwrap();
        thread::sleep(Duration::from_millis(10));
        coordinator.run_maintenance();

        assert_eq!(
            aborted_reason(coordinator.transaction_status(id)),
            AbortReason::Timeout { transaction_id: id }
        );
        assert_eq!(coordinator.metrics().timeouts, 1);
    }

    #[test]
    fn test_timeout_cascades_to_dependents() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let slow = coordinator
            .start_transaction(Duration::from_millis(1))
            .unwrap();
        let dependent = coordinator.start_transaction(LONG).unwrap();
        coordinator
            .commit_transaction(TransactionInfo::new(dependent).with_dependency(slow))
            .unwrap();

        thread::sleep(Duration::from_millis(10));
        coordinator.run_maintenance();

        let reason = aborted_reason(coordinator.transaction_status(dependent));
        assert_eq!(reason.upstream(), Some(slow));
    }
}

// ============================================================================
// Checkpointing
// ============================================================================

mod checkpointing {
    use super::*;

    #[test]
    fn test_checkpoint_waits_for_every_resource() {
        let (storage, registry) = setup();
        let r1 = RecordingResource::new();
        let r2 = RecordingResource::new();
        r1.set_failing(true);
        registry.register("R1", r1.clone());
        registry.register("R2", r2.clone());
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator
            .commit_transaction(
                TransactionInfo::new(id)
                    .with_write("R1", 1)
                    .with_write("R2", 1),
            )
            .unwrap();

        // Retried with backoff while R1 keeps failing
        assert!(wait_until(|| r1.calls() >= 2));
        assert!(r2.commits().contains(&id));
        assert_eq!(coordinator.transaction_state(id), Some(TransactionState::Committed));
        assert_eq!(coordinator.checkpointed_lsn(), 0);
        assert!(coordinator.metrics().checkpoint_failures >= 1);

        r1.set_failing(false);
        assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));
        assert!(r1.commits().contains(&id));
        assert_eq!(coordinator.checkpointed_lsn(), 1);
    }

    #[test]
    fn test_stalled_batch_is_reported_and_recovers() {
        let (storage, registry) = setup();
        let r1 = RecordingResource::new();
        r1.set_failing(true);
        registry.register("R1", r1.clone());
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator
            .commit_transaction(TransactionInfo::new(id).with_write("R1", 1))
            .unwrap();

        assert!(wait_until(|| coordinator.metrics().checkpoint_stalled));
        r1.set_failing(false);
        assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));
        assert!(!coordinator.metrics().checkpoint_stalled);
    }

    #[test]
    fn test_resource_receives_highest_id_of_batch() {
        let (storage, registry) = setup();
        let gate = GatedResource::new();
        let shared = RecordingResource::new();
        registry.register("gate", gate.clone());
        registry.register("shared", shared.clone());
        let coordinator = start(&storage, &registry);

        // Block the checkpoint stage so the next transactions share a batch
        let first = coordinator.start_transaction(LONG).unwrap();
        coordinator
            .commit_transaction(TransactionInfo::new(first).with_write("gate", 1))
            .unwrap();
        assert!(wait_until(|| gate.entered() > 0));

        let ids: Vec<_> = (0..3)
            .map(|_| coordinator.start_transaction(LONG).unwrap())
            .collect();
        for &id in &ids {
            coordinator
                .commit_transaction(TransactionInfo::new(id).with_write("shared", id))
                .unwrap();
        }
        assert!(wait_until(|| ids.iter().all(|&id| {
            coordinator.transaction_state(id) == Some(TransactionState::Committed)
        })));

        gate.open();
        assert!(wait_until(|| ids.iter().all(|&id| {
            coordinator.transaction_state(id) == Some(TransactionState::Checkpointed)
        })));
        assert_eq!(shared.commits(), vec![ids[2]]);
    }

    #[test]
    fn test_checkpoint_batches_are_capped() {
        let (storage, registry) = setup();
        let gate = GatedResource::new();
        let shared = RecordingResource::new();
        registry.register("gate", gate.clone());
        registry.register("shared", shared.clone());
        let coordinator = start(&storage, &registry);

        let first = coordinator.start_transaction(LONG).unwrap();
        coordinator
            .commit_transaction(TransactionInfo::new(first).with_write("gate", 1))
            .unwrap();
        assert!(wait_until(|| gate.entered() > 0));

        let ids: Vec<_> = (0..450)
            .map(|_| coordinator.start_transaction(LONG).unwrap())
            .collect();
        for &id in &ids {
            coordinator
                .commit_transaction(TransactionInfo::new(id).with_write("shared", id))
                .unwrap();
        }
        assert!(wait_until(|| ids.iter().all(|&id| {
            coordinator.transaction_state(id) == Some(TransactionState::Committed)
        })));

        gate.open();
        assert!(wait_until(|| ids.iter().all(|&id| {
            coordinator.transaction_state(id) == Some(TransactionState::Checkpointed)
        })));
        // One notification per batch of at most MAX_CHECKPOINT_BATCH_SIZE
        assert_eq!(MAX_CHECKPOINT_BATCH_SIZE, 200);
        assert_eq!(shared.commits(), vec![ids[199], ids[399], ids[449]]);
    }

    #[test]
    fn test_unregistered_resource_blocks_checkpoint() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator
            .commit_transaction(TransactionInfo::new(id).with_write("nowhere", 1))
            .unwrap();
        assert!(wait_until(|| coordinator.metrics().checkpoint_failures >= 1));
        assert_eq!(coordinator.transaction_state(id), Some(TransactionState::Committed));

        registry.register("nowhere", RecordingResource::new());
        assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));
    }
}

// ============================================================================
// Maintenance
// ============================================================================

mod maintenance {
    use super::*;

    #[test]
    fn test_log_truncated_below_checkpoint() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        for _ in 0..3 {
            let id = coordinator.start_transaction(LONG).unwrap();
            coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
            assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));
        }
        assert_eq!(coordinator.checkpointed_lsn(), 3);

        coordinator.run_maintenance();
        assert_eq!(storage.truncated_through(), 2);
        let remaining: Vec<_> = storage.records().iter().map(|r| r.lsn).collect();
        assert_eq!(remaining, vec![3]);
    }

    #[test]
    fn test_truncation_failure_is_retried() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        for _ in 0..2 {
            let id = coordinator.start_transaction(LONG).unwrap();
            coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
            assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));
        }

        storage.set_fail_truncations(true);
        coordinator.run_maintenance();
        assert_eq!(storage.records().len(), 2);

        storage.set_fail_truncations(false);
        coordinator.run_maintenance();
        assert_eq!(storage.truncated_through(), 1);
    }

    #[test]
    fn test_read_only_id_advances_past_resolved_transactions() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);
        assert_eq!(coordinator.read_only_transaction_id(), 0);

        let a = coordinator.start_transaction(LONG).unwrap();
        let b = coordinator.start_transaction(LONG).unwrap();
        let c = coordinator.start_transaction(LONG).unwrap();

        coordinator.commit_transaction(TransactionInfo::new(a)).unwrap();
        coordinator.abort_transaction(b, AbortReason::requested(b, "x"));
        assert!(wait_for_state(&coordinator, a, TransactionState::Checkpointed));

        coordinator.run_maintenance();
        // c is still Started
        assert_eq!(coordinator.read_only_transaction_id(), b);
        assert_eq!(coordinator.smallest_active_transaction_id(), c);

        coordinator.abort_transaction(c, AbortReason::requested(c, "x"));
        coordinator.run_maintenance();
        assert_eq!(coordinator.read_only_transaction_id(), c);
    }

    #[test]
    fn test_checkpointed_entries_forgotten_once_unreachable() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);

        let older = coordinator.start_transaction(LONG).unwrap();
        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
        assert!(wait_for_state(&coordinator, id, TransactionState::Checkpointed));

        // `older` is active and could still observe `id`
        coordinator.run_maintenance();
        assert_eq!(coordinator.transaction_status(id), TransactionStatus::Committed);

        coordinator.abort_transaction(older, AbortReason::requested(older, "x"));
        coordinator.run_maintenance();
        assert_eq!(coordinator.transaction_status(id), TransactionStatus::Unknown);
    }

    #[test]
    fn test_evicted_abort_keeps_reporting_aborted() {
        let (storage, registry) = setup();
        let config = CoordinatorConfig {
            transaction_record_preservation_ms: 50,
            ..test_config()
        };
        let coordinator = start_with(&storage, &registry, config);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator.abort_transaction(id, AbortReason::requested(id, "bye"));
        let before = coordinator.table_len();

        thread::sleep(Duration::from_millis(60));
        coordinator.run_maintenance();
        assert_eq!(coordinator.table_len(), before - 1);
        assert_eq!(
            aborted_reason(coordinator.transaction_status(id)),
            AbortReason::requested(id, "bye")
        );

        // A commit depending on the evicted abort cascades
        let next = coordinator.start_transaction(LONG).unwrap();
        let err = coordinator
            .commit_transaction(TransactionInfo::new(next).with_dependency(id))
            .unwrap_err();
        assert_eq!(err.abort_reason().and_then(AbortReason::upstream), Some(id));
    }

    #[test]
    fn test_entries_retained_within_preservation_window() {
        let (storage, registry) = setup();
        let config = CoordinatorConfig {
            transaction_record_preservation_ms: 60_000,
            ..test_config()
        };
        let coordinator = start_with(&storage, &registry, config);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator.abort_transaction(id, AbortReason::requested(id, "x"));
        coordinator.run_maintenance();
        assert_eq!(coordinator.transaction_state(id), Some(TransactionState::Aborted));
    }
}

// ============================================================================
// Durability and recovery
// ============================================================================

mod recovery {
    use super::*;

    #[test]
    fn test_committed_transactions_survive_restart() {
        let (storage, registry) = setup();
        let ids: Vec<_> = {
            let coordinator = start(&storage, &registry);
            let ids: Vec<_> = (0..5)
                .map(|_| coordinator.start_transaction(LONG).unwrap())
                .collect();
            for &id in &ids {
                coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
            }
            assert!(wait_until(|| ids.iter().all(|&id| {
                coordinator.transaction_status(id) == TransactionStatus::Committed
            })));
            ids
        };

        let restarted = start(&storage.reopen(), &registry);
        assert_eq!(restarted.recovery_stats().records_replayed, 5);
        for &id in &ids {
            assert_eq!(restarted.transaction_status(id), TransactionStatus::Committed);
        }
        let next = restarted.start_transaction(LONG).unwrap();
        assert!(next > *ids.last().unwrap());
    }

    #[test]
    fn test_failed_append_is_fatal_and_not_durable() {
        let (storage, registry) = setup();
        storage.fail_next_appends(1);
        let coordinator = start(&storage, &registry);

        let id = coordinator.start_transaction(LONG).unwrap();
        coordinator.commit_transaction(TransactionInfo::new(id)).unwrap();
        assert!(wait_until(|| coordinator.fatal_error().is_some()));

        // Outcome unknown until restart
        assert_eq!(coordinator.transaction_status(id), TransactionStatus::InProgress);
        let other = coordinator.start_transaction(LONG).unwrap();
        assert!(matches!(
            coordinator.commit_transaction(TransactionInfo::new(other)),
            Err(Error::CoordinatorFailed(_))
        ));
        drop(coordinator);

        assert!(storage.records().is_empty());
        let restarted = start(&storage.reopen(), &registry);
        assert_eq!(restarted.recovery_stats().records_replayed, 0);
        assert_eq!(restarted.transaction_status(id), TransactionStatus::Unknown);
        let err = restarted
            .commit_transaction(TransactionInfo::new(id))
            .unwrap_err();
        assert!(matches!(
            err.abort_reason(),
            Some(AbortReason::PresumedAborted { .. })
        ));
    }

    #[test]
    fn test_recovered_transactions_are_checkpointed_again() {
        let (storage, registry) = setup();
        let r1 = RecordingResource::new();
        r1.set_failing(true);
        registry.register("R1", r1.clone());

        let id = {
            let coordinator = start(&storage, &registry);
            let id = coordinator.start_transaction(LONG).unwrap();
            coordinator
                .commit_transaction(TransactionInfo::new(id).with_write("R1", 7))
                .unwrap();
            assert!(wait_until(|| coordinator.transaction_status(id)
                == TransactionStatus::Committed));
            id
        };
        assert!(r1.commits().is_empty());

        r1.set_failing(false);
        let restarted = start(&storage.reopen(), &registry);
        assert_eq!(restarted.recovery_stats().first_lsn, 1);
        assert!(wait_for_state(&restarted, id, TransactionState::Checkpointed));
        assert_eq!(r1.commits(), vec![id]);
        assert_eq!(restarted.checkpointed_lsn(), 1);
    }

    #[test]
    fn test_ids_continue_above_start_record() {
        let (storage, registry) = setup();
        let last = {
            let coordinator = start(&storage, &registry);
            (0..250)
                .map(|_| coordinator.start_transaction(LONG).unwrap())
                .last()
                .unwrap()
        };
        let start_record = storage.start_record_value();
        assert!(start_record >= last);

        let restarted = start(&storage.reopen(), &registry);
        assert_eq!(restarted.recovery_stats().start_record, start_record);
        assert_eq!(restarted.start_transaction(LONG).unwrap(), start_record + 1);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects_work() {
        let (storage, registry) = setup();
        let coordinator = start(&storage, &registry);
        coordinator.shutdown();
        coordinator.shutdown();
        assert!(matches!(
            coordinator.start_transaction(LONG),
            Err(Error::ShuttingDown)
        ));
        assert!(matches!(
            coordinator.commit_transaction(TransactionInfo::new(1)),
            Err(Error::ShuttingDown)
        ));
    }

    #[test]
    fn test_shutdown_releases_start_waiting_for_ids() {
        let (storage, registry) = setup();
        storage.fail_next_start_record_updates(usize::MAX);
        let config = CoordinatorConfig {
            log_maintenance_interval_ms: 10,
            ..test_config()
        };
        let coordinator = Arc::new(start_with(&storage, &registry, config));

        let starter = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.start_transaction(LONG))
        };
        thread::sleep(Duration::from_millis(50));

        // Maintenance is not blocked by a caller waiting for an id window
        coordinator.run_maintenance();

        let (done_tx, done_rx) = mpsc::channel();
        let stopper = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                coordinator.shutdown();
                let _ = done_tx.send(());
            })
        };
        assert!(done_rx.recv_timeout(WAIT).is_ok(), "shutdown did not finish");
        stopper.join().unwrap();
        assert!(matches!(starter.join().unwrap(), Err(Error::ShuttingDown)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (storage, registry) = setup();
        let config = CoordinatorConfig {
            transaction_id_allocation_batch_size: 0,
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            TransactionCoordinator::start(Box::new(storage), registry, config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
