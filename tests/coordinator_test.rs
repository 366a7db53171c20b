mod common;

use chrono::Utc;

use migrate_golem::coordinator::{spawn_coordinator, Persistence};
use migrate_golem::exporter;
use migrate_golem::journal;
use migrate_golem::mg_error::{AdapterError, MgError};
use migrate_golem::types::*;

use common::{descriptors, fixed_time, run_state};

#[tokio::test]
async fn get_items_returns_ceiling_and_items_in_order() {
    let (handle, task) = spawn_coordinator(run_state(descriptors(3), 2), Persistence::none());

    let (ceiling, items) = handle.get_items().await.unwrap();
    assert_eq!(ceiling, 2);
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.state == ItemState::Pending));

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn lifecycle_through_handle() {
    let (handle, task) = spawn_coordinator(run_state(descriptors(2), 2), Persistence::none());

    handle.mark_queued(0, fixed_time()).await.unwrap();
    handle.mark_running(0).await.unwrap();
    handle
        .record_submission(0, CorrelationId::new("RM_1"))
        .await
        .unwrap();
    let item = handle
        .record_outcome(
            0,
            Outcome::Succeeded {
                correlation_id: None,
                completed_at: Utc::now(),
            },
        )
        .await
        .unwrap();

    assert_eq!(item.state, ItemState::Succeeded);
    assert_eq!(item.correlation_id, Some(CorrelationId::new("RM_1")));

    let progress = handle.get_progress().await.unwrap();
    assert_eq!(progress.succeeded, 1);
    assert_eq!(progress.pending, 1);

    let view = handle
        .finish(Utc::now(), HaltReason::ShutdownRequested)
        .await
        .unwrap();
    assert_eq!(view.succeeded.len(), 1);
    assert_eq!(view.incomplete.len(), 1);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn invalid_transition_is_reported_not_fatal() {
    let (handle, task) = spawn_coordinator(run_state(descriptors(1), 1), Persistence::none());

    let err = handle.mark_running(0).await.unwrap_err();
    assert!(matches!(err, MgError::InvalidTransition { .. }));

    // Coordinator is still serving
    handle.mark_queued(0, fixed_time()).await.unwrap();

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn duplicate_outcome_is_rejected() {
    let (handle, task) = spawn_coordinator(run_state(descriptors(1), 1), Persistence::none());
    handle.mark_queued(0, fixed_time()).await.unwrap();
    handle.mark_running(0).await.unwrap();

    let outcome = Outcome::Succeeded {
        correlation_id: None,
        completed_at: Utc::now(),
    };
    handle.record_outcome(0, outcome.clone()).await.unwrap();
    let err = handle.record_outcome(0, outcome).await.unwrap_err();
    assert!(matches!(err, MgError::DuplicateOutcome(_)));

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn outcomes_are_journaled_and_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join(".migrate-golem/checkpoint.json");
    let journal_path = dir.path().join(".migrate-golem/journal.jsonl");
    let persistence = Persistence {
        checkpoint_path: Some(checkpoint.clone()),
        journal_path: Some(journal_path.clone()),
    };

    let run = run_state(descriptors(3), 2);
    let run_id = run.run_id().to_string();
    let (handle, task) = spawn_coordinator(run, persistence);

    handle.mark_queued(0, fixed_time()).await.unwrap();
    handle.mark_running(0).await.unwrap();
    handle.mark_queued(1, fixed_time()).await.unwrap();
    handle
        .record_outcome(
            1,
            Outcome::from_error(&AdapterError::Lock("denied".to_string()), None, Utc::now()),
        )
        .await
        .unwrap();

    let snapshot = exporter::load_snapshot(&checkpoint).unwrap();
    assert_eq!(snapshot.halt_reason, HaltReason::InProgress);
    assert_eq!(snapshot.counts.failed, 1);
    // In-flight and pending items are both listed as incomplete
    assert_eq!(snapshot.counts.incomplete, 2);
    assert_eq!(snapshot.incomplete[0].state, ItemState::Running);

    let entries = journal::read_entries(&journal_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].run_id, run_id);
    assert_eq!(entries[0].index, 1);
    assert_eq!(entries[0].failure_kind, Some(FailureKind::LockFailure));

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn persistence_failure_does_not_fail_outcome() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where a directory is expected makes every write fail
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();
    let persistence = Persistence {
        checkpoint_path: Some(blocker.join("checkpoint.json")),
        journal_path: Some(blocker.join("journal.jsonl")),
    };

    let (handle, task) = spawn_coordinator(run_state(descriptors(1), 1), persistence);
    handle.mark_queued(0, fixed_time()).await.unwrap();
    handle.mark_running(0).await.unwrap();
    let item = handle
        .record_outcome(
            0,
            Outcome::Succeeded {
                correlation_id: None,
                completed_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    assert_eq!(item.state, ItemState::Succeeded);

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn handle_errors_after_coordinator_exits() {
    let (handle, task) = spawn_coordinator(run_state(descriptors(1), 1), Persistence::none());
    task.abort();
    let _ = task.await;

    let err = handle.get_progress().await.unwrap_err();
    assert!(matches!(err, MgError::CoordinatorGone(_)));
}
