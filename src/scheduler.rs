use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::{lock_and_migrate, MigrationAdapter};
use crate::aggregator::FinalView;
use crate::coordinator::CoordinatorHandle;
use crate::mg_error::{AdapterError, MgError};
use crate::types::{
    CorrelationId, FailureKind, HaltReason, ItemState, Outcome, SourceRepo, TargetRepo,
};
use crate::{log_debug, log_error, log_info, log_warn};

// --- Public types ---

/// Result of a scheduler run, returned to the caller for export and summary display.
#[derive(Debug)]
pub struct RunSummary {
    pub halt_reason: HaltReason,
    /// Items taken off the pending queue (including those whose lock failed).
    pub dispatched: usize,
    pub lock_failures: usize,
    /// Slot tasks whose outcome was harvested.
    pub harvested: usize,
    pub final_view: FinalView,
}

/// Parameters for running the scheduler.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Sleep between sweeps that harvested nothing.
    pub poll_interval: Duration,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
        }
    }
}

// --- Slot tracking ---

struct QueuedItem {
    index: usize,
    label: String,
    source: SourceRepo,
    target: TargetRepo,
}

/// A slot occupied by one in-flight lock+submit+wait task.
struct ActiveSlot {
    index: usize,
    label: String,
    handle: JoinHandle<Outcome>,
    /// Lock acknowledgement; `None` once harvested.
    locked: Option<oneshot::Receiver<()>>,
    /// Submission acknowledgement; `None` once harvested.
    ack: Option<oneshot::Receiver<Option<CorrelationId>>>,
    /// An outcome was already recorded for this item; the task's own result is dropped.
    abandoned: bool,
    filled_at: Instant,
}

#[derive(Default)]
struct SchedulerStats {
    dispatched: usize,
    lock_failures: usize,
    harvested: usize,
}

/// Keep going on item-level state errors; only a lost coordinator ends the run.
fn tolerate<T>(result: Result<T, MgError>, label: &str) -> Result<Option<T>, MgError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e @ MgError::CoordinatorGone(_)) => Err(e),
        Err(e) => {
            log_error!("[{}] {}", label, e);
            Ok(None)
        }
    }
}

// --- Main loop ---

/// Drive every item to a terminal outcome with at most `ceiling` migrations in flight.
///
/// Each sweep walks the slots in index order:
/// 1. Record the slot task's lock (item becomes Running) and submission acknowledgements
/// 2. If the task finished, record its outcome and free the slot
/// 3. Fill an empty slot from the FIFO queue: mark Queued, spawn lock+submit+wait
///
/// The sweep never awaits an item's own work. A lock failure surfaces as the task's
/// outcome while the item is still Queued; its slot is refilled in the same pass.
/// The loop sleeps `poll_interval` only after a sweep that harvested nothing.
/// On cancellation no new item is dispatched; active slots drain, the rest stay pending.
pub async fn run_scheduler<A: MigrationAdapter + 'static>(
    coordinator: CoordinatorHandle,
    adapter: Arc<A>,
    params: RunParams,
    cancel: CancellationToken,
) -> Result<RunSummary, MgError> {
    let (ceiling, items) = coordinator.get_items().await?;
    if ceiling < 1 {
        return Err(MgError::InvalidConcurrency(ceiling));
    }

    let mut pending: VecDeque<QueuedItem> = items
        .into_iter()
        .filter(|item| item.state == ItemState::Pending)
        .map(|item| QueuedItem {
            index: item.index,
            label: item.label,
            source: item.source,
            target: item.target,
        })
        .collect();

    let mut slots: Vec<Option<ActiveSlot>> = (0..ceiling).map(|_| None).collect();
    let mut stats = SchedulerStats::default();
    let mut stop_logged = false;

    log_info!(
        "Scheduler started ({} items, max_concurrent={}).",
        pending.len(),
        ceiling
    );

    loop {
        let mut harvested = 0;

        for slot in slots.iter_mut() {
            if let Some(active) = slot.as_mut() {
                harvest_acks(&coordinator, active).await?;
            }

            if let Some(finished) = slot.take_if(|active| active.handle.is_finished()) {
                harvest_completion(&coordinator, finished, &mut stats).await?;
                harvested += 1;
            }

            if slot.is_none() && !cancel.is_cancelled() {
                *slot = dispatch_next(&coordinator, &adapter, &mut pending, &mut stats).await?;
            }
        }

        let active = slots.iter().filter(|s| s.is_some()).count();

        if cancel.is_cancelled() && !stop_logged {
            stop_logged = true;
            log_warn!(
                "Stop requested: draining {} active migration(s), {} item(s) will not be dispatched",
                active,
                pending.len()
            );
        }

        if active == 0 && (pending.is_empty() || cancel.is_cancelled()) {
            break;
        }

        if harvested == 0 {
            if cancel.is_cancelled() {
                tokio::time::sleep(params.poll_interval).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(params.poll_interval) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
    }

    let halt_reason = if pending.is_empty() {
        HaltReason::AllComplete
    } else {
        HaltReason::ShutdownRequested
    };

    let final_view = coordinator.finish(Utc::now(), halt_reason).await?;

    log_info!(
        "Scheduler finished: {} succeeded, {} failed, {} not started.",
        final_view.succeeded.len(),
        final_view.failed.len(),
        final_view.incomplete.len()
    );

    Ok(RunSummary {
        halt_reason,
        dispatched: stats.dispatched,
        lock_failures: stats.lock_failures,
        harvested: stats.harvested,
        final_view,
    })
}

/// Record the lock and submission acknowledgements the slot's task has sent so far.
async fn harvest_acks(
    coordinator: &CoordinatorHandle,
    active: &mut ActiveSlot,
) -> Result<(), MgError> {
    if let Some(rx) = active.locked.as_mut() {
        match rx.try_recv() {
            Err(TryRecvError::Empty) => return Ok(()),
            Err(TryRecvError::Closed) => {
                // Lock failed; the outcome will say why
                active.locked = None;
                active.ack = None;
                return Ok(());
            }
            Ok(()) => {
                active.locked = None;
                log_debug!("[{}] Source locked", active.label);
                if let Err(e) = coordinator.mark_running(active.index).await {
                    return abandon(coordinator, active, e).await;
                }
            }
        }
    }

    let Some(rx) = active.ack.as_mut() else {
        return Ok(());
    };

    match rx.try_recv() {
        Err(TryRecvError::Empty) => Ok(()),
        Err(TryRecvError::Closed) => {
            // Submission failed before acknowledging; the outcome will say why
            active.ack = None;
            Ok(())
        }
        Ok(None) => {
            active.ack = None;
            log_info!(
                "[{}] Migration queued (no migration id; waiting by target repository)",
                active.label
            );
            Ok(())
        }
        Ok(Some(id)) => {
            active.ack = None;
            log_info!("[{}] Migration queued ({})", active.label, id);
            tolerate(
                coordinator.record_submission(active.index, id).await,
                &active.label,
            )?;
            Ok(())
        }
    }
}

/// The item could not be marked Running after its lock succeeded.
///
/// Fail it now so it is accounted for; the slot stays occupied until the task ends.
async fn abandon(
    coordinator: &CoordinatorHandle,
    active: &mut ActiveSlot,
    error: MgError,
) -> Result<(), MgError> {
    if let MgError::CoordinatorGone(_) = error {
        return Err(error);
    }
    log_error!("[{}] {}", active.label, error);

    let outcome = Outcome::from_error(
        &AdapterError::Monitoring(format!("could not mark {} running: {}", active.label, error)),
        None,
        Utc::now(),
    );
    tolerate(
        coordinator.record_outcome(active.index, outcome).await,
        &active.label,
    )?;
    active.abandoned = true;
    active.ack = None;
    Ok(())
}

/// Collect a finished task's outcome and record it.
async fn harvest_completion(
    coordinator: &CoordinatorHandle,
    finished: ActiveSlot,
    stats: &mut SchedulerStats,
) -> Result<(), MgError> {
    let ActiveSlot {
        index,
        label,
        handle,
        abandoned,
        filled_at,
        ..
    } = finished;
    stats.harvested += 1;

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Outcome::from_error(
            &AdapterError::Monitoring(format!("task for {} ended abnormally: {}", label, e)),
            None,
            Utc::now(),
        ),
    };

    let elapsed = filled_at.elapsed().as_secs();
    match &outcome {
        Outcome::Succeeded { .. } => {
            log_info!("[{}] Migration succeeded ({}s)", label, elapsed)
        }
        Outcome::Failed { kind, message, .. } => {
            if *kind == FailureKind::LockFailure {
                stats.lock_failures += 1;
            }
            log_warn!("[{}] Migration failed ({}, {}s): {}", label, kind, elapsed, message)
        }
    }

    if abandoned {
        log_warn!("[{}] Outcome discarded; item was already failed", label);
        return Ok(());
    }

    tolerate(coordinator.record_outcome(index, outcome).await, &label)?;

    let progress = coordinator.get_progress().await?;
    log_info!("[progress] {}", progress);
    Ok(())
}

/// Fill one empty slot with the next pending item.
///
/// Returns `None` when the queue is empty.
async fn dispatch_next<A: MigrationAdapter + 'static>(
    coordinator: &CoordinatorHandle,
    adapter: &Arc<A>,
    pending: &mut VecDeque<QueuedItem>,
    stats: &mut SchedulerStats,
) -> Result<Option<ActiveSlot>, MgError> {
    while let Some(next) = pending.pop_front() {
        if tolerate(
            coordinator.mark_queued(next.index, Utc::now()).await,
            &next.label,
        )?
        .is_none()
        {
            continue;
        }
        stats.dispatched += 1;

        log_info!("[{}] Migrating {} -> {}", next.label, next.source, next.target);

        let (locked_tx, locked_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        let task_adapter = Arc::clone(adapter);
        let QueuedItem {
            index,
            label,
            source,
            target,
        } = next;

        let handle = tokio::spawn(async move {
            lock_and_migrate(task_adapter.as_ref(), &source, &target, locked_tx, ack_tx).await
        });

        return Ok(Some(ActiveSlot {
            index,
            label,
            handle,
            locked: Some(locked_rx),
            ack: Some(ack_rx),
            abandoned: false,
            filled_at: Instant::now(),
        }));
    }

    Ok(None)
}
