use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::aggregator::{FinalView, ProgressView, RunState};
use crate::exporter;
use crate::journal::{self, JournalEntry};
use crate::mg_error::MgError;
use crate::log_warn;
use crate::types::{CorrelationId, HaltReason, Outcome, WorkItem};

const CHANNEL_CAPACITY: usize = 64;

// --- Command enum ---

pub enum CoordinatorCommand {
    GetItems {
        reply: oneshot::Sender<(u32, Vec<WorkItem>)>,
    },
    MarkQueued {
        index: usize,
        at: DateTime<Utc>,
        reply: oneshot::Sender<Result<(), MgError>>,
    },
    MarkRunning {
        index: usize,
        reply: oneshot::Sender<Result<(), MgError>>,
    },
    RecordSubmission {
        index: usize,
        correlation_id: CorrelationId,
        reply: oneshot::Sender<Result<(), MgError>>,
    },
    RecordOutcome {
        index: usize,
        outcome: Outcome,
        reply: oneshot::Sender<Result<WorkItem, MgError>>,
    },
    GetProgress {
        reply: oneshot::Sender<ProgressView>,
    },
    Finish {
        ended_at: DateTime<Utc>,
        halt_reason: HaltReason,
        reply: oneshot::Sender<FinalView>,
    },
}

// --- CoordinatorHandle ---

#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    async fn send_command<T>(
        &self,
        command: CoordinatorCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, MgError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| MgError::CoordinatorGone("coordinator shut down".to_string()))?;
        rx.await
            .map_err(|_| MgError::CoordinatorGone("coordinator dropped reply".to_string()))
    }

    /// Concurrency ceiling and a copy of every item, in input order.
    pub async fn get_items(&self) -> Result<(u32, Vec<WorkItem>), MgError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::GetItems { reply }, rx)
            .await
    }

    pub async fn mark_queued(&self, index: usize, at: DateTime<Utc>) -> Result<(), MgError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::MarkQueued { index, at, reply }, rx)
            .await?
    }

    pub async fn mark_running(&self, index: usize) -> Result<(), MgError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::MarkRunning { index, reply }, rx)
            .await?
    }

    pub async fn record_submission(
        &self,
        index: usize,
        correlation_id: CorrelationId,
    ) -> Result<(), MgError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::RecordSubmission {
                index,
                correlation_id,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Apply a terminal outcome. Returns the finished item.
    pub async fn record_outcome(&self, index: usize, outcome: Outcome) -> Result<WorkItem, MgError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::RecordOutcome {
                index,
                outcome,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn get_progress(&self) -> Result<ProgressView, MgError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::GetProgress { reply }, rx)
            .await
    }

    pub async fn finish(
        &self,
        ended_at: DateTime<Utc>,
        halt_reason: HaltReason,
    ) -> Result<FinalView, MgError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::Finish {
                ended_at,
                halt_reason,
                reply,
            },
            rx,
        )
        .await
    }
}

// --- Persistence ---

/// Where the coordinator records progress as outcomes arrive.
///
/// Both are best-effort: a failed write is logged and the run continues.
#[derive(Debug, Clone, Default)]
pub struct Persistence {
    /// Rewritten after every outcome with an in-progress snapshot.
    pub checkpoint_path: Option<PathBuf>,
    /// One JSON line appended per terminal outcome.
    pub journal_path: Option<PathBuf>,
}

impl Persistence {
    pub fn none() -> Self {
        Self::default()
    }
}

struct CoordinatorState {
    run: RunState,
    persistence: Persistence,
}

impl CoordinatorState {
    fn persist_outcome(&self, item: &WorkItem) {
        if let Some(ref path) = self.persistence.journal_path {
            let entry = JournalEntry::from_item(self.run.run_id(), item, Utc::now());
            if let Err(e) = journal::append_entry(path, &entry) {
                log_warn!("[{}] Failed to append journal entry: {}", item.label, e);
            }
        }

        if let Some(ref path) = self.persistence.checkpoint_path {
            let view = self.run.final_view(Utc::now(), HaltReason::InProgress);
            let result = exporter::export(&view, Utc::now())
                .and_then(|snapshot| exporter::write_snapshot(path, &snapshot));
            if let Err(e) = result {
                log_warn!("Failed to write checkpoint {}: {}", path.display(), e);
            }
        }
    }
}

fn handle_record_outcome(
    state: &mut CoordinatorState,
    index: usize,
    outcome: Outcome,
) -> Result<WorkItem, MgError> {
    let item = state.run.record_outcome(index, outcome)?.clone();
    state.persist_outcome(&item);
    Ok(item)
}

async fn run_coordinator(
    mut rx: mpsc::Receiver<CoordinatorCommand>,
    run: RunState,
    persistence: Persistence,
) {
    let mut state = CoordinatorState { run, persistence };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            CoordinatorCommand::GetItems { reply } => {
                let _ = reply.send((
                    state.run.concurrency_ceiling(),
                    state.run.items().to_vec(),
                ));
            }
            CoordinatorCommand::MarkQueued { index, at, reply } => {
                let _ = reply.send(state.run.mark_queued(index, at));
            }
            CoordinatorCommand::MarkRunning { index, reply } => {
                let _ = reply.send(state.run.mark_running(index));
            }
            CoordinatorCommand::RecordSubmission {
                index,
                correlation_id,
                reply,
            } => {
                let _ = reply.send(state.run.record_submission(index, correlation_id));
            }
            CoordinatorCommand::RecordOutcome {
                index,
                outcome,
                reply,
            } => {
                let result = handle_record_outcome(&mut state, index, outcome);
                let _ = reply.send(result);
            }
            CoordinatorCommand::GetProgress { reply } => {
                let _ = reply.send(state.run.progress());
            }
            CoordinatorCommand::Finish {
                ended_at,
                halt_reason,
                reply,
            } => {
                let _ = reply.send(state.run.final_view(ended_at, halt_reason));
            }
        }
    }
}

// --- Spawn ---

pub fn spawn_coordinator(
    run: RunState,
    persistence: Persistence,
) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task_handle = tokio::spawn(run_coordinator(rx, run, persistence));

    (CoordinatorHandle { sender: tx }, task_handle)
}
