use std::path::PathBuf;

use crate::types::{CorrelationId, FailureKind, ItemState};

/// Failure of one phase of a single item's migration.
///
/// These never escape the scheduler: each is converted into a `Failed`
/// outcome carrying its `FailureKind` and display text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("Lock failed: {0}")]
    Lock(String),

    #[error("Submission failed: {0}")]
    Submit(String),

    #[error("Remote migration failed: {0}")]
    Remote(String),

    #[error("Monitoring fault: {0}")]
    Monitoring(String),
}

impl AdapterError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AdapterError::Lock(_) => FailureKind::LockFailure,
            AdapterError::Submit(_) => FailureKind::SubmitFailure,
            AdapterError::Remote(_) => FailureKind::RemoteFailure,
            AdapterError::Monitoring(_) => FailureKind::MonitoringFault,
        }
    }
}

/// Run-level errors.
///
/// Categories:
/// - Startup: input rejected before any dispatch
/// - Coordinator: the run-state actor is unreachable
/// - State: a lifecycle rule was violated
/// - Persistence: snapshot/journal I/O and encoding
#[derive(Debug, thiserror::Error)]
pub enum MgError {
    // Startup
    #[error("No work items to migrate")]
    EmptyInput,

    #[error("Duplicate job label '{0}'")]
    DuplicateLabel(String),

    #[error("Concurrency ceiling must be >= 1, got {0}")]
    InvalidConcurrency(u32),

    #[error("Inventory error: {0}")]
    Inventory(String),

    // Coordinator
    #[error("Coordinator unavailable: {0}")]
    CoordinatorGone(String),

    // State
    #[error("No work item at index {0}")]
    UnknownItem(usize),

    #[error("Invalid transition for {label}: {from} -> {to}")]
    InvalidTransition {
        label: String,
        from: ItemState,
        to: ItemState,
    },

    #[error("Conflicting correlation id for {label}: have {existing}, got {incoming}")]
    CorrelationConflict {
        label: String,
        existing: CorrelationId,
        incoming: CorrelationId,
    },

    #[error("Outcome for {0} already recorded")]
    DuplicateOutcome(String),

    #[error("Snapshot inconsistent: {0}")]
    InconsistentSnapshot(String),

    // Persistence
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MgError {
    /// Returns true if the error was raised while validating input, before any dispatch.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            MgError::EmptyInput
                | MgError::DuplicateLabel(_)
                | MgError::InvalidConcurrency(_)
                | MgError::Inventory(_)
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MgError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Lets CLI handlers that return `Result<T, String>` use `?` on `MgError`.
impl From<MgError> for String {
    fn from(err: MgError) -> String {
        err.to_string()
    }
}
