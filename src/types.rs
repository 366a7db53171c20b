use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mg_error::{AdapterError, MgError};

// --- Enums ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    #[default]
    Pending,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl ItemState {
    /// Validates whether a transition from this state to `to` is allowed.
    ///
    /// Rules:
    /// - Forward progression: Pending -> Queued -> Running -> Succeeded | Failed
    /// - Queued -> Failed when dispatch fails before the item occupies a slot
    /// - Succeeded and Failed are terminal
    pub fn is_valid_transition(&self, to: &ItemState) -> bool {
        use ItemState::*;

        matches!(
            (self, to),
            (Pending, Queued)
                | (Queued, Running)
                | (Queued, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Succeeded | ItemState::Failed)
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemState::Pending => write!(f, "pending"),
            ItemState::Queued => write!(f, "queued"),
            ItemState::Running => write!(f, "running"),
            ItemState::Succeeded => write!(f, "succeeded"),
            ItemState::Failed => write!(f, "failed"),
        }
    }
}

pub fn parse_item_state(s: &str) -> Result<ItemState, String> {
    match s.to_lowercase().as_str() {
        "pending" => Ok(ItemState::Pending),
        "queued" => Ok(ItemState::Queued),
        "running" => Ok(ItemState::Running),
        "succeeded" => Ok(ItemState::Succeeded),
        "failed" => Ok(ItemState::Failed),
        _ => Err(format!(
            "Invalid state '{}': expected pending, queued, running, succeeded, or failed",
            s
        )),
    }
}

/// Which phase of an item's migration failed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LockFailure,
    SubmitFailure,
    RemoteFailure,
    MonitoringFault,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::LockFailure => write!(f, "lock_failure"),
            FailureKind::SubmitFailure => write!(f, "submit_failure"),
            FailureKind::RemoteFailure => write!(f, "remote_failure"),
            FailureKind::MonitoringFault => write!(f, "monitoring_fault"),
        }
    }
}

/// Why a scheduler run stopped.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    AllComplete,
    ShutdownRequested,
    /// Written into checkpoints while the run is still going.
    InProgress,
}

// --- Structs ---

/// External-system token for a submitted migration (e.g. `RM_kgDaACQ...`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct SourceRepo {
    pub org: String,
    pub project: String,
    pub repo: String,
}

impl std::fmt::Display for SourceRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.project, self.repo)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct TargetRepo {
    pub org: String,
    pub repo: String,
}

impl std::fmt::Display for TargetRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

/// One row of input: what to migrate and where to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct WorkDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub source: SourceRepo,
    pub target: TargetRepo,
}

impl WorkDescriptor {
    pub fn new(source: SourceRepo, target: TargetRepo) -> Self {
        Self {
            label: None,
            source,
            target,
        }
    }

    /// The explicit label, or `"<target org>/<target repo>"` when none was given.
    pub fn effective_label(&self) -> String {
        match self.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => self.target.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

/// Terminal result of one item's adapter call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded {
        correlation_id: Option<CorrelationId>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        kind: FailureKind,
        message: String,
        correlation_id: Option<CorrelationId>,
        failed_at: DateTime<Utc>,
    },
}

impl Outcome {
    pub fn failed(
        kind: FailureKind,
        message: impl Into<String>,
        correlation_id: Option<CorrelationId>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Outcome::Failed {
            kind,
            message: message.into(),
            correlation_id,
            failed_at,
        }
    }

    pub fn from_error(
        error: &AdapterError,
        correlation_id: Option<CorrelationId>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Outcome::failed(error.kind(), error.to_string(), correlation_id, failed_at)
    }

    pub fn terminal_state(&self) -> ItemState {
        match self {
            Outcome::Succeeded { .. } => ItemState::Succeeded,
            Outcome::Failed { .. } => ItemState::Failed,
        }
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Outcome::Succeeded { correlation_id, .. } | Outcome::Failed { correlation_id, .. } => {
                correlation_id.as_ref()
            }
        }
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        match self {
            Outcome::Succeeded { completed_at, .. } => *completed_at,
            Outcome::Failed { failed_at, .. } => *failed_at,
        }
    }
}

/// One migration unit and its lifecycle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkItem {
    pub index: usize,
    pub label: String,
    pub source: SourceRepo,
    pub target: TargetRepo,
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl WorkItem {
    pub fn new(index: usize, descriptor: WorkDescriptor) -> Self {
        let label = descriptor.effective_label();
        Self {
            index,
            label,
            source: descriptor.source,
            target: descriptor.target,
            state: ItemState::Pending,
            correlation_id: None,
            submitted_at: None,
            completed_at: None,
            failure: None,
        }
    }

    fn transition(&mut self, to: ItemState) -> Result<(), MgError> {
        if !self.state.is_valid_transition(&to) {
            return Err(MgError::InvalidTransition {
                label: self.label.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Pending -> Queued. Stamps the submission time.
    pub fn mark_queued(&mut self, at: DateTime<Utc>) -> Result<(), MgError> {
        self.transition(ItemState::Queued)?;
        self.submitted_at = Some(at);
        Ok(())
    }

    /// Queued -> Running.
    pub fn mark_running(&mut self) -> Result<(), MgError> {
        self.transition(ItemState::Running)
    }

    /// Record the correlation id acknowledged by the external tool.
    ///
    /// Only valid while Running. A second, different id is rejected; the same id is a no-op.
    pub fn record_submission(&mut self, correlation_id: CorrelationId) -> Result<(), MgError> {
        if self.state != ItemState::Running {
            return Err(MgError::InvalidTransition {
                label: self.label.clone(),
                from: self.state,
                to: ItemState::Running,
            });
        }
        match &self.correlation_id {
            Some(existing) if *existing != correlation_id => Err(MgError::CorrelationConflict {
                label: self.label.clone(),
                existing: existing.clone(),
                incoming: correlation_id,
            }),
            _ => {
                self.correlation_id = Some(correlation_id);
                Ok(())
            }
        }
    }

    /// Move to the outcome's terminal state and copy its details onto the item.
    pub fn finish(&mut self, outcome: Outcome) -> Result<(), MgError> {
        self.transition(outcome.terminal_state())?;
        match outcome {
            Outcome::Succeeded {
                correlation_id,
                completed_at,
            } => {
                if correlation_id.is_some() {
                    self.correlation_id = correlation_id;
                }
                self.completed_at = Some(completed_at);
            }
            Outcome::Failed {
                kind,
                message,
                correlation_id,
                failed_at,
            } => {
                if correlation_id.is_some() {
                    self.correlation_id = correlation_id;
                }
                self.completed_at = Some(failed_at);
                self.failure = Some(Failure { kind, message });
            }
        }
        Ok(())
    }

    /// Completion minus submission, when both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.submitted_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> WorkDescriptor {
        WorkDescriptor {
            label: Some(self.label.clone()),
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }
}
