use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mg_error::MgError;
use crate::types::{CorrelationId, HaltReason, ItemState, Outcome, WorkDescriptor, WorkItem};

/// Terminal items, in the order their outcomes were recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultAggregator {
    succeeded: Vec<WorkItem>,
    failed: Vec<WorkItem>,
    seen: HashSet<usize>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a terminal item to its partition.
    ///
    /// Rejects non-terminal items and items already recorded.
    pub fn record(&mut self, item: WorkItem) -> Result<(), MgError> {
        if !item.state.is_terminal() {
            return Err(MgError::InvalidTransition {
                label: item.label.clone(),
                from: item.state,
                to: ItemState::Succeeded,
            });
        }
        if !self.seen.insert(item.index) {
            return Err(MgError::DuplicateOutcome(item.label));
        }
        match item.state {
            ItemState::Succeeded => self.succeeded.push(item),
            _ => self.failed.push(item),
        }
        Ok(())
    }

    pub fn succeeded(&self) -> &[WorkItem] {
        &self.succeeded
    }

    pub fn failed(&self) -> &[WorkItem] {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        self.seen.contains(&index)
    }
}

/// Counts by state; `pending + queued + running + succeeded + failed == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressView {
    pub total: usize,
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ProgressView {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl std::fmt::Display for ProgressView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} done ({} succeeded, {} failed), {} running, {} pending",
            self.completed(),
            self.total,
            self.succeeded,
            self.failed,
            self.running + self.queued,
            self.pending
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub concurrency_ceiling: u32,
    pub total: usize,
    pub halt_reason: HaltReason,
}

/// Final partition of a run: every input item appears in exactly one list.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalView {
    pub metadata: RunMetadata,
    pub succeeded: Vec<WorkItem>,
    pub failed: Vec<WorkItem>,
    /// Items never dispatched, in input order.
    pub incomplete: Vec<WorkItem>,
}

/// Authoritative record of one run. Owned by the coordinator task.
#[derive(Debug, Clone)]
pub struct RunState {
    run_id: String,
    started_at: DateTime<Utc>,
    concurrency_ceiling: u32,
    items: Vec<WorkItem>,
    aggregator: ResultAggregator,
}

/// Run id from the start time, to the millisecond (`run-20260210T093012345Z`).
pub fn run_id_for(started_at: DateTime<Utc>) -> String {
    format!("run-{}", started_at.format("%Y%m%dT%H%M%S%3fZ"))
}

impl RunState {
    /// Build the run from input descriptors, in input order.
    ///
    /// Fails on empty input, a zero ceiling, or two items sharing a label.
    pub fn new(
        descriptors: Vec<WorkDescriptor>,
        concurrency_ceiling: u32,
        started_at: DateTime<Utc>,
    ) -> Result<Self, MgError> {
        if descriptors.is_empty() {
            return Err(MgError::EmptyInput);
        }
        if concurrency_ceiling < 1 {
            return Err(MgError::InvalidConcurrency(concurrency_ceiling));
        }

        let items: Vec<WorkItem> = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, d)| WorkItem::new(index, d))
            .collect();

        let mut labels = HashSet::new();
        for item in &items {
            if !labels.insert(item.label.as_str()) {
                return Err(MgError::DuplicateLabel(item.label.clone()));
            }
        }

        Ok(Self {
            run_id: run_id_for(started_at),
            started_at,
            concurrency_ceiling,
            items,
            aggregator: ResultAggregator::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn concurrency_ceiling(&self) -> u32 {
        self.concurrency_ceiling
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Result<&WorkItem, MgError> {
        self.items.get(index).ok_or(MgError::UnknownItem(index))
    }

    fn item_mut(&mut self, index: usize) -> Result<&mut WorkItem, MgError> {
        self.items.get_mut(index).ok_or(MgError::UnknownItem(index))
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    pub fn mark_queued(&mut self, index: usize, at: DateTime<Utc>) -> Result<(), MgError> {
        self.item_mut(index)?.mark_queued(at)
    }

    pub fn mark_running(&mut self, index: usize) -> Result<(), MgError> {
        self.item_mut(index)?.mark_running()
    }

    pub fn record_submission(
        &mut self,
        index: usize,
        correlation_id: CorrelationId,
    ) -> Result<(), MgError> {
        self.item_mut(index)?.record_submission(correlation_id)
    }

    /// Apply a terminal outcome and hand a copy of the finished item to the aggregator.
    pub fn record_outcome(&mut self, index: usize, outcome: Outcome) -> Result<&WorkItem, MgError> {
        if self.aggregator.contains(index) {
            return Err(MgError::DuplicateOutcome(self.item(index)?.label.clone()));
        }
        let item = self.item_mut(index)?;
        item.finish(outcome)?;
        let finished = item.clone();
        self.aggregator.record(finished)?;
        self.item(index)
    }

    pub fn progress(&self) -> ProgressView {
        let mut view = ProgressView {
            total: self.items.len(),
            ..ProgressView::default()
        };
        for item in &self.items {
            match item.state {
                ItemState::Pending => view.pending += 1,
                ItemState::Queued => view.queued += 1,
                ItemState::Running => view.running += 1,
                ItemState::Succeeded => view.succeeded += 1,
                ItemState::Failed => view.failed += 1,
            }
        }
        view
    }

    /// Partition the run for export.
    ///
    /// `incomplete` holds every item without a recorded outcome. With a
    /// drained scheduler these are all Pending; a checkpoint taken mid-run
    /// also lists in-flight items there.
    pub fn final_view(&self, ended_at: DateTime<Utc>, halt_reason: HaltReason) -> FinalView {
        let incomplete = self
            .items
            .iter()
            .filter(|item| !self.aggregator.contains(item.index))
            .cloned()
            .collect();

        FinalView {
            metadata: RunMetadata {
                run_id: self.run_id.clone(),
                started_at: self.started_at,
                ended_at,
                concurrency_ceiling: self.concurrency_ceiling,
                total: self.items.len(),
                halt_reason,
            },
            succeeded: self.aggregator.succeeded.clone(),
            failed: self.aggregator.failed.clone(),
            incomplete,
        }
    }
}

impl FinalView {
    /// Check the partition: sizes add up to `total`, no index appears twice,
    /// and each list only holds items in the matching state.
    pub fn check_partition(&self) -> Result<(), MgError> {
        let listed = self.succeeded.len() + self.failed.len() + self.incomplete.len();
        if listed != self.metadata.total {
            return Err(MgError::InconsistentSnapshot(format!(
                "{} items listed but run has {}",
                listed, self.metadata.total
            )));
        }

        let mut seen: HashMap<usize, &str> = HashMap::new();
        let lists = [
            ("succeeded", &self.succeeded),
            ("failed", &self.failed),
            ("incomplete", &self.incomplete),
        ];
        for (name, list) in lists {
            for item in list.iter() {
                if let Some(other) = seen.insert(item.index, name) {
                    return Err(MgError::InconsistentSnapshot(format!(
                        "item '{}' appears in both {} and {}",
                        item.label, other, name
                    )));
                }
            }
        }

        if let Some(item) = self
            .succeeded
            .iter()
            .find(|i| i.state != ItemState::Succeeded)
        {
            return Err(MgError::InconsistentSnapshot(format!(
                "item '{}' listed as succeeded but is {}",
                item.label, item.state
            )));
        }
        if let Some(item) = self.failed.iter().find(|i| i.state != ItemState::Failed) {
            return Err(MgError::InconsistentSnapshot(format!(
                "item '{}' listed as failed but is {}",
                item.label, item.state
            )));
        }
        if let Some(item) = self.incomplete.iter().find(|i| i.state.is_terminal()) {
            return Err(MgError::InconsistentSnapshot(format!(
                "item '{}' listed as incomplete but is {}",
                item.label, item.state
            )));
        }

        Ok(())
    }
}
