//! Human-in-the-loop approval: the policy that decides which tasks are gated,
//! and the gateway through which operators approve, reject or resume them.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tg_core::config::ApprovalConfig;
use tg_core::store::{StatusChange, StoreError, TaskFilter, TaskStore};
use tg_core::types::{Decision, Task, TaskKind, TaskStatus};
use tracing::{debug, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ApprovalPolicy
// ---------------------------------------------------------------------------

/// Where a running task goes once the completion model says it is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Complete,
    AwaitApproval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Confidence strictly below this requires approval.
    pub threshold: u8,
    pub mandatory_kinds: BTreeSet<TaskKind>,
}

impl ApprovalPolicy {
    pub fn new(threshold: u8, mandatory_kinds: impl IntoIterator<Item = TaskKind>) -> Self {
        Self {
            threshold: threshold.min(100),
            mandatory_kinds: mandatory_kinds.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self::new(config.threshold, config.mandatory_kinds.iter().copied())
    }

    /// Evaluated once, at task creation.
    pub fn requires_approval(&self, kind: TaskKind, confidence: u8) -> bool {
        confidence < self.threshold || self.mandatory_kinds.contains(&kind)
    }

    /// Decide the outcome for a task that is ready to resolve.
    ///
    /// Uses the task's creation-time `confidence` and `requires_approval`.
    /// A gated task completes only after a human has approved it once.
    pub fn resolve(&self, task: &Task) -> Resolution {
        let gated = task.requires_approval || task.confidence < self.threshold;
        if gated && !has_human_approval(task) {
            Resolution::AwaitApproval
        } else {
            Resolution::Complete
        }
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::from_config(&ApprovalConfig::default())
    }
}

fn has_human_approval(task: &Task) -> bool {
    task.feedback_history
        .iter()
        .any(|note| note.decision == Decision::Approve)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("task not found: {0}")]
    NotFound(Uuid),
    /// The task is not in the state the decision applies to; usually it was
    /// already resolved by another actor.
    #[error("cannot {decision} task {task_id}: expected {expected}, found {actual}")]
    InvalidState {
        task_id: Uuid,
        decision: Decision,
        expected: TaskStatus,
        actual: TaskStatus,
    },
}

impl ApprovalError {
    /// Expected races are reported as soft failures.
    pub fn is_already_resolved(&self) -> bool {
        matches!(self, ApprovalError::InvalidState { .. })
    }

    /// Soft failures leave the task untouched and need no operator action
    /// beyond refreshing their view.
    pub fn is_soft(&self) -> bool {
        self.is_already_resolved()
    }
}

pub type Result<T> = std::result::Result<T, ApprovalError>;

// ---------------------------------------------------------------------------
// ApprovalGateway
// ---------------------------------------------------------------------------

/// Applies human decisions to the task store.
///
/// Every call is a single CAS plus one audit append; it never waits on the
/// scheduler. Feedback is recorded in the audit log whether or not text was
/// supplied.
#[derive(Debug, Clone)]
pub struct ApprovalGateway {
    store: Arc<TaskStore>,
}

impl ApprovalGateway {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// `awaiting-approval -> running`
    pub fn approve(&self, task_id: Uuid, feedback: Option<&str>) -> Result<Task> {
        self.decide(task_id, Decision::Approve, feedback)
    }

    /// `awaiting-approval -> paused`
    pub fn reject(&self, task_id: Uuid, feedback: Option<&str>) -> Result<Task> {
        self.decide(task_id, Decision::Reject, feedback)
    }

    /// `paused -> running`, for previously rejected or exhausted tasks.
    pub fn resume(&self, task_id: Uuid, feedback: Option<&str>) -> Result<Task> {
        self.decide(task_id, Decision::Resume, feedback)
    }

    pub fn decide(&self, task_id: Uuid, decision: Decision, feedback: Option<&str>) -> Result<Task> {
        let change = StatusChange::human(decision, feedback.map(str::to_string));
        match self.store.transition(task_id, change) {
            Ok(task) => {
                info!(
                    task_id = %task_id,
                    decision = %decision,
                    status = %task.status,
                    "human decision applied"
                );
                Ok(task)
            }
            Err(StoreError::NotFound(id)) => Err(ApprovalError::NotFound(id)),
            Err(StoreError::StateConflict { actual, .. })
            | Err(StoreError::IllegalTransition { from: actual, .. }) => {
                debug!(
                    task_id = %task_id,
                    decision = %decision,
                    actual = %actual,
                    "decision found task already resolved"
                );
                Err(ApprovalError::InvalidState {
                    task_id,
                    decision,
                    expected: decision.edge().0,
                    actual,
                })
            }
        }
    }

    /// Tasks currently waiting on a human, oldest first.
    pub fn pending(&self) -> Vec<Task> {
        self.store
            .list(&TaskFilter::all().status(TaskStatus::AwaitingApproval))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::types::NewTask;

    fn policy() -> ApprovalPolicy {
        ApprovalPolicy::new(70, [TaskKind::ClaimProcessing])
    }

    #[test]
    fn low_confidence_requires_approval() {
        assert!(policy().requires_approval(TaskKind::PartsOrdering, 40));
        assert!(policy().requires_approval(TaskKind::PartsOrdering, 69));
        assert!(!policy().requires_approval(TaskKind::PartsOrdering, 70));
    }

    #[test]
    fn mandatory_kind_requires_approval_at_any_confidence() {
        assert!(policy().requires_approval(TaskKind::ClaimProcessing, 100));
    }

    #[test]
    fn resolve_gated_task_until_approved() {
        let store = TaskStore::standalone();
        let task = store
            .create(
                NewTask::new("a1", TaskKind::PartsOrdering, "order filters")
                    .with_confidence(40)
                    .with_requires_approval(true),
            )
            .unwrap();
        assert_eq!(policy().resolve(&task), Resolution::AwaitApproval);

        store
            .transition(
                task.id,
                StatusChange::new(
                    TaskStatus::Running,
                    TaskStatus::AwaitingApproval,
                    tg_core::types::Actor::Scheduler,
                ),
            )
            .unwrap();
        let approved = store
            .transition(task.id, StatusChange::human(Decision::Approve, None))
            .unwrap();
        assert_eq!(policy().resolve(&approved), Resolution::Complete);
    }

    #[test]
    fn resolve_confident_task_completes() {
        let store = TaskStore::standalone();
        let task = store
            .create(NewTask::new("a1", TaskKind::PartsOrdering, "order filters").with_confidence(95))
            .unwrap();
        assert_eq!(policy().resolve(&task), Resolution::Complete);
    }

    #[test]
    fn resume_alone_does_not_count_as_approval() {
        let store = TaskStore::standalone();
        let task = store
            .create(
                NewTask::new("a1", TaskKind::ClaimProcessing, "validate claim")
                    .with_confidence(90)
                    .with_requires_approval(true),
            )
            .unwrap();
        store
            .transition(
                task.id,
                StatusChange::new(
                    TaskStatus::Running,
                    TaskStatus::AwaitingApproval,
                    tg_core::types::Actor::Scheduler,
                ),
            )
            .unwrap();
        store
            .transition(task.id, StatusChange::human(Decision::Reject, None))
            .unwrap();
        let resumed = store
            .transition(task.id, StatusChange::human(Decision::Resume, None))
            .unwrap();
        assert_eq!(policy().resolve(&resumed), Resolution::AwaitApproval);
    }
}
