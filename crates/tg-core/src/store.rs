//! Task store: the single shared mutable resource of the orchestrator.
//!
//! Every mutation is a compare-and-swap keyed by the status the caller
//! expects the task to be in. Generator, scheduler and approval gateway all
//! call [`TaskStore::transition`] concurrently without any external locking;
//! whichever commits first wins and the loser receives
//! [`StoreError::StateConflict`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::event_bus::{EventBus, OrchestratorEvent};
use crate::types::{
    Actor, AgentId, Decision, FeedbackNote, NewTask, Task, TaskKind, TaskPriority, TaskStatus,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(Uuid),
    /// The CAS lost: the task was no longer in the expected status.
    #[error("state conflict on task {task_id}: expected {expected}, found {actual}")]
    StateConflict {
        task_id: Uuid,
        expected: TaskStatus,
        actual: TaskStatus,
    },
    #[error("illegal transition on task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::StateConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// StatusChange
// ---------------------------------------------------------------------------

/// A requested CAS transition plus the metadata recorded with it.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub expected: TaskStatus,
    pub target: TaskStatus,
    pub actor: Actor,
    pub note: Option<String>,
    pub feedback: Option<Decision>,
}

impl StatusChange {
    pub fn new(expected: TaskStatus, target: TaskStatus, actor: Actor) -> Self {
        Self {
            expected,
            target,
            actor,
            note: None,
            feedback: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// A human decision. `text` becomes both the audit note and a new entry
    /// in the task's feedback history.
    pub fn human(decision: Decision, text: Option<String>) -> Self {
        let (expected, target) = decision.edge();
        Self {
            expected,
            target,
            actor: Actor::Human,
            note: text,
            feedback: Some(decision),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub owner: Option<AgentId>,
    pub kind: Option<TaskKind>,
    pub priority: Option<TaskPriority>,
    pub requires_approval: Option<bool>,
    /// Only pending, running and awaiting-approval tasks.
    #[serde(default)]
    pub open_only: bool,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn owner(mut self, owner: impl Into<AgentId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn requires_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = Some(requires_approval);
        self
    }

    pub fn open(mut self) -> Self {
        self.open_only = true;
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.owner.as_ref().map_or(true, |o| &task.owner_agent_id == o)
            && self.kind.map_or(true, |k| task.kind == k)
            && self.priority.map_or(true, |p| task.priority == p)
            && self
                .requires_approval
                .map_or(true, |r| task.requires_approval == r)
            && (!self.open_only || task.is_open())
    }
}

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Record {
    seq: u64,
    task: Task,
}

/// Holds every task ever created. Tasks are never deleted.
#[derive(Debug)]
pub struct TaskStore {
    tasks: DashMap<Uuid, Record>,
    next_seq: AtomicU64,
    audit: Arc<AuditLog>,
    events: EventBus,
}

impl TaskStore {
    pub fn new(audit: Arc<AuditLog>, events: EventBus) -> Self {
        Self {
            tasks: DashMap::new(),
            next_seq: AtomicU64::new(0),
            audit,
            events,
        }
    }

    /// Store with its own audit log and a bus nobody listens to.
    pub fn standalone() -> Self {
        Self::new(Arc::new(AuditLog::new()), EventBus::new())
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create a task and immediately begin it.
    ///
    /// The task is inserted as `pending` and then moved `pending -> running`
    /// through the regular CAS path with the owning agent as actor, so the
    /// audit log records the edge like any other.
    pub fn create(&self, spec: NewTask) -> Result<Task> {
        let id = Uuid::new_v4();
        let owner = spec.owner_agent_id.clone();
        let task = spec.into_task(id, Utc::now());
        let requires_approval = task.requires_approval;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(id, Record { seq, task });

        debug!(task_id = %id, owner = %owner, requires_approval, "task created");
        self.events.publish(OrchestratorEvent::TaskCreated {
            task_id: id,
            owner: owner.clone(),
            requires_approval,
        });

        self.transition(
            id,
            StatusChange::new(TaskStatus::Pending, TaskStatus::Running, Actor::Agent(owner))
                .with_note("generated"),
        )
    }

    /// Compare-and-swap the status of a task.
    ///
    /// Commits only if the task is currently in `change.expected` and the edge
    /// `expected -> target` exists in the lifecycle graph. The audit entry is
    /// appended before the record is released, so a task's audit trail is in
    /// commit order.
    pub fn transition(&self, id: Uuid, change: StatusChange) -> Result<Task> {
        let mut record = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let current = record.task.status;

        if current != change.expected {
            return Err(StoreError::StateConflict {
                task_id: id,
                expected: change.expected,
                actual: current,
            });
        }
        if !current.can_transition_to(&change.target) {
            return Err(StoreError::IllegalTransition {
                task_id: id,
                from: current,
                to: change.target,
            });
        }

        let now = Utc::now();
        let task = &mut record.task;
        task.status = change.target;
        task.updated_at = now;
        if let Some(decision) = change.feedback {
            if let Some(text) = &change.note {
                task.human_feedback = Some(text.clone());
            }
            task.feedback_history.push(FeedbackNote {
                decision,
                text: change.note.clone(),
                at: now,
            });
        }

        self.audit.append(
            id,
            current,
            change.target,
            change.actor.clone(),
            change.note.clone(),
        );
        let snapshot = task.clone();
        drop(record);

        debug!(
            task_id = %id,
            from = %current,
            to = %change.target,
            actor = %change.actor,
            "task transition"
        );
        self.events.publish(OrchestratorEvent::TaskTransitioned {
            task_id: id,
            from: current,
            to: change.target,
            actor: change.actor,
        });

        Ok(snapshot)
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.get(&id).map(|r| r.task.clone())
    }

    pub fn status_of(&self, id: Uuid) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|r| r.task.status)
    }

    /// Snapshot of matching tasks in creation order.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut matching: Vec<(u64, Task)> = self
            .tasks
            .iter()
            .filter(|r| filter.matches(&r.task))
            .map(|r| (r.seq, r.task.clone()))
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);
        matching.into_iter().map(|(_, task)| task).collect()
    }

    /// Ids of matching tasks in creation order.
    pub fn ids(&self, filter: &TaskFilter) -> Vec<Uuid> {
        let mut matching: Vec<(u64, Uuid)> = self
            .tasks
            .iter()
            .filter(|r| filter.matches(&r.task))
            .map(|r| (r.seq, r.task.id))
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);
        matching.into_iter().map(|(_, id)| id).collect()
    }

    pub fn open_count_for(&self, agent: &AgentId) -> usize {
        self.tasks
            .iter()
            .filter(|r| r.task.is_open() && &r.task.owner_agent_id == agent)
            .count()
    }

    pub fn count(&self, filter: &TaskFilter) -> usize {
        self.tasks.iter().filter(|r| filter.matches(&r.task)).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(owner: &str) -> NewTask {
        NewTask::new(owner, TaskKind::PartsOrdering, "order brake pads").with_confidence(80)
    }

    #[test]
    fn create_begins_task_immediately() {
        let store = TaskStore::standalone();
        let task = store.create(spec("a1")).unwrap();
        assert_eq!(task.status, TaskStatus::Running);

        let trail = store.audit().for_task(task.id);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].from_status, TaskStatus::Pending);
        assert_eq!(trail[0].to_status, TaskStatus::Running);
        assert_eq!(trail[0].actor, Actor::Agent(AgentId::from("a1")));
    }

    #[test]
    fn cas_rejects_wrong_expected_status() {
        let store = TaskStore::standalone();
        let task = store.create(spec("a1")).unwrap();

        let err = store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::AwaitingApproval, TaskStatus::Running, Actor::Human),
            )
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.status_of(task.id), Some(TaskStatus::Running));
        assert_eq!(store.audit().for_task(task.id).len(), 1);
    }

    #[test]
    fn illegal_edge_is_refused() {
        let store = TaskStore::standalone();
        let task = store.create(spec("a1")).unwrap();
        store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::Running, TaskStatus::Completed, Actor::Scheduler),
            )
            .unwrap();

        let err = store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::Completed, TaskStatus::Running, Actor::Scheduler),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[test]
    fn unknown_task_is_not_found() {
        let store = TaskStore::standalone();
        let id = Uuid::new_v4();
        let err = store
            .transition(
                id,
                StatusChange::new(TaskStatus::Running, TaskStatus::Completed, Actor::Scheduler),
            )
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound(id));
    }

    #[test]
    fn human_feedback_accumulates() {
        let store = TaskStore::standalone();
        let task = store.create(spec("a1")).unwrap();
        store
            .transition(
                task.id,
                StatusChange::new(TaskStatus::Running, TaskStatus::AwaitingApproval, Actor::Scheduler),
            )
            .unwrap();
        store
            .transition(
                task.id,
                StatusChange::human(Decision::Reject, Some("wrong supplier".into())),
            )
            .unwrap();
        let resumed = store
            .transition(task.id, StatusChange::human(Decision::Resume, None))
            .unwrap();

        assert_eq!(resumed.human_feedback.as_deref(), Some("wrong supplier"));
        assert_eq!(resumed.feedback_history.len(), 2);
        assert_eq!(resumed.feedback_history[0].decision, Decision::Reject);
        assert_eq!(resumed.feedback_history[1].decision, Decision::Resume);
        assert!(resumed.feedback_history[1].text.is_none());
    }

    #[test]
    fn list_is_in_creation_order_and_filtered() {
        let store = TaskStore::standalone();
        let first = store.create(spec("a1")).unwrap();
        let second = store.create(spec("a2")).unwrap();
        let third = store.create(spec("a1")).unwrap();

        let all: Vec<Uuid> = store.list(&TaskFilter::all()).iter().map(|t| t.id).collect();
        assert_eq!(all, vec![first.id, second.id, third.id]);

        let owned = store.ids(&TaskFilter::all().owner("a1"));
        assert_eq!(owned, vec![first.id, third.id]);
        assert_eq!(store.open_count_for(&AgentId::from("a1")), 2);
    }

    #[test]
    fn transitions_are_published() {
        let store = TaskStore::standalone();
        let rx = store.events().subscribe();
        let task = store.create(spec("a1")).unwrap();

        let events: Vec<OrchestratorEvent> = rx.drain().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            OrchestratorEvent::TaskCreated { task_id, .. } if task_id == task.id
        ));
        assert!(matches!(
            events[1],
            OrchestratorEvent::TaskTransitioned { to: TaskStatus::Running, .. }
        ));
    }
}
