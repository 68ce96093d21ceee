use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

/// Capability tag shared by agents and the tasks they originate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MaintenanceScheduling,
    PartsOrdering,
    ClaimProcessing,
    CustomerCommunication,
    InventoryManagement,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::MaintenanceScheduling,
        TaskKind::PartsOrdering,
        TaskKind::ClaimProcessing,
        TaskKind::CustomerCommunication,
        TaskKind::InventoryManagement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::MaintenanceScheduling => "maintenance_scheduling",
            TaskKind::PartsOrdering => "parts_ordering",
            TaskKind::ClaimProcessing => "claim_processing",
            TaskKind::CustomerCommunication => "customer_communication",
            TaskKind::InventoryManagement => "inventory_management",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AgentMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Active,
    Paused,
    Learning,
}

impl AgentMode {
    /// Only active agents may propose new tasks.
    pub fn can_originate(&self) -> bool {
        matches!(self, AgentMode::Active)
    }

    /// Active and learning agents keep advancing the tasks they already own.
    pub fn can_advance(&self) -> bool {
        matches!(self, AgentMode::Active | AgentMode::Learning)
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentMode::Active => "active",
            AgentMode::Paused => "paused",
            AgentMode::Learning => "learning",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// AgentId
// ---------------------------------------------------------------------------

/// Stable, operator-assigned agent identifier (e.g. `"a1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub kind: TaskKind,
    pub mode: AgentMode,
    /// Only ever incremented, and only on a scheduler-driven completion.
    pub tasks_completed: u64,
    /// Informational score in `[0, 100]`.
    pub accuracy: f32,
    /// Informational score in `[0, 100]`.
    pub efficiency: f32,
    /// Id lookup only; the task store owns the task.
    pub current_task: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            mode: AgentMode::Active,
            tasks_completed: 0,
            accuracy: 0.0,
            efficiency: 0.0,
            current_task: None,
            registered_at: Utc::now(),
        }
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_scores(mut self, accuracy: f32, efficiency: f32) -> Self {
        self.set_scores(accuracy, efficiency);
        self
    }

    /// Store both scores clamped to `[0, 100]`. NaN collapses to 0.
    pub fn set_scores(&mut self, accuracy: f32, efficiency: f32) {
        self.accuracy = clamp_score(accuracy);
        self.efficiency = clamp_score(efficiency);
    }
}

fn clamp_score(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Paused,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::AwaitingApproval,
        TaskStatus::Completed,
        TaskStatus::Paused,
    ];

    /// Returns `true` when a transition from `self` to `target` is an edge of
    /// the task lifecycle graph.
    ///
    /// `Running -> Running` is the scheduler's bounded retry edge.
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::AwaitingApproval)
                | (TaskStatus::Running, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Paused)
                | (TaskStatus::AwaitingApproval, TaskStatus::Running)
                | (TaskStatus::AwaitingApproval, TaskStatus::Paused)
                | (TaskStatus::Paused, TaskStatus::Running)
        )
    }

    /// Open tasks count against an agent's in-flight budget.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::AwaitingApproval
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::AwaitingApproval => "awaiting-approval",
            TaskStatus::Completed => "completed",
            TaskStatus::Paused => "paused",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// TaskPriority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 0,
    Medium = 1,
    High = 2,
    Urgent = 3,
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Who caused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "agent_id", rename_all = "snake_case")]
pub enum Actor {
    Agent(AgentId),
    Human,
    Scheduler,
}

impl Actor {
    pub fn is_human(&self) -> bool {
        matches!(self, Actor::Human)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Agent(id) => write!(f, "agent:{id}"),
            Actor::Human => f.write_str("human"),
            Actor::Scheduler => f.write_str("scheduler"),
        }
    }
}

// ---------------------------------------------------------------------------
// Human decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    Resume,
}

impl Decision {
    /// The `(from, to)` edge a decision is allowed to take.
    pub fn edge(&self) -> (TaskStatus, TaskStatus) {
        match self {
            Decision::Approve => (TaskStatus::AwaitingApproval, TaskStatus::Running),
            Decision::Reject => (TaskStatus::AwaitingApproval, TaskStatus::Paused),
            Decision::Resume => (TaskStatus::Paused, TaskStatus::Running),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::Resume => "resume",
        };
        f.write_str(label)
    }
}

/// One human note attached to a task. Notes accumulate; none is overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackNote {
    pub decision: Decision,
    pub text: Option<String>,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub title: String,
    pub description: String,
    /// Agent-kind-specific data; never interpreted by the orchestrator.
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// Fixed at creation.
    pub confidence: u8,
    pub priority: TaskPriority,
    /// Fixed at creation.
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub owner_agent_id: AgentId,
    /// Latest human note, if any.
    pub human_feedback: Option<String>,
    pub feedback_history: Vec<FeedbackNote>,
    pub recommendation: Option<String>,
}

impl Task {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

/// Everything needed to create a task. The store assigns id, status and
/// timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub kind: TaskKind,
    pub title: String,
    pub description: String,
    pub payload: serde_json::Value,
    pub confidence: u8,
    pub priority: TaskPriority,
    pub requires_approval: bool,
    pub owner_agent_id: AgentId,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub recommendation: Option<String>,
}

impl NewTask {
    pub fn new(owner: impl Into<AgentId>, kind: TaskKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            payload: serde_json::Value::Null,
            confidence: 0,
            priority: TaskPriority::Medium,
            requires_approval: false,
            owner_agent_id: owner.into(),
            estimated_completion_at: None,
            recommendation: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Values above 100 are clamped.
    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence.min(100);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requires_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    pub fn with_estimated_completion(mut self, at: DateTime<Utc>) -> Self {
        self.estimated_completion_at = Some(at);
        self
    }

    pub(crate) fn into_task(self, id: Uuid, now: DateTime<Utc>) -> Task {
        Task {
            id,
            kind: self.kind,
            title: self.title,
            description: self.description,
            payload: self.payload,
            status: TaskStatus::Pending,
            confidence: self.confidence.min(100),
            priority: self.priority,
            requires_approval: self.requires_approval,
            created_at: now,
            updated_at: now,
            estimated_completion_at: self.estimated_completion_at,
            owner_agent_id: self.owner_agent_id,
            human_feedback: None,
            feedback_history: Vec::new(),
            recommendation: self.recommendation,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_scores_are_clamped() {
        let agent = Agent::new("a1", "Scheduler", TaskKind::PartsOrdering).with_scores(140.0, -3.0);
        assert_eq!(agent.accuracy, 100.0);
        assert_eq!(agent.efficiency, 0.0);

        let agent = agent.with_scores(f32::NAN, 55.5);
        assert_eq!(agent.accuracy, 0.0);
        assert_eq!(agent.efficiency, 55.5);
    }

    #[test]
    fn new_task_confidence_is_clamped() {
        let spec = NewTask::new("a1", TaskKind::ClaimProcessing, "claim").with_confidence(250);
        assert_eq!(spec.confidence, 100);
    }

    #[test]
    fn actor_display() {
        assert_eq!(Actor::Agent(AgentId::from("a1")).to_string(), "agent:a1");
        assert_eq!(Actor::Human.to_string(), "human");
        assert_eq!(Actor::Scheduler.to_string(), "scheduler");
    }

    #[test]
    fn decision_edges_follow_the_graph() {
        for decision in [Decision::Approve, Decision::Reject, Decision::Resume] {
            let (from, to) = decision.edge();
            assert!(from.can_transition_to(&to), "{decision} edge must be legal");
        }
    }
}
