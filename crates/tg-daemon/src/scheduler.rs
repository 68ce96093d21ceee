use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tg_agents::approval::{ApprovalPolicy, Resolution};
use tg_agents::oracle::{CompletionModel, ScoringOracle, StepOutcome};
use tg_agents::registry::AgentRegistry;
use tg_core::config::SchedulerConfig;
use tg_core::store::{StatusChange, StoreError, TaskFilter, TaskStore};
use tg_core::types::{Actor, Agent, Task, TaskStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of scheduler attempts before a task is parked.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What one evaluation did to one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    NotReady,
    Completed,
    AwaitingApproval,
    Retrying { attempt: u32, reason: String },
    AttemptsExhausted { attempts: u32, reason: String },
    /// Another actor committed first; nothing was changed.
    Conflict,
    /// The owning agent is paused.
    OwnerPaused,
    /// Another evaluation of this task is still in progress.
    InEvaluation,
    OwnerMissing,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerReport {
    pub evaluated: usize,
    pub completed: Vec<Uuid>,
    pub awaiting_approval: Vec<Uuid>,
    pub retried: Vec<Uuid>,
    pub exhausted: Vec<Uuid>,
    pub conflicts: usize,
    pub skipped: usize,
}

impl SchedulerReport {
    fn record(&mut self, task_id: Uuid, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::NotReady => self.evaluated += 1,
            TaskOutcome::Completed => {
                self.evaluated += 1;
                self.completed.push(task_id);
            }
            TaskOutcome::AwaitingApproval => {
                self.evaluated += 1;
                self.awaiting_approval.push(task_id);
            }
            TaskOutcome::Retrying { .. } => {
                self.evaluated += 1;
                self.retried.push(task_id);
            }
            TaskOutcome::AttemptsExhausted { .. } => {
                self.evaluated += 1;
                self.exhausted.push(task_id);
            }
            TaskOutcome::Conflict => self.conflicts += 1,
            TaskOutcome::OwnerPaused | TaskOutcome::InEvaluation | TaskOutcome::OwnerMissing => {
                self.skipped += 1
            }
        }
    }

    /// Tasks that left `running` this pass.
    pub fn resolved(&self) -> usize {
        self.completed.len() + self.awaiting_approval.len() + self.exhausted.len()
    }
}

// ---------------------------------------------------------------------------
// Evaluation claim
// ---------------------------------------------------------------------------

/// Marks a task as mid-evaluation until dropped.
struct EvaluationClaim<'a> {
    set: &'a DashSet<Uuid>,
    id: Uuid,
}

impl<'a> EvaluationClaim<'a> {
    fn acquire(set: &'a DashSet<Uuid>, id: Uuid) -> Option<Self> {
        set.insert(id).then_some(Self { set, id })
    }
}

impl Drop for EvaluationClaim<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// ProgressScheduler
// ---------------------------------------------------------------------------

/// Advances running tasks once per tick.
///
/// Each running task owned by a non-paused agent is polled against the
/// completion model. When ready, its creation-time `confidence` and
/// `requires_approval` decide between `completed` and `awaiting-approval`.
/// Transient failures are retried on later ticks up to `max_attempts`, then
/// the task is parked as `paused` with a failure note.
///
/// Every evaluation is isolated: a conflict, a missing owner or a panicking
/// completion model affects only that task.
pub struct ProgressScheduler {
    registry: Arc<AgentRegistry>,
    store: Arc<TaskStore>,
    policy: ApprovalPolicy,
    completion: Arc<dyn CompletionModel>,
    scoring: Arc<dyn ScoringOracle>,
    max_attempts: u32,
    attempts: DashMap<Uuid, u32>,
    evaluating: DashSet<Uuid>,
}

impl ProgressScheduler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<TaskStore>,
        policy: ApprovalPolicy,
        completion: Arc<dyn CompletionModel>,
        scoring: Arc<dyn ScoringOracle>,
        max_attempts: u32,
    ) -> Self {
        let max_attempts = if max_attempts == 0 {
            warn!("max_attempts was 0, defaulting to {DEFAULT_MAX_ATTEMPTS}");
            DEFAULT_MAX_ATTEMPTS
        } else {
            max_attempts
        };
        Self {
            registry,
            store,
            policy,
            completion,
            scoring,
            max_attempts,
            attempts: DashMap::new(),
            evaluating: DashSet::new(),
        }
    }

    pub fn from_config(
        registry: Arc<AgentRegistry>,
        store: Arc<TaskStore>,
        policy: ApprovalPolicy,
        completion: Arc<dyn CompletionModel>,
        scoring: Arc<dyn ScoringOracle>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::new(registry, store, policy, completion, scoring, config.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Failed attempts recorded for a task since it last left `running`.
    pub fn attempts_for(&self, task_id: Uuid) -> u32 {
        self.attempts.get(&task_id).map(|a| *a).unwrap_or(0)
    }

    /// One bounded pass over the tasks that are `running` right now.
    pub fn run_tick(&self) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        for id in self.store.ids(&TaskFilter::all().status(TaskStatus::Running)) {
            let outcome = self.evaluate(id);
            report.record(id, &outcome);
        }
        if report.resolved() > 0 || !report.retried.is_empty() {
            info!(
                evaluated = report.evaluated,
                completed = report.completed.len(),
                awaiting_approval = report.awaiting_approval.len(),
                retried = report.retried.len(),
                exhausted = report.exhausted.len(),
                conflicts = report.conflicts,
                "scheduler pass"
            );
        }
        report
    }

    /// Evaluate a single task.
    pub fn evaluate(&self, task_id: Uuid) -> TaskOutcome {
        let Some(_claim) = EvaluationClaim::acquire(&self.evaluating, task_id) else {
            debug!(task_id = %task_id, "task already mid-evaluation, skipping");
            return TaskOutcome::InEvaluation;
        };

        let Some(task) = self.store.get(task_id) else {
            return TaskOutcome::Conflict;
        };
        if task.status != TaskStatus::Running {
            return TaskOutcome::Conflict;
        }

        let Some(agent) = self.registry.get(&task.owner_agent_id) else {
            warn!(task_id = %task_id, owner = %task.owner_agent_id, "task owner is not registered");
            return TaskOutcome::OwnerMissing;
        };
        if !agent.mode.can_advance() {
            return TaskOutcome::OwnerPaused;
        }

        if let Err(e) = self.registry.set_current_task(&agent.id, Some(task_id)) {
            warn!(task_id = %task_id, agent_id = %agent.id, error = %e, "could not mark current task");
        }

        let step = catch_unwind(AssertUnwindSafe(|| self.completion.poll(&task, &agent)))
            .unwrap_or_else(|_| {
                warn!(task_id = %task_id, "completion model panicked");
                StepOutcome::TransientFailure("completion model panicked".to_string())
            });

        let outcome = match step {
            StepOutcome::NotReady => TaskOutcome::NotReady,
            StepOutcome::Ready => self.resolve(&task, &agent),
            StepOutcome::TransientFailure(reason) => self.fail(&task, reason),
        };
        if !matches!(outcome, TaskOutcome::NotReady | TaskOutcome::Retrying { .. }) {
            self.registry.release_task(&agent.id, task_id);
        }
        outcome
    }

    fn resolve(&self, task: &Task, agent: &Agent) -> TaskOutcome {
        let (target, note) = match self.policy.resolve(task) {
            Resolution::Complete => (TaskStatus::Completed, "completed".to_string()),
            Resolution::AwaitApproval => (TaskStatus::AwaitingApproval, self.approval_reason(task)),
        };

        let change = StatusChange::new(TaskStatus::Running, target, Actor::Scheduler).with_note(note);
        match self.commit(task.id, change) {
            Some(_) => {
                self.attempts.remove(&task.id);
                if target == TaskStatus::Completed {
                    let scores = self.refreshed_scores(agent);
                    if let Err(e) = self.registry.record_completion(&agent.id, scores) {
                        warn!(agent_id = %agent.id, error = %e, "could not record completion");
                    }
                    TaskOutcome::Completed
                } else {
                    TaskOutcome::AwaitingApproval
                }
            }
            None => TaskOutcome::Conflict,
        }
    }

    /// Scores from the oracle. A panicking oracle leaves the scores as
    /// they are; the completion is still credited.
    fn refreshed_scores(&self, agent: &Agent) -> Option<(f32, f32)> {
        catch_unwind(AssertUnwindSafe(|| self.scoring.score_agent(agent))).unwrap_or_else(|_| {
            warn!(agent_id = %agent.id, "scoring oracle panicked, keeping previous scores");
            None
        })
    }

    fn fail(&self, task: &Task, reason: String) -> TaskOutcome {
        let attempt = {
            let mut count = self.attempts.entry(task.id).or_insert(0);
            *count += 1;
            *count
        };

        if attempt >= self.max_attempts {
            let change = StatusChange::new(TaskStatus::Running, TaskStatus::Paused, Actor::Scheduler)
                .with_note(format!("attempts exhausted after {attempt}: {reason}"));
            return match self.commit(task.id, change) {
                Some(_) => {
                    warn!(task_id = %task.id, attempts = attempt, reason = %reason, "task parked after exhausting attempts");
                    self.attempts.remove(&task.id);
                    TaskOutcome::AttemptsExhausted {
                        attempts: attempt,
                        reason,
                    }
                }
                None => TaskOutcome::Conflict,
            };
        }

        let change = StatusChange::new(TaskStatus::Running, TaskStatus::Running, Actor::Scheduler)
            .with_note(format!("retry {attempt}/{}: {reason}", self.max_attempts));
        match self.commit(task.id, change) {
            Some(_) => {
                debug!(task_id = %task.id, attempt, reason = %reason, "transient failure, will retry");
                TaskOutcome::Retrying { attempt, reason }
            }
            None => TaskOutcome::Conflict,
        }
    }

    /// Apply a CAS. A lost race is absorbed and reported as `None`.
    fn commit(&self, task_id: Uuid, change: StatusChange) -> Option<Task> {
        match self.store.transition(task_id, change) {
            Ok(task) => Some(task),
            Err(e @ StoreError::StateConflict { .. }) => {
                debug!(task_id = %task_id, error = %e, "scheduler lost CAS race");
                None
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "scheduler transition refused");
                None
            }
        }
    }

    fn approval_reason(&self, task: &Task) -> String {
        if self.policy.mandatory_kinds.contains(&task.kind) {
            format!("approval required for {}", task.kind)
        } else if task.confidence < self.policy.threshold {
            format!(
                "confidence {} below threshold {}",
                task.confidence, self.policy.threshold
            )
        } else {
            "approval required".to_string()
        }
    }
}
