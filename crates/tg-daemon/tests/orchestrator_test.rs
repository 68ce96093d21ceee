use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tg_agents::oracle::{CompletionModel, GenerationModel, ScoringOracle, StepOutcome, TaskDraft};
use tg_core::config::{AgentSeed, Config};
use tg_core::event_bus::OrchestratorEvent;
use tg_core::store::TaskFilter;
use tg_core::types::*;
use tg_daemon::orchestrator::{Models, Orchestrator, OrchestratorError};

// ===========================================================================
// Helpers
// ===========================================================================

struct FixedScore(u8);

impl ScoringOracle for FixedScore {
    fn score_task(&self, _agent: &Agent, _kind: TaskKind) -> u8 {
        self.0
    }
}

/// Ready only while the switch is on.
#[derive(Default)]
struct Switch(AtomicBool);

impl Switch {
    fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }
}

impl CompletionModel for Switch {
    fn poll(&self, _task: &Task, _agent: &Agent) -> StepOutcome {
        if self.0.load(Ordering::SeqCst) {
            StepOutcome::Ready
        } else {
            StepOutcome::NotReady
        }
    }
}

/// Draws whenever `p_gen` is positive.
struct Certain;

impl GenerationModel for Certain {
    fn should_generate(&self, _agent: &Agent, p_gen: f64) -> bool {
        p_gen > 0.0
    }

    fn draft(&self, agent: &Agent) -> TaskDraft {
        TaskDraft {
            title: format!("{} proposal", agent.kind),
            description: "from test".into(),
            payload: serde_json::json!({ "ref": agent.id }),
            priority: TaskPriority::High,
            recommendation: None,
        }
    }
}

fn seed(id: &str, kind: TaskKind) -> AgentSeed {
    AgentSeed {
        id: id.into(),
        name: format!("agent {id}"),
        kind,
        mode: AgentMode::Active,
    }
}

fn config(p_gen: f64, max_in_flight: usize) -> Config {
    let mut config = Config::default();
    config.generator.p_gen = p_gen;
    config.generator.max_in_flight_per_agent = max_in_flight;
    config.approval.threshold = 70;
    config.agents = vec![seed("a1", TaskKind::PartsOrdering)];
    config
}

fn orchestrator(config: Config, confidence: u8) -> (Orchestrator, Arc<Switch>) {
    let completion = Arc::new(Switch::default());
    let models = Models {
        scoring: Arc::new(FixedScore(confidence)),
        completion: completion.clone(),
        generation: Arc::new(Certain),
    };
    (Orchestrator::with_models(config, models).unwrap(), completion)
}

fn a1() -> AgentId {
    AgentId::from("a1")
}

// ===========================================================================
// End-to-end scenarios
// ===========================================================================

#[test]
fn one_tick_creates_one_running_task() {
    let (orch, _) = orchestrator(config(1.0, 3), 90);

    let report = orch.tick();

    assert_eq!(report.tick, 1);
    assert_eq!(report.created.len(), 1);
    let tasks = orch.list_tasks(&TaskFilter::all());
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].owner_agent_id, a1());
    assert_eq!(tasks[0].status, TaskStatus::Running);
    assert_eq!(tasks[0].kind, TaskKind::PartsOrdering);
}

#[test]
fn low_confidence_task_waits_for_approval_then_completes() {
    let (orch, completion) = orchestrator(config(1.0, 1), 40);

    orch.tick();
    let task = orch.list_tasks(&TaskFilter::all()).remove(0);
    assert!(task.requires_approval);

    completion.set(true);
    let report = orch.tick();
    assert_eq!(report.escalated, vec![task.id]);
    assert_eq!(orch.pending_approvals().len(), 1);
    assert!(report.created.is_empty(), "agent is at its in-flight limit");

    let approved = orch.approve(task.id, Some("ship it")).unwrap();
    assert_eq!(approved.status, TaskStatus::Running);
    assert_eq!(approved.human_feedback.as_deref(), Some("ship it"));

    let report = orch.tick();
    assert_eq!(report.completed, vec![task.id]);
    assert_eq!(orch.get_task(task.id).unwrap().status, TaskStatus::Completed);
    assert_eq!(orch.get_agent(&a1()).unwrap().tasks_completed, 1);
}

#[test]
fn reject_with_feedback_pauses_task() {
    let (orch, completion) = orchestrator(config(1.0, 1), 40);
    orch.tick();
    completion.set(true);
    orch.tick();
    let task = orch.pending_approvals().remove(0);

    let rejected = orch.reject(task.id, Some("insufficient data")).unwrap();

    assert_eq!(rejected.status, TaskStatus::Paused);
    let last = orch.audit_for_task(task.id).pop().unwrap();
    assert_eq!(last.actor, Actor::Human);
    assert_eq!(last.note.as_deref(), Some("insufficient data"));

    // Automatic ticks never move it again.
    orch.tick();
    orch.tick();
    assert_eq!(orch.get_task(task.id).unwrap().status, TaskStatus::Paused);
}

#[test]
fn second_approve_is_a_soft_failure() {
    let (orch, completion) = orchestrator(config(1.0, 1), 40);
    orch.tick();
    completion.set(true);
    orch.tick();
    let task = orch.pending_approvals().remove(0);

    let first = orch.approve(task.id, None).unwrap();
    let err = orch.approve(task.id, None).unwrap_err();

    assert!(err.is_soft());
    assert_eq!(orch.get_task(task.id).unwrap().status, first.status);
    assert_eq!(orch.get_task(task.id).unwrap().feedback_history.len(), 1);
}

// ===========================================================================
// Operator control
// ===========================================================================

#[test]
fn paused_agent_generates_nothing() {
    let (orch, _) = orchestrator(config(1.0, 10), 90);
    orch.tick();
    assert_eq!(orch.list_tasks(&TaskFilter::all()).len(), 1);

    orch.set_agent_mode(&a1(), AgentMode::Paused).unwrap();
    for _ in 0..5 {
        orch.tick();
    }
    assert_eq!(orch.list_tasks(&TaskFilter::all()).len(), 1);

    orch.set_agent_mode(&a1(), AgentMode::Learning).unwrap();
    orch.tick();
    assert_eq!(
        orch.list_tasks(&TaskFilter::all()).len(),
        1,
        "learning agents do not originate tasks"
    );
}

#[test]
fn backpressure_caps_open_tasks() {
    let (orch, _) = orchestrator(config(1.0, 2), 90);
    for _ in 0..6 {
        orch.tick();
    }
    assert_eq!(orch.list_tasks(&TaskFilter::all().owner("a1").open()).len(), 2);
}

#[test]
fn set_mode_on_unknown_agent_fails() {
    let (orch, _) = orchestrator(config(1.0, 1), 90);
    assert!(orch
        .set_agent_mode(&AgentId::from("nope"), AgentMode::Paused)
        .is_err());
}

#[test]
fn registering_agents_at_runtime() {
    let (orch, _) = orchestrator(config(1.0, 1), 90);
    orch.register_agent(Agent::new("a2", "Outreach", TaskKind::CustomerCommunication))
        .unwrap();
    assert!(orch
        .register_agent(Agent::new("a2", "Dup", TaskKind::CustomerCommunication))
        .is_err());

    let report = orch.tick();
    assert_eq!(report.created.len(), 2);
    let ids: Vec<String> = orch.list_agents().iter().map(|a| a.id.to_string()).collect();
    assert_eq!(ids, vec!["a1", "a2"]);
}

#[test]
fn invalid_config_is_rejected() {
    let mut cfg = config(1.0, 1);
    cfg.agents.push(seed("a1", TaskKind::InventoryManagement));
    let models = Models {
        scoring: Arc::new(FixedScore(50)),
        completion: Arc::new(Switch::default()),
        generation: Arc::new(Certain),
    };
    let err = Orchestrator::with_models(cfg, models).unwrap_err();
    assert!(matches!(err, OrchestratorError::Config(_)));
}

#[test]
fn seeded_orchestrator_is_reproducible() {
    let mut cfg = config(0.5, 3);
    cfg.oracle.seed = Some(7);
    cfg.agents.push(seed("a2", TaskKind::ClaimProcessing));
    let a = Orchestrator::from_config(cfg.clone()).unwrap();
    let b = Orchestrator::from_config(cfg).unwrap();

    for _ in 0..10 {
        a.tick();
        b.tick();
    }

    let shape = |o: &Orchestrator| -> Vec<(String, TaskStatus, u8)> {
        o.list_tasks(&TaskFilter::all())
            .into_iter()
            .map(|t| (t.title, t.status, t.confidence))
            .collect()
    };
    assert_eq!(shape(&a), shape(&b));
}

// ===========================================================================
// Observation
// ===========================================================================

#[test]
fn subscribers_see_tick_changes() {
    let (orch, _) = orchestrator(config(1.0, 1), 90);
    let rx = orch.subscribe();

    orch.tick();

    let events: Vec<OrchestratorEvent> = rx.try_iter().collect();
    assert!(matches!(events[0], OrchestratorEvent::TaskCreated { .. }));
    assert!(matches!(
        events[1],
        OrchestratorEvent::TaskTransitioned {
            from: TaskStatus::Pending,
            to: TaskStatus::Running,
            ..
        }
    ));
    assert!(matches!(
        events.last(),
        Some(OrchestratorEvent::TickCompleted { tick: 1, created: 1, .. })
    ));
}

#[test]
fn kpi_reflects_state() {
    let mut cfg = config(1.0, 1);
    cfg.agents.push(seed("a2", TaskKind::ClaimProcessing));
    let (orch, completion) = orchestrator(cfg, 90);
    orch.set_agent_mode(&AgentId::from("a2"), AgentMode::Learning)
        .unwrap();

    orch.tick();
    completion.set(true);
    orch.tick();

    let kpi = orch.kpi();
    assert_eq!(kpi.completed, 1);
    assert_eq!(kpi.count_for(TaskStatus::Completed), 1);
    assert_eq!(kpi.running, 1, "a fresh task was generated after completion");
    assert_eq!(kpi.total_tasks, 2);
    assert_eq!(kpi.agents_active, 1);
    assert_eq!(kpi.agents_learning, 1);
    assert_eq!(kpi.tasks_completed_by_agent["a1"], 1);
    assert_eq!(kpi.audit_entries, orch.audit_entries().len());
}
