use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tg_core::config::GeneratorConfig;
use tg_core::store::TaskStore;
use tg_core::types::{Agent, AgentId, NewTask, Task};
use tracing::{debug, warn};

use crate::approval::ApprovalPolicy;
use crate::oracle::{GenerationModel, ScoringOracle};
use crate::registry::AgentRegistry;

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub p_gen: f64,
    pub max_in_flight_per_agent: usize,
    pub estimated_completion: Duration,
}

impl GeneratorSettings {
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self {
            p_gen: config.p_gen.clamp(0.0, 1.0),
            max_in_flight_per_agent: config.max_in_flight_per_agent.max(1),
            estimated_completion: Duration::from_secs(config.estimated_completion_secs),
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self::from_config(&GeneratorConfig::default())
    }
}

/// What happened during one generation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationReport {
    pub created: Vec<Task>,
    /// Agents skipped because they already own the maximum number of open tasks.
    pub backpressured: Vec<AgentId>,
    /// Active agents whose draw came up empty.
    pub not_drawn: usize,
    pub failed: usize,
}

enum AgentStep {
    Created(Task),
    Backpressured,
    NotDrawn,
    ModeChanged,
    Failed,
}

/// Proposes new tasks on behalf of active agents, once per tick.
pub struct TaskGenerator {
    registry: Arc<AgentRegistry>,
    store: Arc<TaskStore>,
    policy: ApprovalPolicy,
    scoring: Arc<dyn ScoringOracle>,
    model: Arc<dyn GenerationModel>,
    settings: GeneratorSettings,
}

impl TaskGenerator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<TaskStore>,
        policy: ApprovalPolicy,
        scoring: Arc<dyn ScoringOracle>,
        model: Arc<dyn GenerationModel>,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            registry,
            store,
            policy,
            scoring,
            model,
            settings,
        }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// One pass over all agents.
    ///
    /// An agent at its in-flight limit is skipped for this tick; nothing is
    /// queued for later and other agents are unaffected. A model that panics
    /// for one agent counts as a failure for that agent only.
    pub fn run_tick(&self) -> GenerationReport {
        let mut report = GenerationReport::default();

        for agent in self.registry.list() {
            if !agent.mode.can_originate() {
                continue;
            }

            let step = catch_unwind(AssertUnwindSafe(|| self.generate_for(&agent)))
                .unwrap_or_else(|_| {
                    warn!(agent_id = %agent.id, "generation model panicked");
                    AgentStep::Failed
                });
            match step {
                AgentStep::Created(task) => report.created.push(task),
                AgentStep::Backpressured => report.backpressured.push(agent.id.clone()),
                AgentStep::NotDrawn => report.not_drawn += 1,
                AgentStep::ModeChanged => {}
                AgentStep::Failed => report.failed += 1,
            }
        }

        report
    }

    fn generate_for(&self, agent: &Agent) -> AgentStep {
        let open = self.store.open_count_for(&agent.id);
        if open >= self.settings.max_in_flight_per_agent {
            debug!(agent_id = %agent.id, open, "generation skipped: in-flight limit reached");
            return AgentStep::Backpressured;
        }

        if !self.model.should_generate(agent, self.settings.p_gen) {
            return AgentStep::NotDrawn;
        }

        let spec = self.build(agent);

        // The mode may have flipped since the snapshot; re-check right
        // before creating.
        if !self
            .registry
            .mode_of(&agent.id)
            .is_some_and(|mode| mode.can_originate())
        {
            return AgentStep::ModeChanged;
        }

        match self.store.create(spec) {
            Ok(task) => AgentStep::Created(task),
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "failed to create generated task");
                AgentStep::Failed
            }
        }
    }

    fn build(&self, agent: &Agent) -> NewTask {
        let draft = self.model.draft(agent);
        let confidence = self.scoring.score_task(agent, agent.kind).min(100);
        let requires_approval = self.policy.requires_approval(agent.kind, confidence);
        let eta = chrono::Duration::from_std(self.settings.estimated_completion)
            .ok()
            .and_then(|eta| Utc::now().checked_add_signed(eta));

        let mut spec = NewTask::new(agent.id.clone(), agent.kind, draft.title)
            .with_description(draft.description)
            .with_payload(draft.payload)
            .with_confidence(confidence)
            .with_priority(draft.priority)
            .with_requires_approval(requires_approval);
        match eta {
            Some(at) => spec = spec.with_estimated_completion(at),
            None => warn!(agent_id = %agent.id, "estimated completion out of range, leaving it unset"),
        }
        spec.recommendation = draft.recommendation;
        spec
    }
}
