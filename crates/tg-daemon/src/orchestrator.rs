//! The facade a presentation layer talks to.
//!
//! Read snapshots, human decisions, operator mode control and change
//! subscription all go through [`Orchestrator`]; scheduling itself is driven
//! by [`tick`](Orchestrator::tick), normally from the [`Daemon`](crate::daemon::Daemon).

use std::sync::Arc;

use tg_agents::approval::{self, ApprovalGateway, ApprovalPolicy};
use tg_agents::generator::{GeneratorSettings, TaskGenerator};
use tg_agents::oracle::{CompletionModel, GenerationModel, ScoringOracle, SeededOracle};
use tg_agents::registry::{self, AgentRegistry, RegistryError};
use tg_core::audit::{AuditEntry, AuditLog};
use tg_core::config::{Config, ConfigError};
use tg_core::event_bus::{EventBus, OrchestratorEvent};
use tg_core::store::{TaskFilter, TaskStore};
use tg_core::types::{Agent, AgentId, AgentMode, Task};
use tracing::info;
use uuid::Uuid;

use crate::kpi::{KpiCollector, KpiSnapshot};
use crate::scheduler::ProgressScheduler;
use crate::tick::{TickPipeline, TickReport};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
}

/// The external models the orchestrator consults.
#[derive(Clone)]
pub struct Models {
    pub scoring: Arc<dyn ScoringOracle>,
    pub completion: Arc<dyn CompletionModel>,
    pub generation: Arc<dyn GenerationModel>,
}

impl Models {
    /// One seeded oracle behind all three roles.
    pub fn seeded(oracle: SeededOracle) -> Self {
        let oracle = Arc::new(oracle);
        Self {
            scoring: oracle.clone(),
            completion: oracle.clone(),
            generation: oracle,
        }
    }
}

pub struct Orchestrator {
    config: Config,
    events: EventBus,
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    gateway: ApprovalGateway,
    pipeline: TickPipeline,
    kpi: KpiCollector,
}

impl Orchestrator {
    /// Build from config with the seeded oracle.
    pub fn from_config(config: Config) -> Result<Self, OrchestratorError> {
        let models = Models::seeded(SeededOracle::from_config(&config.oracle));
        Self::with_models(config, models)
    }

    /// Build from config with caller-supplied models. Agents listed in the
    /// config are registered in order.
    pub fn with_models(config: Config, models: Models) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let events = EventBus::new();
        let audit = Arc::new(AuditLog::new());
        let store = Arc::new(TaskStore::new(audit, events.clone()));
        let registry = Arc::new(AgentRegistry::new(events.clone()));
        for seed in &config.agents {
            registry.register(seed.to_agent())?;
        }

        let policy = ApprovalPolicy::from_config(&config.approval);
        let scheduler = Arc::new(ProgressScheduler::from_config(
            registry.clone(),
            store.clone(),
            policy.clone(),
            models.completion,
            models.scoring.clone(),
            &config.scheduler,
        ));
        let generator = Arc::new(TaskGenerator::new(
            registry.clone(),
            store.clone(),
            policy,
            models.scoring,
            models.generation,
            GeneratorSettings::from_config(&config.generator),
        ));
        let pipeline = TickPipeline::new(scheduler, generator, events.clone());

        info!(
            agents = registry.len(),
            tick_interval_ms = config.scheduler.tick_interval_ms,
            threshold = config.approval.threshold,
            "orchestrator ready"
        );

        Ok(Self {
            gateway: ApprovalGateway::new(store.clone()),
            config,
            events,
            store,
            registry,
            pipeline,
            kpi: KpiCollector::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<ProgressScheduler> {
        self.pipeline.scheduler()
    }

    pub(crate) fn pipeline(&self) -> &TickPipeline {
        &self.pipeline
    }

    // ------------------------------------------------------------------
    // Read snapshots
    // ------------------------------------------------------------------

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        self.store.list(filter)
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.store.get(task_id)
    }

    pub fn pending_approvals(&self) -> Vec<Task> {
        self.gateway.pending()
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.registry.list()
    }

    pub fn get_agent(&self, id: &AgentId) -> Option<Agent> {
        self.registry.get(id)
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.store.audit().entries()
    }

    pub fn audit_for_task(&self, task_id: Uuid) -> Vec<AuditEntry> {
        self.store.audit().for_task(task_id)
    }

    pub fn kpi(&self) -> KpiSnapshot {
        self.kpi.collect_snapshot(&self.store, &self.registry)
    }

    /// Every change published after this call.
    pub fn subscribe(&self) -> flume::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ------------------------------------------------------------------
    // Operator control
    // ------------------------------------------------------------------

    pub fn register_agent(&self, agent: Agent) -> registry::Result<()> {
        self.registry.register(agent)
    }

    pub fn set_agent_mode(&self, id: &AgentId, mode: AgentMode) -> registry::Result<Agent> {
        self.registry.set_mode(id, mode)
    }

    // ------------------------------------------------------------------
    // Human decisions
    // ------------------------------------------------------------------

    pub fn approve(&self, task_id: Uuid, feedback: Option<&str>) -> approval::Result<Task> {
        self.gateway.approve(task_id, feedback)
    }

    pub fn reject(&self, task_id: Uuid, feedback: Option<&str>) -> approval::Result<Task> {
        self.gateway.reject(task_id, feedback)
    }

    pub fn resume(&self, task_id: Uuid, feedback: Option<&str>) -> approval::Result<Task> {
        self.gateway.resume(task_id, feedback)
    }

    // ------------------------------------------------------------------
    // Ticks
    // ------------------------------------------------------------------

    /// Run one tick inline: scheduler pass, then generator pass.
    pub fn tick(&self) -> TickReport {
        self.pipeline.run()
    }

    pub fn ticks_started(&self) -> u64 {
        self.pipeline.ticks_started()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.registry.len())
            .field("tasks", &self.store.len())
            .field("ticks", &self.pipeline.ticks_started())
            .finish_non_exhaustive()
    }
}
