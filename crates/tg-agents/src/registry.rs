use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tg_core::event_bus::{EventBus, OrchestratorEvent};
use tg_core::types::{Agent, AgentId, AgentMode};
use tracing::{debug, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found: `{0}`")]
    NotFound(AgentId),
    #[error("duplicate agent id: `{0}`")]
    DuplicateAgent(AgentId),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    seq: u64,
    agent: Agent,
}

/// Holds every registered agent and its operating mode.
///
/// [`set_mode`](Self::set_mode) is the only operator-facing mutator. The
/// completion counter, scores and current-task reference are bookkeeping
/// owned by the progress scheduler.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: DashMap<AgentId, Entry>,
    next_seq: AtomicU64,
    events: EventBus,
}

impl AgentRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            agents: DashMap::new(),
            next_seq: AtomicU64::new(0),
            events,
        }
    }

    /// Register an agent. Returns error if the id already exists.
    pub fn register(&self, agent: Agent) -> Result<()> {
        use dashmap::mapref::entry::Entry as MapEntry;

        match self.agents.entry(agent.id.clone()) {
            MapEntry::Occupied(_) => Err(RegistryError::DuplicateAgent(agent.id)),
            MapEntry::Vacant(slot) => {
                debug!(agent_id = %agent.id, kind = %agent.kind, mode = %agent.mode, "registered agent");
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(Entry { seq, agent });
                Ok(())
            }
        }
    }

    /// Change an agent's operating mode and return the updated agent.
    ///
    /// The next scheduler tick observes the new mode: a paused agent gets no
    /// new tasks and none of its tasks starts a new step.
    pub fn set_mode(&self, id: &AgentId, mode: AgentMode) -> Result<Agent> {
        let mut entry = self
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let previous = entry.agent.mode;
        entry.agent.mode = mode;
        let snapshot = entry.agent.clone();
        drop(entry);

        if previous != mode {
            info!(agent_id = %id, from = %previous, to = %mode, "agent mode changed");
            self.events.publish(OrchestratorEvent::AgentModeChanged {
                agent_id: id.clone(),
                from: previous,
                to: mode,
            });
        }
        Ok(snapshot)
    }

    pub fn get(&self, id: &AgentId) -> Option<Agent> {
        self.agents.get(id).map(|e| e.agent.clone())
    }

    pub fn mode_of(&self, id: &AgentId) -> Option<AgentMode> {
        self.agents.get(id).map(|e| e.agent.mode)
    }

    /// All agents in registration order.
    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<(u64, Agent)> = self
            .agents
            .iter()
            .map(|e| (e.seq, e.agent.clone()))
            .collect();
        agents.sort_by_key(|(seq, _)| *seq);
        agents.into_iter().map(|(_, agent)| agent).collect()
    }

    pub fn count_in_mode(&self, mode: AgentMode) -> usize {
        self.agents.iter().filter(|e| e.agent.mode == mode).count()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    // -- Scheduler bookkeeping --

    /// Count a completed task and optionally refresh the agent's scores.
    pub fn record_completion(&self, id: &AgentId, scores: Option<(f32, f32)>) -> Result<u64> {
        let mut entry = self
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        entry.agent.tasks_completed += 1;
        if let Some((accuracy, efficiency)) = scores {
            entry.agent.set_scores(accuracy, efficiency);
        }
        Ok(entry.agent.tasks_completed)
    }

    pub fn set_current_task(&self, id: &AgentId, task: Option<Uuid>) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        entry.agent.current_task = task;
        Ok(())
    }

    /// Clear the current-task reference only if it still points at `task`.
    pub fn release_task(&self, id: &AgentId, task: Uuid) {
        if let Some(mut entry) = self.agents.get_mut(id) {
            if entry.agent.current_task == Some(task) {
                entry.agent.current_task = None;
            }
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(EventBus::new())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::types::TaskKind;

    fn agent(id: &str) -> Agent {
        Agent::new(id, format!("agent {id}"), TaskKind::MaintenanceScheduling)
    }

    #[test]
    fn register_and_get() {
        let registry = AgentRegistry::default();
        registry.register(agent("a1")).unwrap();
        let found = registry.get(&AgentId::from("a1")).unwrap();
        assert_eq!(found.name, "agent a1");
        assert_eq!(found.mode, AgentMode::Active);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = AgentRegistry::default();
        registry.register(agent("a1")).unwrap();
        let err = registry.register(agent("a1")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateAgent(AgentId::from("a1")));
    }

    #[test]
    fn set_mode_unknown_agent_is_not_found() {
        let registry = AgentRegistry::default();
        let err = registry
            .set_mode(&AgentId::from("ghost"), AgentMode::Paused)
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound(AgentId::from("ghost")));
    }

    #[test]
    fn set_mode_publishes_only_real_changes() {
        let events = EventBus::new();
        let rx = events.subscribe();
        let registry = AgentRegistry::new(events);
        registry.register(agent("a1")).unwrap();

        let id = AgentId::from("a1");
        registry.set_mode(&id, AgentMode::Active).unwrap();
        assert!(rx.try_recv().is_err());

        let updated = registry.set_mode(&id, AgentMode::Paused).unwrap();
        assert_eq!(updated.mode, AgentMode::Paused);
        match rx.try_recv().unwrap() {
            OrchestratorEvent::AgentModeChanged { from, to, .. } => {
                assert_eq!(from, AgentMode::Active);
                assert_eq!(to, AgentMode::Paused);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn list_keeps_registration_order() {
        let registry = AgentRegistry::default();
        for id in ["c", "a", "b"] {
            registry.register(agent(id)).unwrap();
        }
        let ids: Vec<String> = registry
            .list()
            .into_iter()
            .map(|a| a.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn completion_counter_and_current_task() {
        let registry = AgentRegistry::default();
        registry.register(agent("a1")).unwrap();
        let id = AgentId::from("a1");
        let task = Uuid::new_v4();

        registry.set_current_task(&id, Some(task)).unwrap();
        assert_eq!(registry.record_completion(&id, Some((91.0, 120.0))).unwrap(), 1);
        registry.release_task(&id, Uuid::new_v4());
        assert_eq!(registry.get(&id).unwrap().current_task, Some(task));
        registry.release_task(&id, task);

        let a1 = registry.get(&id).unwrap();
        assert_eq!(a1.tasks_completed, 1);
        assert_eq!(a1.accuracy, 91.0);
        assert_eq!(a1.efficiency, 100.0);
        assert!(a1.current_task.is_none());
    }
}
