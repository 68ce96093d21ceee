use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tg_agents::registry::AgentRegistry;
use tg_core::store::{TaskFilter, TaskStore};
use tg_core::types::{AgentMode, TaskStatus};
use tracing::info;

/// Point-in-time counts for dashboards and the `--ticks` summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub total_tasks: usize,
    pub pending: usize,
    pub running: usize,
    pub awaiting_approval: usize,
    pub completed: usize,
    pub paused: usize,
    pub agents_active: usize,
    pub agents_paused: usize,
    pub agents_learning: usize,
    pub tasks_completed_by_agent: BTreeMap<String, u64>,
    pub audit_entries: usize,
    pub timestamp: DateTime<Utc>,
}

impl KpiSnapshot {
    pub fn count_for(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::AwaitingApproval => self.awaiting_approval,
            TaskStatus::Completed => self.completed,
            TaskStatus::Paused => self.paused,
        }
    }
}

/// Collects KPI snapshots from the store and registry.
pub struct KpiCollector;

impl KpiCollector {
    pub fn new() -> Self {
        Self
    }

    /// Collect a snapshot and log it.
    ///
    /// Counts are taken status by status, so a snapshot racing a tick may
    /// see a task in two buckets or none; totals settle once the tick ends.
    pub fn collect_snapshot(&self, store: &TaskStore, registry: &AgentRegistry) -> KpiSnapshot {
        let count = |status| store.count(&TaskFilter::all().status(status));
        let agents = registry.list();
        let snapshot = KpiSnapshot {
            total_tasks: store.len(),
            pending: count(TaskStatus::Pending),
            running: count(TaskStatus::Running),
            awaiting_approval: count(TaskStatus::AwaitingApproval),
            completed: count(TaskStatus::Completed),
            paused: count(TaskStatus::Paused),
            agents_active: registry.count_in_mode(AgentMode::Active),
            agents_paused: registry.count_in_mode(AgentMode::Paused),
            agents_learning: registry.count_in_mode(AgentMode::Learning),
            tasks_completed_by_agent: agents
                .iter()
                .map(|a| (a.id.to_string(), a.tasks_completed))
                .collect(),
            audit_entries: store.audit().len(),
            timestamp: Utc::now(),
        };

        info!(
            total_tasks = snapshot.total_tasks,
            running = snapshot.running,
            awaiting_approval = snapshot.awaiting_approval,
            completed = snapshot.completed,
            paused = snapshot.paused,
            agents_active = snapshot.agents_active,
            audit_entries = snapshot.audit_entries,
            timestamp = %snapshot.timestamp,
            "kpi snapshot"
        );

        snapshot
    }
}

impl Default for KpiCollector {
    fn default() -> Self {
        Self::new()
    }
}
