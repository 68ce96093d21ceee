use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tg_agents::generator::TaskGenerator;
use tg_core::event_bus::{EventBus, OrchestratorEvent};
use tracing::info;
use uuid::Uuid;

use crate::scheduler::ProgressScheduler;

/// Summary of one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub created: Vec<Uuid>,
    pub backpressured: usize,
    pub completed: Vec<Uuid>,
    pub escalated: Vec<Uuid>,
    pub retried: Vec<Uuid>,
    pub exhausted: Vec<Uuid>,
    pub conflicts: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TickReport {
    pub fn resolved(&self) -> usize {
        self.completed.len() + self.escalated.len() + self.exhausted.len()
    }
}

/// Runs the scheduler pass and then the generator pass.
///
/// Tasks created by this tick are first evaluated on the next one.
pub struct TickPipeline {
    scheduler: Arc<ProgressScheduler>,
    generator: Arc<TaskGenerator>,
    events: EventBus,
    ticks: AtomicU64,
}

impl TickPipeline {
    pub fn new(scheduler: Arc<ProgressScheduler>, generator: Arc<TaskGenerator>, events: EventBus) -> Self {
        Self {
            scheduler,
            generator,
            events,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn scheduler(&self) -> &Arc<ProgressScheduler> {
        &self.scheduler
    }

    pub fn generator(&self) -> &Arc<TaskGenerator> {
        &self.generator
    }

    /// Ticks started so far.
    pub fn ticks_started(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Reserve the next tick number without running it. Used for shed ticks.
    pub(crate) fn next_tick_number(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn run(&self) -> TickReport {
        let tick = self.next_tick_number();
        self.run_numbered(tick)
    }

    pub(crate) fn run_numbered(&self, tick: u64) -> TickReport {
        let started = Instant::now();

        let progress = self.scheduler.run_tick();
        let generated = self.generator.run_tick();

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let finished_at = Utc::now();
        let report = TickReport {
            tick,
            created: generated.created.iter().map(|t| t.id).collect(),
            backpressured: generated.backpressured.len(),
            completed: progress.completed,
            escalated: progress.awaiting_approval,
            retried: progress.retried,
            exhausted: progress.exhausted,
            conflicts: progress.conflicts,
            skipped: progress.skipped,
            duration_ms,
            finished_at: Some(finished_at),
        };

        info!(
            tick,
            created = report.created.len(),
            completed = report.completed.len(),
            escalated = report.escalated.len(),
            retried = report.retried.len(),
            exhausted = report.exhausted.len(),
            conflicts = report.conflicts,
            duration_ms,
            "tick completed"
        );
        self.events.publish(OrchestratorEvent::TickCompleted {
            tick,
            created: report.created.len(),
            resolved: report.resolved(),
            duration_ms,
            at: finished_at,
        });

        report
    }
}
