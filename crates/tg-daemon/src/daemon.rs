use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tg_core::event_bus::OrchestratorEvent;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::orchestrator::Orchestrator;
use crate::shutdown::ShutdownSignal;
use crate::tick::TickReport;

/// Counters for the tick driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStats {
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    pub ticks_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    run: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DaemonStats {
        DaemonStats {
            ticks_run: self.run.load(Ordering::Relaxed),
            ticks_skipped: self.skipped.load(Ordering::Relaxed),
            ticks_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Clears the in-progress flag when the tick ends, including by panic.
struct InProgressGuard(Arc<AtomicBool>);

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives [`Orchestrator::tick`] on a fixed interval.
///
/// Ticks run on the blocking pool so human decisions on other threads are
/// never held up by a pass. At most one tick is in flight: if the interval
/// fires while the previous tick is still running, that tick is shed (logged,
/// counted and published as `TickSkipped`), never queued.
pub struct Daemon {
    orchestrator: Arc<Orchestrator>,
    tick_interval: Duration,
    max_ticks: Option<u64>,
    shutdown: ShutdownSignal,
    in_progress: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Daemon {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let tick_interval = Duration::from_millis(orchestrator.config().scheduler.tick_interval_ms);
        Self {
            orchestrator,
            tick_interval,
            max_ticks: None,
            shutdown: ShutdownSignal::new(),
            in_progress: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Override the configured interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Stop after this many ticks have been started. Shed ticks do not count.
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Handle for triggering shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn stats(&self) -> DaemonStats {
        self.counters.snapshot()
    }

    /// Run until shutdown or the tick limit. The tick in flight when the loop
    /// stops is awaited before returning.
    pub async fn run(&self) -> DaemonStats {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut in_flight: Option<JoinHandle<TickReport>> = None;
        let mut started = 0u64;

        info!(
            interval_ms = u64::try_from(self.tick_interval.as_millis()).unwrap_or(u64::MAX),
            max_ticks = ?self.max_ticks,
            "tick driver started"
        );

        loop {
            if self.shutdown.is_shutting_down() {
                break;
            }
            if self.max_ticks.is_some_and(|max| started >= max) {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    if self.try_begin() {
                        if let Some(previous) = in_flight.take() {
                            self.join(previous).await;
                        }
                        in_flight = Some(self.spawn_tick());
                        started += 1;
                    } else {
                        self.shed();
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping tick driver");
                    break;
                }
            }
        }

        if let Some(last) = in_flight.take() {
            self.join(last).await;
        }

        let stats = self.stats();
        info!(
            ticks_run = stats.ticks_run,
            ticks_skipped = stats.ticks_skipped,
            ticks_failed = stats.ticks_failed,
            "tick driver stopped"
        );
        stats
    }

    fn try_begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn spawn_tick(&self) -> JoinHandle<TickReport> {
        let guard = InProgressGuard(self.in_progress.clone());
        let orchestrator = self.orchestrator.clone();
        let pipeline_tick = orchestrator.pipeline().next_tick_number();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            orchestrator.pipeline().run_numbered(pipeline_tick)
        })
    }

    fn shed(&self) {
        let tick = self.orchestrator.pipeline().next_tick_number();
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(tick, "previous tick still running, skipping");
        self.orchestrator
            .events()
            .publish(OrchestratorEvent::TickSkipped { tick, at: Utc::now() });
    }

    async fn join(&self, handle: JoinHandle<TickReport>) {
        match handle.await {
            Ok(_) => {
                self.counters.run.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "tick task failed");
            }
        }
    }
}
