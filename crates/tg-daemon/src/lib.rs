//! Scheduling side of taskgate: the progress scheduler, the tick pipeline and
//! its non-queueing driver, KPI snapshots, and the [`Orchestrator`] facade.
//!
//! [`Orchestrator`]: orchestrator::Orchestrator

pub mod daemon;
pub mod kpi;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;
pub mod tick;
