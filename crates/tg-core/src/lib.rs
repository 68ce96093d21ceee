//! Core data model and shared state for the taskgate orchestrator: task and
//! agent types, the CAS task store, the audit log, the change-notification
//! bus, and configuration.

pub mod audit;
pub mod config;
pub mod event_bus;
pub mod store;
pub mod types;
