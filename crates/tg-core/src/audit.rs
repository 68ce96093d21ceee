//! Append-only trail of every task transition and human decision.
//!
//! Entries are never mutated or removed. Retention and rotation belong to
//! whatever consumes [`AuditLog::entries`].

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Actor, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub task_id: Uuid,
    pub from_status: TaskStatus,
    pub to_status: TaskStatus,
    pub actor: Actor,
    pub note: Option<String>,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return it with its assigned sequence number.
    pub fn append(
        &self,
        task_id: Uuid,
        from_status: TaskStatus,
        to_status: TaskStatus,
        actor: Actor,
        note: Option<String>,
    ) -> AuditEntry {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = AuditEntry {
            seq: entries.len() as u64,
            timestamp: Utc::now(),
            task_id,
            from_status,
            to_status,
            actor,
            note,
        };
        entries.push(entry.clone());
        entry
    }

    /// Snapshot of the whole log in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn for_task(&self, task_id: Uuid) -> Vec<AuditEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn last_for_task(&self, task_id: Uuid) -> Option<AuditEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|e| e.task_id == task_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_increasing_sequence() {
        let log = AuditLog::new();
        let task = Uuid::new_v4();
        let first = log.append(task, TaskStatus::Pending, TaskStatus::Running, Actor::Scheduler, None);
        let second = log.append(
            task,
            TaskStatus::Running,
            TaskStatus::AwaitingApproval,
            Actor::Scheduler,
            Some("needs review".into()),
        );
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn for_task_filters_and_keeps_order() {
        let log = AuditLog::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        log.append(a, TaskStatus::Pending, TaskStatus::Running, Actor::Scheduler, None);
        log.append(b, TaskStatus::Pending, TaskStatus::Running, Actor::Scheduler, None);
        log.append(a, TaskStatus::Running, TaskStatus::Completed, Actor::Scheduler, None);

        let trail = log.for_task(a);
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].to_status, TaskStatus::Running);
        assert_eq!(trail[1].to_status, TaskStatus::Completed);
        assert_eq!(log.last_for_task(b).map(|e| e.seq), Some(1));
        assert!(log.last_for_task(Uuid::new_v4()).is_none());
    }
}
