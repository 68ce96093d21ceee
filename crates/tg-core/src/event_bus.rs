use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Actor, AgentId, AgentMode, TaskStatus};

/// Change notifications for anything rendering orchestrator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    TaskCreated {
        task_id: Uuid,
        owner: AgentId,
        requires_approval: bool,
    },
    TaskTransitioned {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        actor: Actor,
    },
    AgentModeChanged {
        agent_id: AgentId,
        from: AgentMode,
        to: AgentMode,
    },
    TickCompleted {
        tick: u64,
        created: usize,
        resolved: usize,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    /// The previous tick was still running, so this one was shed.
    TickSkipped { tick: u64, at: DateTime<Utc> },
}

/// A broadcast-style event bus built on top of flume channels.
///
/// Each call to [`subscribe`](Self::subscribe) creates a new receiver that
/// sees every event published after it subscribed. Cloning is cheap.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<OrchestratorEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> flume::Receiver<OrchestratorEvent> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        senders.push(tx);
        rx
    }

    /// Publish to all current subscribers. Subscribers whose receiver has been
    /// dropped are pruned.
    pub fn publish(&self, event: OrchestratorEvent) {
        let mut senders = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
