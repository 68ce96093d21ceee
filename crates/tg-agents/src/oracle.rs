//! External models the orchestrator consults but does not own.
//!
//! - [`ScoringOracle`] supplies a confidence for new tasks and refreshed
//!   agent scores.
//! - [`CompletionModel`] says whether a running task is ready to resolve.
//! - [`GenerationModel`] decides whether an agent proposes a task this tick
//!   and drafts it.
//!
//! [`SeededOracle`] implements all three from one seeded RNG, so a whole run
//! is reproducible from `oracle.seed`.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tg_core::config::OracleConfig;
use tg_core::types::{Agent, Task, TaskKind, TaskPriority};

use crate::catalog::templates_for;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait ScoringOracle: Send + Sync {
    /// Confidence in `[0, 100]` for a task `agent` is about to propose.
    fn score_task(&self, agent: &Agent, kind: TaskKind) -> u8;

    /// Fresh `(accuracy, efficiency)` after the agent completes a task.
    fn score_agent(&self, _agent: &Agent) -> Option<(f32, f32)> {
        None
    }
}

/// Result of asking whether a running task can resolve this tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    NotReady,
    Ready,
    TransientFailure(String),
}

pub trait CompletionModel: Send + Sync {
    fn poll(&self, task: &Task, agent: &Agent) -> StepOutcome;
}

/// The agent-specific content of a proposed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub recommendation: Option<String>,
}

pub trait GenerationModel: Send + Sync {
    /// Draw whether `agent` proposes a task this tick, given probability `p_gen`.
    fn should_generate(&self, agent: &Agent, p_gen: f64) -> bool;

    fn draft(&self, agent: &Agent) -> TaskDraft;
}

// ---------------------------------------------------------------------------
// SeededOracle
// ---------------------------------------------------------------------------

/// Randomised stand-in for the real scoring and completion services.
pub struct SeededOracle {
    rng: Mutex<StdRng>,
    completion_probability: f64,
    transient_failure_probability: f64,
}

impl SeededOracle {
    pub fn new(seed: Option<u64>, completion_probability: f64, transient_failure_probability: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            completion_probability: completion_probability.clamp(0.0, 1.0),
            transient_failure_probability: transient_failure_probability.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &OracleConfig) -> Self {
        Self::new(
            config.seed,
            config.completion_probability,
            config.transient_failure_probability,
        )
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *rng)
    }
}

impl std::fmt::Debug for SeededOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededOracle")
            .field("completion_probability", &self.completion_probability)
            .field("transient_failure_probability", &self.transient_failure_probability)
            .finish_non_exhaustive()
    }
}

impl ScoringOracle for SeededOracle {
    fn score_task(&self, agent: &Agent, _kind: TaskKind) -> u8 {
        // Experienced agents drift towards higher confidence.
        let bonus = (agent.accuracy / 10.0).round() as u8;
        self.with_rng(|rng| rng.gen_range(30..=90u8)).saturating_add(bonus).min(100)
    }

    fn score_agent(&self, agent: &Agent) -> Option<(f32, f32)> {
        self.with_rng(|rng| {
            let accuracy = agent.accuracy + rng.gen_range(-1.0..=2.0f32);
            let efficiency = agent.efficiency + rng.gen_range(-1.0..=2.0f32);
            Some((accuracy, efficiency))
        })
    }
}

impl CompletionModel for SeededOracle {
    fn poll(&self, _task: &Task, _agent: &Agent) -> StepOutcome {
        self.with_rng(|rng| {
            if !rng.gen_bool(self.completion_probability) {
                StepOutcome::NotReady
            } else if rng.gen_bool(self.transient_failure_probability) {
                StepOutcome::TransientFailure("upstream service unavailable".to_string())
            } else {
                StepOutcome::Ready
            }
        })
    }
}

impl GenerationModel for SeededOracle {
    fn should_generate(&self, _agent: &Agent, p_gen: f64) -> bool {
        self.with_rng(|rng| rng.gen_bool(p_gen.clamp(0.0, 1.0)))
    }

    fn draft(&self, agent: &Agent) -> TaskDraft {
        let templates = templates_for(agent.kind);
        self.with_rng(|rng| {
            let template = templates.choose(rng).copied().unwrap_or(templates[0]);
            TaskDraft {
                title: template.title.to_string(),
                description: template.description.to_string(),
                payload: serde_json::json!({
                    "kind": agent.kind,
                    "reference": format!("{}-{:05}", agent.id, rng.gen_range(0..100_000u32)),
                }),
                priority: template.priority,
                recommendation: Some(template.recommendation.to_string()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
