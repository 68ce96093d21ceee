use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Agent, AgentMode, TaskKind};

/// Top-level configuration loaded from `~/.taskgate/config.toml`.
///
/// Every section and field has a default, so an empty file (or no file at
/// all) yields a runnable orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Agents registered at startup.
    #[serde(default)]
    pub agents: Vec<AgentSeed>,
}

impl Config {
    /// Load config from `~/.taskgate/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not expressible via types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.scheduler.validate()?;
        self.generator.validate()?;
        self.approval.validate()?;
        self.oracle.validate()?;

        let mut ids = BTreeSet::new();
        for seed in &self.agents {
            let id = seed.id.trim();
            if id.is_empty() {
                return Err(ConfigError::Validation(
                    "agents entries must have a non-empty id".to_string(),
                ));
            }
            if !ids.insert(id.to_string()) {
                return Err(ConfigError::Validation(format!(
                    "agents contains duplicate id '{id}'"
                )));
            }
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskgate")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "general.log_level must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Scheduler attempts per task before it is parked as `paused`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "scheduler.tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "scheduler.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_tick_interval_ms() -> u64 {
    3000
}
fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Probability that an active agent proposes a task on a given tick.
    #[serde(default = "default_p_gen")]
    pub p_gen: f64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_per_agent: usize,
    /// Offset from creation used for `estimated_completion_at`.
    #[serde(default = "default_estimated_completion_secs")]
    pub estimated_completion_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            p_gen: default_p_gen(),
            max_in_flight_per_agent: default_max_in_flight(),
            estimated_completion_secs: default_estimated_completion_secs(),
        }
    }
}

impl GeneratorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_probability("generator.p_gen", self.p_gen)?;
        if self.max_in_flight_per_agent == 0 {
            return Err(ConfigError::Validation(
                "generator.max_in_flight_per_agent must be at least 1".to_string(),
            ));
        }
        if self.estimated_completion_secs > MAX_ESTIMATED_COMPLETION_SECS {
            return Err(ConfigError::Validation(format!(
                "generator.estimated_completion_secs must be at most {MAX_ESTIMATED_COMPLETION_SECS}"
            )));
        }
        Ok(())
    }
}

fn default_p_gen() -> f64 {
    0.3
}
fn default_max_in_flight() -> usize {
    3
}
/// Ten years.
pub const MAX_ESTIMATED_COMPLETION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn default_estimated_completion_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Confidence strictly below this requires human approval.
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    /// Kinds that always require approval regardless of confidence.
    #[serde(default = "default_mandatory_kinds")]
    pub mandatory_kinds: Vec<TaskKind>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            mandatory_kinds: default_mandatory_kinds(),
        }
    }
}

impl ApprovalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold > 100 {
            return Err(ConfigError::Validation(format!(
                "approval.threshold {} must be between 0 and 100",
                self.threshold
            )));
        }
        Ok(())
    }
}

fn default_threshold() -> u8 {
    70
}
fn default_mandatory_kinds() -> Vec<TaskKind> {
    vec![TaskKind::ClaimProcessing]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Fixed RNG seed; absent means seeded from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Chance per tick that a running task is ready to resolve.
    #[serde(default = "default_completion_probability")]
    pub completion_probability: f64,
    /// Chance per resolution attempt of a transient failure.
    #[serde(default = "default_transient_failure_probability")]
    pub transient_failure_probability: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            seed: None,
            completion_probability: default_completion_probability(),
            transient_failure_probability: default_transient_failure_probability(),
        }
    }
}

impl OracleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_probability("oracle.completion_probability", self.completion_probability)?;
        check_probability(
            "oracle.transient_failure_probability",
            self.transient_failure_probability,
        )
    }
}

fn default_completion_probability() -> f64 {
    0.3
}
fn default_transient_failure_probability() -> f64 {
    0.05
}

fn check_probability(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{field} {value} must be between 0.0 and 1.0"
        )));
    }
    Ok(())
}

/// An agent declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSeed {
    pub id: String,
    pub name: String,
    pub kind: TaskKind,
    #[serde(default = "default_agent_mode")]
    pub mode: AgentMode,
}

impl AgentSeed {
    pub fn to_agent(&self) -> Agent {
        Agent::new(self.id.trim(), self.name.clone(), self.kind).with_mode(self.mode)
    }
}

fn default_agent_mode() -> AgentMode {
    AgentMode::Active
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.scheduler.tick_interval_ms, 3000);
        assert_eq!(cfg.approval.threshold, 70);
        assert_eq!(cfg.approval.mandatory_kinds, vec![TaskKind::ClaimProcessing]);
    }

    #[test]
    fn p_gen_out_of_range_is_rejected() {
        let mut cfg = Config::default();
        cfg.generator.p_gen = 1.5;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn threshold_above_100_is_rejected() {
        let mut cfg = Config::default();
        cfg.approval.threshold = 101;
        assert!(cfg.validate().is_err());
    }
}
