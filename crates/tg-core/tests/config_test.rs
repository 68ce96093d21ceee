use std::io::Write;

use tg_core::config::{Config, ConfigError, LogFormat};
use tg_core::types::{AgentMode, TaskKind};

#[test]
fn empty_file_yields_defaults() {
    let cfg = Config::from_toml("").expect("parse empty");
    assert_eq!(cfg.scheduler.max_attempts, 3);
    assert_eq!(cfg.generator.max_in_flight_per_agent, 3);
    assert_eq!(cfg.general.log_format, LogFormat::Text);
    assert!(cfg.agents.is_empty());
    assert!(cfg.oracle.seed.is_none());
}

#[test]
fn load_from_file_with_agents() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(
        file,
        r#"
[general]
log_format = "json"

[scheduler]
tick_interval_ms = 500
max_attempts = 5

[generator]
p_gen = 1.0
max_in_flight_per_agent = 2

[approval]
threshold = 60
mandatory_kinds = ["parts_ordering", "claim_processing"]

[oracle]
seed = 7

[[agents]]
id = "a1"
name = "Maintenance Scheduler"
kind = "maintenance_scheduling"

[[agents]]
id = "a2"
name = "Claims Processor"
kind = "claim_processing"
mode = "learning"
"#
    )
    .expect("write");

    let cfg = Config::load_from(file.path()).expect("load");
    assert_eq!(cfg.general.log_format, LogFormat::Json);
    assert_eq!(cfg.scheduler.tick_interval_ms, 500);
    assert_eq!(cfg.generator.p_gen, 1.0);
    assert_eq!(cfg.approval.threshold, 60);
    assert_eq!(
        cfg.approval.mandatory_kinds,
        vec![TaskKind::PartsOrdering, TaskKind::ClaimProcessing]
    );
    assert_eq!(cfg.oracle.seed, Some(7));
    assert_eq!(cfg.agents.len(), 2);
    assert_eq!(cfg.agents[0].mode, AgentMode::Active);
    assert_eq!(cfg.agents[1].mode, AgentMode::Learning);

    let agent = cfg.agents[1].to_agent();
    assert_eq!(agent.id.as_str(), "a2");
    assert_eq!(agent.kind, TaskKind::ClaimProcessing);
}

#[test]
fn duplicate_agent_ids_fail_validation() {
    let text = r#"
[[agents]]
id = "a1"
name = "one"
kind = "parts_ordering"

[[agents]]
id = "a1"
name = "two"
kind = "parts_ordering"
"#;
    match Config::from_toml(text) {
        Err(ConfigError::Validation(msg)) => assert!(msg.contains("duplicate")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn zero_tick_interval_fails_validation() {
    let err = Config::from_toml("[scheduler]\ntick_interval_ms = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn unbounded_estimated_completion_fails_validation() {
    let err = Config::from_toml("[generator]\nestimated_completion_secs = 10000000000000\n")
        .unwrap_err();
    assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("estimated_completion_secs")));

    let at_limit = format!(
        "[generator]\nestimated_completion_secs = {}\n",
        tg_core::config::MAX_ESTIMATED_COMPLETION_SECS
    );
    Config::from_toml(&at_limit).expect("limit itself is accepted");
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = Config::from_toml("[scheduler\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = Config::load_from("/definitely/not/here/config.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn toml_roundtrip_preserves_policy() {
    let mut cfg = Config::default();
    cfg.approval.threshold = 55;
    let text = cfg.to_toml().expect("serialize");
    let back = Config::from_toml(&text).expect("parse");
    assert_eq!(back.approval.threshold, 55);
}
