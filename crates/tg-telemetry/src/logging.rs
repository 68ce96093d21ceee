use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the configured level. Everything else is
/// held at `warn` so dependency chatter stays out of tick logs.
const TASKGATE_TARGETS: &[&str] = &["tg_core", "tg_agents", "tg_daemon", "taskgate"];

/// Turn `general.log_level` into an `EnvFilter` directive.
///
/// A bare level such as `"debug"` is scoped to the taskgate crates. Anything
/// containing `=` or `,` is treated as a full directive and passed through.
pub fn directive_for(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    let level = if level.is_empty() { "info" } else { level };
    let mut directive = String::from("warn");
    for target in TASKGATE_TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}

/// `RUST_LOG` wins; otherwise the configured level, falling back to `info`
/// for taskgate crates if the directive does not parse.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive_for(level)))
        .unwrap_or_else(|_| EnvFilter::new(directive_for("info")))
}

/// Install the global subscriber. Returns `false` if one was already set,
/// which makes repeated calls from tests harmless.
pub fn init(service_name: &str, level: &str, json: bool) -> bool {
    let filter = filter_for(level);
    let installed = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .try_init()
            .is_ok()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(
            service = service_name,
            format = if json { "json" } else { "text" },
            "logging initialised"
        );
    }
    installed
}

/// Human-readable output.
pub fn init_logging(service_name: &str, level: &str) -> bool {
    init(service_name, level, false)
}

/// JSON lines, one object per event.
pub fn init_logging_json(service_name: &str, level: &str) -> bool {
    init(service_name, level, true)
}
