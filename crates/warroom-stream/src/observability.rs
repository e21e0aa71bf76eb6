use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LEVEL: &str = "warn";
const DEFAULT_LOG_FILE: &str = "warroom.logs.jsonl";

/// Where log output goes, resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LogTarget {
    Disabled,
    /// Compact lines on stderr; stdout carries streamed responses.
    Console,
    JsonFile(PathBuf),
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn resolve_target(lookup: impl Fn(&str) -> Option<String>) -> LogTarget {
    let enabled = lookup("WARROOM_OBSERVABILITY_ENABLED")
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true);
    if !enabled {
        return LogTarget::Disabled;
    }
    match lookup("WARROOM_JSON_LOG_PATH").filter(|p| !p.trim().is_empty()) {
        Some(path) => LogTarget::JsonFile(PathBuf::from(path.trim())),
        None => LogTarget::Console,
    }
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("WARROOM_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LEVEL))
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `WARROOM_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `WARROOM_LOG_LEVEL`: optional level/filter override (`info`, `debug`, etc.).
/// - `WARROOM_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact format.
/// - `RUST_LOG`: optional filter override.
///
/// The library itself never calls this; binaries do.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let target = resolve_target(|key| std::env::var(key).ok());
        if target == LogTarget::Disabled {
            return;
        }

        let env_filter = resolve_env_filter();
        if let LogTarget::JsonFile(path) = target {
            let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(parent) => {
                    let _ = std::fs::create_dir_all(parent);
                    parent
                }
                None => std::path::Path::new("."),
            };
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_LOG_FILE);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
