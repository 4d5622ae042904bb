//! Structured logging setup for dentscan
//!
//! Installs a `tracing` subscriber once per process. Filtering starts from
//! `RUST_LOG` and adds a `dentscan=<level>` directive; the HTTP stack is
//! quietened unless `RUST_LOG` says otherwise.
//!
//! # Example
//!
//! ```no_run
//! use dentscan::util::logging;
//!
//! logging::init_from_env();
//! tracing::info!(job_id = "…", "Pipeline started");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "DENTSCAN_LOG_LEVEL";
pub const LOG_JSON_ENV: &str = "DENTSCAN_LOG_JSON";

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for dentscan's own targets
    pub level: Level,

    /// One JSON object per line instead of human-readable output
    pub use_json: bool,

    pub include_target: bool,

    /// File and line of each event
    pub include_location: bool,

    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with full metadata, for log shipping.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    /// Reads `DENTSCAN_LOG_LEVEL` and `DENTSCAN_LOG_JSON`.
    pub fn from_env() -> Self {
        let level = env::var(LOG_LEVEL_ENV)
            .map(|s| parse_level(&s))
            .unwrap_or(Level::INFO);
        let use_json = env::var(LOG_JSON_ENV)
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            level,
            use_json,
            ..Default::default()
        }
    }
}

/// Parses a level name case-insensitively, falling back to INFO.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn directive(raw: &str) -> Option<Directive> {
    raw.parse().ok()
}

fn build_filter(level: Level, quiet_http: bool) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    let own = format!("dentscan={}", level.as_str().to_lowercase());
    if let Some(d) = directive(&own) {
        filter = filter.add_directive(d);
    }
    if quiet_http {
        for raw in ["h2=warn", "hyper=warn", "reqwest=warn", "genai=warn"] {
            if let Some(d) = directive(raw) {
                filter = filter.add_directive(d);
            }
        }
    }
    filter
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level, env::var("RUST_LOG").is_err());

        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_thread_names(config.include_thread_ids);

        let result = if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
        };

        if let Err(e) = result {
            eprintln!("Logging already initialised: {}", e);
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

pub fn init_from_env() {
    init_logging(LoggingConfig::from_env());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use yare::parameterized;

    #[parameterized(
        trace = { "trace", Level::TRACE },
        debug_upper = { "DEBUG", Level::DEBUG },
        info = { "info", Level::INFO },
        warning = { "warning", Level::WARN },
        error = { " error ", Level::ERROR },
        invalid = { "loud", Level::INFO },
        empty = { "", Level::INFO },
    )]
    fn test_parse_level(input: &str, expected: Level) {
        assert_eq!(parse_level(input), expected);
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
        assert!(config.include_target);
        assert!(!config.include_location);
    }

    #[test]
    fn test_production_config() {
        let config = LoggingConfig::production();
        assert!(config.use_json);
        assert!(config.include_location);
        assert!(config.include_thread_ids);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var(LOG_LEVEL_ENV, "debug");
        env::set_var(LOG_JSON_ENV, "true");
        let config = LoggingConfig::from_env();
        env::remove_var(LOG_LEVEL_ENV);
        env::remove_var(LOG_JSON_ENV);

        assert_eq!(config.level, Level::DEBUG);
        assert!(config.use_json);
    }

    #[test]
    fn test_filter_includes_own_directive() {
        let filter = build_filter(Level::DEBUG, true).to_string();
        assert!(filter.contains("dentscan=debug"));
        assert!(filter.contains("reqwest=warn"));
    }
}
