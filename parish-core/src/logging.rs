//! Structured logging setup.
//!
//! # Environment Variables
//!
//! - `PARISH_DEBUG=true|1|yes` - Enable debug logging
//! - `PARISH_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `PARISH_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! # Usage
//!
//! ```rust,no_run
//! use parish_core::logging;
//!
//! // Call once at startup; later calls are no-ops.
//! logging::init();
//! ```
//!
//! Inside the crates, use the tracing macros with key-value fields:
//!
//! ```rust,ignore
//! use tracing::{debug, info, warn};
//!
//! info!(tenant_id = %tenant, "Tenant provisioned");
//! warn!(tenant_id = %tenant, code = "T2004", "Close timed out; handle abandoned");
//! ```

use std::sync::Once;

use crate::config::{EnvSource, StdEnvSource};

static INIT: Once = Once::new();

const CRATES: &[&str] = &[
    "parish",
    "parish_core",
    "parish_sqlite",
    "parish_axum",
    "parish_cli",
];

/// Whether `PARISH_DEBUG` is set to "true", "1" or "yes" (case-insensitive).
pub fn is_debug_enabled(env: &impl EnvSource) -> bool {
    env.get("PARISH_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Level from `PARISH_LOG_LEVEL`.
///
/// Defaults to "debug" when `PARISH_DEBUG` is enabled, otherwise "info".
pub fn log_level(env: &impl EnvSource) -> &'static str {
    let fallback = if is_debug_enabled(env) { "debug" } else { "info" };
    match env.get("PARISH_LOG_LEVEL").map(|l| l.to_lowercase()) {
        Some(level) => match level.as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        None => fallback,
    }
}

/// Format from `PARISH_LOG_FORMAT`. Defaults to "json".
pub fn log_format(env: &impl EnvSource) -> &'static str {
    env.get("PARISH_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Filter directive covering the workspace crates at `level`.
pub fn filter_directive(level: &str) -> String {
    CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging from the process environment.
pub fn init() {
    init_with(&StdEnvSource);
}

/// Initialize logging from `env`. Only the first call has an effect.
pub fn init_with(env: &impl EnvSource) {
    INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let level = log_level(env);
        let format = log_format(env);
        let filter =
            EnvFilter::try_new(filter_directive(level)).unwrap_or_else(|_| EnvFilter::new("info"));

        // Another subscriber may already be installed (tests, embedding apps).
        let installed = match format {
            "json" => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init(),
            "compact" => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init(),
            _ => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };

        if installed.is_ok() {
            tracing::info!(level, format, "Parish logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnvSource;

    #[test]
    fn test_defaults() {
        let env = MapEnvSource::new();
        assert!(!is_debug_enabled(&env));
        assert_eq!(log_level(&env), "info");
        assert_eq!(log_format(&env), "json");
    }

    #[test]
    fn test_debug_flag_raises_level() {
        let env = MapEnvSource::new().set("PARISH_DEBUG", "YES");
        assert!(is_debug_enabled(&env));
        assert_eq!(log_level(&env), "debug");
    }

    #[test]
    fn test_explicit_level_and_format() {
        let env = MapEnvSource::new()
            .set("PARISH_LOG_LEVEL", "WARN")
            .set("PARISH_LOG_FORMAT", "compact");
        assert_eq!(log_level(&env), "warn");
        assert_eq!(log_format(&env), "compact");

        let env = MapEnvSource::new().set("PARISH_LOG_LEVEL", "loud");
        assert_eq!(log_level(&env), "info");
    }

    #[test]
    fn test_filter_directive() {
        let directive = filter_directive("debug");
        assert!(directive.starts_with("parish=debug,parish_core=debug"));
        assert!(directive.contains("parish_axum=debug"));
    }
}
