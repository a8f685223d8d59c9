//! Logging setup for the query engine.
//!
//! The engine itself only emits `tracing` events: every statement sent to the
//! driver is logged at `debug` with its phase (`main`, `page-ids`,
//! `relation-id`, `relation-count`, `count`, `mutation`), hydration details at
//! `trace`. This module optionally installs a subscriber, controlled by:
//!
//! - `TESSERA_DEBUG=true|1|yes` - enable debug logging
//! - `TESSERA_LOG_LEVEL=trace|debug|info|warn|error` - set a specific level
//! - `TESSERA_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! ```rust,no_run
//! tessera_query::logging::init();
//! ```

use std::sync::Once;

use crate::config::{EnvSource, MapEnvSource, StdEnvSource};

static INIT: Once = Once::new();

/// Check if debug logging is enabled in the given environment.
pub fn is_debug_enabled_in<S: EnvSource>(source: &S) -> bool {
    source
        .get("TESSERA_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Check if debug logging is enabled via `TESSERA_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    is_debug_enabled_in(&StdEnvSource)
}

/// Resolve the log level from the given environment.
///
/// Defaults to "debug" when `TESSERA_DEBUG` is enabled, otherwise "warn".
pub fn log_level_in<S: EnvSource>(source: &S) -> &'static str {
    let fallback = if is_debug_enabled_in(source) {
        "debug"
    } else {
        "warn"
    };
    match source.get("TESSERA_LOG_LEVEL") {
        Some(level) => match level.to_lowercase().as_str() {
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

/// Resolve the log format from the given environment.
pub fn log_format_in<S: EnvSource>(source: &S) -> &'static str {
    source
        .get("TESSERA_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize logging from the process environment.
///
/// Subsequent calls are no-ops. Nothing is installed unless `TESSERA_DEBUG`
/// or `TESSERA_LOG_LEVEL` is set.
pub fn init() {
    init_from(&StdEnvSource);
}

/// Initialize logging at a fixed level, ignoring `TESSERA_LOG_LEVEL`.
pub fn init_with_level(level: &str) {
    init_from(&MapEnvSource::new().set("TESSERA_LOG_LEVEL", level));
}

/// Initialize logging from an environment source.
pub fn init_from<S: EnvSource>(source: &S) {
    INIT.call_once(|| {
        if !is_debug_enabled_in(source) && source.get("TESSERA_LOG_LEVEL").is_none() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = log_level_in(source);
            let format = log_format_in(source);
            let filter = EnvFilter::try_new(format!(
                "tessera={},tessera_query={},tessera_sqlite={}",
                level, level, level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            match format {
                "json" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .init(),
            }

            tracing::info!(level, format, "tessera logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_disabled_by_default() {
        assert!(!is_debug_enabled_in(&MapEnvSource::new()));
        assert!(is_debug_enabled_in(&MapEnvSource::new().set("TESSERA_DEBUG", "YES")));
    }

    #[test]
    fn test_log_level_resolution() {
        assert_eq!(log_level_in(&MapEnvSource::new()), "warn");
        assert_eq!(
            log_level_in(&MapEnvSource::new().set("TESSERA_DEBUG", "1")),
            "debug"
        );
        assert_eq!(
            log_level_in(&MapEnvSource::new().set("TESSERA_LOG_LEVEL", "TRACE")),
            "trace"
        );
        assert_eq!(
            log_level_in(&MapEnvSource::new().set("TESSERA_LOG_LEVEL", "loud")),
            "warn"
        );
    }

    #[test]
    fn test_log_format_resolution() {
        assert_eq!(log_format_in(&MapEnvSource::new()), "json");
        assert_eq!(
            log_format_in(&MapEnvSource::new().set("TESSERA_LOG_FORMAT", "compact")),
            "compact"
        );
    }
}
