use std::env;
use std::io;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::{LogConfig, LogFormat};

// Import CRATE_NAMES, which lists all crates in the workspace.
include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// Builds the default filter directives if `RUST_LOG` is not set.
///
/// Third-party crates log at `INFO` at most, all workspace crates use the configured level.
fn default_filter(level: LevelFilter) -> EnvFilter {
    let mut directives = LevelFilter::INFO.min(level).to_string();

    // The socket layer of tokio is very spammy on debug, so configure a higher level.
    directives.push_str(",mio=warn");

    for name in CRATE_NAMES {
        directives.push_str(&format!(",{name}={level}"));
    }

    EnvFilter::new(directives)
}

/// Initialize the logging system.
///
/// Logs are written to `stderr`. If the `RUST_LOG` environment variable is set, it takes
/// precedence over the level in the config.
///
/// # Example
///
/// ```
/// let log_config = zbx_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// zbx_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: Logging is initialized during startup before any threads are spawned.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let level = config.level.level_filter();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let format = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) => LogFormat::Pretty,
        (LogFormat::Auto, false) => LogFormat::Simplified,
        (format, _) => format,
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => fmt::layer()
            .with_writer(io::stderr)
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .boxed(),
        LogFormat::Simplified => fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(false)
            .boxed(),
        LogFormat::Pretty | LogFormat::Auto => fmt::layer()
            .with_writer(io::stderr)
            .without_time()
            .compact()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_contains_workspace_crates() {
        let filter = default_filter(LevelFilter::DEBUG).to_string();
        assert!(filter.contains("zbx_log=debug"));
        assert!(filter.contains("mio=warn"));
    }

    #[test]
    fn test_default_filter_quiet() {
        let filter = default_filter(LevelFilter::WARN).to_string();
        assert!(filter.contains("zbx_log=warn"));
        assert!(!filter.contains("=debug"));
    }
}
