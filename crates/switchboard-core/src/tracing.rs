//! Log subscriber setup for the switchboard binaries.
//!
//! Two filters are applied: one for the crates' own diagnostics and one for
//! the `switchboard::events` target the [`EventFeed`](crate::EventFeed)
//! mirrors every event to. The broker keeps its internals quiet and logs the
//! feed, so the log reads like the event display. `RUST_LOG` replaces both.

use ::tracing::Level;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Target the event feed writes under.
pub const EVENTS_TARGET: &str = "switchboard::events";

const CRATE_TARGETS: &[&str] = &[
    "switchboard",
    "switchboard_core",
    "switchboard_protocol",
    "switchboard_server",
    "switchboard_client",
];

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] ::tracing::subscriber::SetGlobalDefaultError),
}

/// Line format of the log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    #[default]
    Compact,
    /// One JSON object per line, for log shipping from the broker.
    Json,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for the crates' own diagnostics.
    pub level: Level,
    /// Level for mirrored feed events.
    pub events_level: Level,
    pub output_format: TracingOutputFormat,
    pub include_location: bool,
    pub include_timestamp: bool,
}

impl TracingConfig {
    /// Everything at debug, with file and line, no timestamps.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            level: Level::DEBUG,
            events_level: Level::DEBUG,
            output_format: TracingOutputFormat::Compact,
            include_location: true,
            include_timestamp: false,
        }
    }

    /// Broker preset: warnings from the crates, every feed event, timestamped.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            level: Level::WARN,
            events_level: Level::INFO,
            output_format: TracingOutputFormat::Compact,
            include_location: false,
            include_timestamp: true,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Filter used when `RUST_LOG` is unset.
    ///
    /// The events directive is more specific than the `switchboard` one, so it
    /// wins for the feed target.
    pub fn default_directive(&self) -> String {
        let mut directives: Vec<String> = CRATE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.level))
            .collect();
        directives.push(format!("{}={}", EVENTS_TARGET, self.events_level));
        directives.join(",")
    }
}

/// Installs the global subscriber. Call once, at startup.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let layer = fmt::layer()
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_target(true);

    let layer = match (config.output_format, config.include_timestamp) {
        (TracingOutputFormat::Json, _) => layer.json().boxed(),
        (TracingOutputFormat::Compact, true) => layer.compact().boxed(),
        (TracingOutputFormat::Compact, false) => layer.compact().without_time().boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
    ::tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_logs_events_above_crate_level() {
        let config = TracingConfig::daemon();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.events_level, Level::INFO);

        let directive = config.default_directive();
        assert!(directive.contains("switchboard_server=WARN"));
        assert!(directive.ends_with("switchboard::events=INFO"));
        assert!(EnvFilter::try_new(&directive).is_ok());
    }

    #[test]
    fn quiet_client_keeps_debug_events() {
        let config = TracingConfig::cli_debug().with_level(Level::WARN);
        let directive = config.default_directive();
        assert!(directive.starts_with("switchboard=WARN,"));
        assert!(directive.contains("switchboard_client=WARN"));
        assert!(directive.ends_with("switchboard::events=DEBUG"));
    }

    #[test]
    fn json_format_for_log_shipping() {
        let config = TracingConfig::daemon().with_format(TracingOutputFormat::Json);
        assert_eq!(config.output_format, TracingOutputFormat::Json);
        assert!(config.include_timestamp);
    }
}
