//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use braid_core::{ConfigurationError, EventDeduplicator, RouterOptions, SelectionStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BraidConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Outbound call routing.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Inbound duplicate suppression.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Free-form per-component sections, keyed by component name.
    #[serde(default)]
    pub components: HashMap<String, Value>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to compact otherwise.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation policy for file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle transitions are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids in each line.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in each line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module level overrides, e.g. `braid_core::integration = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

// =============================================================================
// Dispatch
// =============================================================================

/// Outbound call routing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// `fixed-priority`, `round-robin` or `capability-based`.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Backend preferred by the fixed-priority strategy.
    #[serde(default)]
    pub default_backend: Option<String>,

    /// Timeout for calls that do not set their own, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            default_backend: None,
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Converts to the router's construction options.
    pub fn router_options(&self) -> Result<RouterOptions, ConfigurationError> {
        let strategy: SelectionStrategy = self.strategy.parse()?;
        let mut options = RouterOptions::new()
            .strategy(strategy)
            .call_timeout(self.call_timeout());
        if let Some(name) = &self.default_backend {
            options = options.default_backend(name.clone());
        }
        Ok(options)
    }
}

fn default_strategy() -> String {
    SelectionStrategy::default().as_str().to_string()
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

// =============================================================================
// Dedup
// =============================================================================

/// Duplicate suppression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Events with the same fingerprint inside this window are dropped.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Leading content characters that take part in content fingerprints.
    #[serde(default = "default_content_prefix_len")]
    pub content_prefix_len: usize,

    /// Run the background sweeper while the runtime is started.
    #[serde(default = "default_sweep")]
    pub sweep: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            content_prefix_len: default_content_prefix_len(),
            sweep: default_sweep(),
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn deduplicator(&self) -> EventDeduplicator {
        EventDeduplicator::new(self.window()).with_content_prefix(self.content_prefix_len)
    }
}

fn default_window_ms() -> u64 {
    5_000
}

fn default_content_prefix_len() -> usize {
    64
}

fn default_sweep() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_yields_defaults() {
        let config: BraidConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.dispatch.strategy, "fixed-priority");
        assert_eq!(config.dispatch.call_timeout_ms, 30_000);
        assert_eq!(config.dedup.window_ms, 5_000);
        assert_eq!(config.dedup.content_prefix_len, 64);
        assert!(config.dedup.sweep);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.components.is_empty());
    }

    #[test]
    fn router_options_follow_dispatch_section() {
        let dispatch: DispatchConfig = serde_json::from_value(json!({
            "strategy": "round-robin",
            "default_backend": "p2",
            "call_timeout_ms": 250
        }))
        .unwrap();

        let options = dispatch.router_options().unwrap();
        assert_eq!(options.strategy, SelectionStrategy::RoundRobin);
        assert_eq!(options.default_backend.as_deref(), Some("p2"));
        assert_eq!(options.call_timeout, Duration::from_millis(250));
    }

    #[test]
    fn unknown_strategy_is_a_configuration_error() {
        let dispatch = DispatchConfig {
            strategy: "random".into(),
            ..Default::default()
        };
        assert_eq!(
            dispatch.router_options(),
            Err(ConfigurationError::UnknownStrategy("random".into()))
        );
    }

    #[test]
    fn component_sections_stay_free_form() {
        let config: BraidConfig = serde_json::from_value(json!({
            "components": {"cache": {"capacity": 128, "tags": ["a", "b"]}},
            "logging": {"level": "debug", "filters": {"braid_core": "trace"}}
        }))
        .unwrap();

        assert_eq!(config.components["cache"]["capacity"], json!(128));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.filters["braid_core"], LogLevel::Trace);
    }
}
