//! Backend selection strategies and router options.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::foundation::error::ConfigurationError;

/// Default timeout applied to calls that do not set their own.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How the router picks a backend when a call names no explicit target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Prefer the configured default backend, else the first connected one
    /// in registration order.
    #[default]
    FixedPriority,
    /// Rotate through connected backends in registration order.
    RoundRobin,
    /// Reserved for richer selection criteria; currently behaves like
    /// [`FixedPriority`](Self::FixedPriority).
    CapabilityBased,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedPriority => "fixed-priority",
            Self::RoundRobin => "round-robin",
            Self::CapabilityBased => "capability-based",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "fixed-priority" | "fixed" | "priority" => Ok(Self::FixedPriority),
            "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "capability-based" | "capability" => Ok(Self::CapabilityBased),
            _ => Err(ConfigurationError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Construction-time options of a [`DispatchRouter`](super::DispatchRouter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterOptions {
    pub strategy: SelectionStrategy,
    /// Backend preferred by the fixed-priority strategy.
    pub default_backend: Option<String>,
    /// Timeout applied when [`CallOptions`](super::CallOptions) sets none.
    pub call_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            default_backend: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RouterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn default_backend(mut self, name: impl Into<String>) -> Self {
        self.default_backend = Some(name.into());
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategy_names() {
        assert_eq!(
            "round-robin".parse::<SelectionStrategy>(),
            Ok(SelectionStrategy::RoundRobin)
        );
        assert_eq!(
            "Fixed_Priority".parse::<SelectionStrategy>(),
            Ok(SelectionStrategy::FixedPriority)
        );
        assert_eq!(
            "capability".parse::<SelectionStrategy>(),
            Ok(SelectionStrategy::CapabilityBased)
        );
        assert_eq!(
            "random".parse::<SelectionStrategy>(),
            Err(ConfigurationError::UnknownStrategy("random".into()))
        );
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&SelectionStrategy::RoundRobin).unwrap();
        assert_eq!(json, "\"round-robin\"");
        let back: SelectionStrategy = serde_json::from_str("\"capability-based\"").unwrap();
        assert_eq!(back, SelectionStrategy::CapabilityBased);
    }

    #[test]
    fn options_builder() {
        let opts = RouterOptions::new()
            .strategy(SelectionStrategy::RoundRobin)
            .default_backend("p1")
            .call_timeout(Duration::from_millis(50));
        assert_eq!(opts.default_backend.as_deref(), Some("p1"));
        assert_eq!(opts.call_timeout, Duration::from_millis(50));
    }
}
