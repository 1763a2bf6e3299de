//! Middleware configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration for the interceptors and the outbound wrapper.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Subscriber settings used by [`crate::observability::init_tracing`].
    pub logging: LoggingConfig,
    /// Defaults applied to outbound calls.
    pub outbound: OutboundConfig,
}

impl MiddlewareConfig {
    /// Checks values that deserialize fine but make no sense at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()?;
        self.outbound.validate()
    }
}

/// Log subscriber settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter directive when `RUST_LOG` is unset (e.g. `"info"`).
    pub level: String,
    /// Emit one JSON object per record instead of compact text.
    pub json: bool,
    /// Attach source file and line to each record.
    pub include_source: bool,
    /// JSON only: name the level key `severity` and spell `WARN` as
    /// `WARNING`, as Cloud Logging expects.
    pub severity_key: bool,
    /// JSON only: omit the source location of records whose file path
    /// contains any of these entries.
    pub skip_source: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            include_source: false,
            severity_key: false,
            skip_source: Vec::new(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::EmptyLogLevel);
        }
        Ok(())
    }
}

/// Outbound call defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Deadline applied to outbound calls that do not set their own.
    /// `None` leaves calls unbounded.
    pub default_deadline_ms: Option<u64>,
}

impl OutboundConfig {
    #[must_use]
    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_deadline_ms == Some(0) {
            return Err(ConfigError::ZeroDeadline);
        }
        Ok(())
    }
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("logging.level must not be empty")]
    EmptyLogLevel,
    #[error("outbound.default_deadline_ms must be greater than zero")]
    ZeroDeadline,
}
