mod coordinator;
mod execution;
mod node;
mod observability;
mod server;

pub use coordinator::*;
pub use execution::*;
pub use node::*;
pub use observability::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeIdentityConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a config from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load the config at `path`.  A missing file yields all defaults so a
    /// node can start with zero configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.node.id.trim().is_empty() {
            errors.push(ConfigError::error("node.id", "node id must not be empty"));
        }

        if self.server.port == 0 {
            errors.push(ConfigError::error(
                "server.port",
                "port must be greater than 0",
            ));
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        let has_coordinator = self
            .coordinator
            .url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());

        // Detached executions report their outcome to the coordinator; with
        // no coordinator there is nowhere to send it.
        if self.execution.enable_async && !has_coordinator {
            errors.push(ConfigError::error(
                "execution.enable_async",
                "detached execution requires coordinator.url (set it, or set enable_async = false)",
            ));
        }

        if !has_coordinator {
            errors.push(ConfigError::warning(
                "coordinator.url",
                "no coordinator configured; the node will not register and runs standalone",
            ));
        }

        if self.execution.max_status_retries == 0 {
            errors.push(ConfigError::error(
                "execution.max_status_retries",
                "must allow at least one delivery attempt",
            ));
        }

        if self.execution.initial_retry_delay_ms == 0 {
            errors.push(ConfigError::error(
                "execution.initial_retry_delay_ms",
                "retry delay must be greater than 0",
            ));
        }

        if self.execution.max_retry_delay_ms == 0 {
            errors.push(ConfigError::error(
                "execution.max_retry_delay_ms",
                "retry delay cap must be greater than 0",
            ));
        } else if self.execution.max_retry_delay_ms < self.execution.initial_retry_delay_ms {
            errors.push(ConfigError::warning(
                "execution.max_retry_delay_ms",
                "smaller than initial_retry_delay_ms; every retry waits max_retry_delay_ms",
            ));
        }

        if self.execution.retry_backoff_factor < 1.0 {
            errors.push(ConfigError::error(
                "execution.retry_backoff_factor",
                "factor below 1.0 would shrink successive retry delays",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "must be between 0.0 and 1.0",
            ));
        }

        errors
    }

    /// `true` when [`validate`](Self::validate) reports no hard errors.
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|e| e.severity != ConfigSeverity::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
