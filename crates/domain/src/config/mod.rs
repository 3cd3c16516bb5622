mod agent;
mod llm;
mod memory;
mod observability;
mod server;
mod store;

pub use agent::*;
pub use llm::*;
pub use memory::*;
pub use observability::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
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
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Error, field: field.into(), message: message.into() }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Warning, field: field.into(), message: message.into() }
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
    /// An empty vec means the config is usable as-is.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError::warning("llm.providers", "no LLM providers configured"));
        }
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].id"),
                    "provider id must not be empty",
                ));
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].base_url"),
                    "provider base_url must not be empty",
                ));
            }
            if provider.auth.key.is_some() {
                errors.push(ConfigError::warning(
                    format!("llm.providers[{i}].auth.key"),
                    "plaintext API key in config; prefer auth.env",
                ));
            }
        }

        for (i, backend) in self.llm.backends.iter().enumerate() {
            match self.llm.provider(&backend.provider) {
                None => errors.push(ConfigError::error(
                    format!("llm.backends[{i}].provider"),
                    format!("unknown provider \"{}\"", backend.provider),
                )),
                Some(p) if backend.model.is_none() && p.default_model.is_none() => {
                    errors.push(ConfigError::error(
                        format!("llm.backends[{i}].model"),
                        "no model set and provider has no default_model",
                    ))
                }
                Some(_) => {}
            }
        }
        if self.llm.backend(&self.llm.default_selector).is_none() {
            errors.push(ConfigError::error(
                "llm.default_selector",
                format!("\"{}\" does not name a backend", self.llm.default_selector),
            ));
        }
        if self.llm.max_tool_loops == 0 {
            errors.push(ConfigError::error("llm.max_tool_loops", "must be at least 1"));
        }

        if self.store.kind == StoreKind::Postgrest && self.store.base_url.is_empty() {
            errors.push(ConfigError::error(
                "store.base_url",
                "base_url is required for the postgrest store",
            ));
        }
        if self.memory.enabled && self.memory.base_url.is_empty() {
            errors.push(ConfigError::error("memory.base_url", "base_url must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample_rate must be between 0.0 and 1.0",
            ));
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}
