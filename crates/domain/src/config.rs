//! Startup configuration.
//!
//! Loaded once from a TOML file at boot; there is no hot-reload. The
//! shape mirrors what the gateway consumes: a listen port plus the
//! provider table for the model layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub models: ModelsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            models: ModelsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing config: {e}")))
    }
}

fn d_port() -> u16 {
    3000
}

fn d_host() -> String {
    "127.0.0.1".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    /// Provider configs keyed by the operator-chosen provider name.
    /// A `BTreeMap` so listings iterate in a stable order.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    pub endpoint: String,
    /// API key. Empty means "resolve from the adapter's environment
    /// variable" (`OPENAI_API_KEY` / `ANTHROPIC_API_KEY`).
    #[serde(default)]
    pub api_key: String,
    pub adapter: AdapterKind,
    /// The advertised model list. Authoritative: requests for a model not
    /// listed here are rejected before any network call.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Openai,
    Anthropic,
    /// OpenAI-compatible wire against an operator-supplied endpoint
    /// (vLLM, Ollama, LM Studio, ...).
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(rename = "type")]
    pub kind: ModelKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Llm,
    Embed,
}

impl ProviderConfig {
    /// Advertised model names of the given kind, in config order.
    pub fn models_of(&self, kind: ModelKind) -> Vec<&str> {
        self.models
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.name.as_str())
            .collect()
    }

    /// Whether `(kind, name)` is advertised by this provider.
    pub fn advertises(&self, kind: ModelKind, name: &str) -> bool {
        self.models.iter().any(|m| m.kind == kind && m.name == name)
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
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
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
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.models.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "models.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        for (name, provider) in &self.models.providers {
            let field = |leaf: &str| format!("models.providers.{name}.{leaf}");

            if provider.endpoint.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: field("endpoint"),
                    message: "endpoint must not be empty".into(),
                });
            } else if !provider.endpoint.starts_with("http://")
                && !provider.endpoint.starts_with("https://")
            {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: field("endpoint"),
                    message: format!(
                        "endpoint must start with http:// or https:// (got \"{}\")",
                        provider.endpoint
                    ),
                });
            }

            if provider.models.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: field("models"),
                    message: "provider advertises no models and can never be selected".into(),
                });
            }

            if provider.adapter == AdapterKind::Anthropic
                && provider.models.iter().any(|m| m.kind == ModelKind::Embed)
            {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: field("models"),
                    message: "anthropic adapter does not support embeddings; \
                              embed models here will always fail"
                        .into(),
                });
            }
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
