//! Ability descriptors, invocation envelopes, and the bus call log entry.
//!
//! An *ability* is a named, schema-described operation invokable through
//! the bus. Ids have the shape `<module>:<name>`; the module part may not
//! contain underscores so that the LLM-facing tool name (first colon
//! replaced by an underscore) maps back to the id without ambiguity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Sentinel caller identity for internal (non-task) invocations.
pub const SYSTEM_CALLER: &str = "system";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The public description of a registered ability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityDescriptor {
    /// Globally unique id, `<module>:<name>`.
    pub id: String,
    pub module: String,
    pub name: String,
    pub description: String,
    /// JSON Schema (draft 7) for the input object.
    pub input_schema: Value,
    /// JSON Schema (draft 7) for the success output.
    pub output_schema: Value,
}

impl AbilityDescriptor {
    /// Build a descriptor, deriving `module` and `name` from the id.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        output_schema: Value,
    ) -> Result<Self> {
        let id = id.into();
        let (module, name) = split_ability_id(&id)?;
        Ok(Self {
            id: id.clone(),
            module: module.to_string(),
            name: name.to_string(),
            description: description.into(),
            input_schema,
            output_schema,
        })
    }
}

/// Split and validate an ability id into `(module, name)`.
///
/// Module: `[a-z][a-z0-9-]*` — underscores are rejected here so the
/// tool-name mapping (`:` ↔ first `_`) stays reversible.
/// Name: `[a-z][a-zA-Z0-9_:-]*` (ledger ids like `task:save` nest a
/// colon; `listLLM`-style camelCase is allowed).
pub fn split_ability_id(id: &str) -> Result<(&str, &str)> {
    let (module, name) = id
        .split_once(':')
        .ok_or_else(|| Error::Other(format!("ability id '{id}' is missing ':'")))?;

    let module_ok = module.starts_with(|c: char| c.is_ascii_lowercase())
        && module
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !module_ok {
        return Err(Error::Other(format!(
            "ability id '{id}': module must match [a-z][a-z0-9-]* (no underscores)"
        )));
    }

    let name_ok = !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':');
    if !name_ok {
        return Err(Error::Other(format!(
            "ability id '{id}': name must match [a-z][a-zA-Z0-9_:-]*"
        )));
    }

    Ok((module, name))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler error and invocation envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Failure returned by an ability handler.
///
/// `Domain` is the expected "ran but cannot fulfill" case and maps to the
/// `error` envelope; everything else maps to `unknown-failure`.
#[derive(Debug, thiserror::Error)]
pub enum AbilityError {
    #[error("{0}")]
    Domain(String),

    #[error("{0}")]
    Failure(String),
}

impl AbilityError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }
}

impl From<serde_json::Error> for AbilityError {
    fn from(e: serde_json::Error) -> Self {
        Self::Failure(format!("JSON: {e}"))
    }
}

/// What `Bus::invoke` hands back to the caller.
///
/// `Error` is a domain error from the handler; the other three failure
/// variants are envelope errors produced by the bus itself.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum InvokeOutcome {
    Success { value: Value },
    Error { message: String },
    InvalidAbility { message: String },
    InvalidInput { message: String },
    UnknownFailure { message: String },
}

impl InvokeOutcome {
    pub fn tag(&self) -> OutcomeTag {
        match self {
            Self::Success { .. } => OutcomeTag::Success,
            Self::Error { .. } => OutcomeTag::Error,
            Self::InvalidAbility { .. } => OutcomeTag::InvalidAbility,
            Self::InvalidInput { .. } => OutcomeTag::InvalidInput,
            Self::UnknownFailure { .. } => OutcomeTag::UnknownFailure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The success payload, if any.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Success { value } => Some(value),
            _ => None,
        }
    }

    /// The failure message, if any.
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Error { message }
            | Self::InvalidAbility { message }
            | Self::InvalidInput { message }
            | Self::UnknownFailure { message } => Some(message),
        }
    }
}

/// The envelope category alone, recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeTag {
    Success,
    Error,
    InvalidAbility,
    InvalidInput,
    UnknownFailure,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry per `invoke`, appended when the call finalizes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEntry {
    pub caller_id: String,
    pub ability_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: OutcomeTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_valid_id() {
        let (module, name) = split_ability_id("task:spawn").unwrap();
        assert_eq!(module, "task");
        assert_eq!(name, "spawn");
    }

    #[test]
    fn split_nested_ledger_id() {
        let (module, name) = split_ability_id("ldg:task:save").unwrap();
        assert_eq!(module, "ldg");
        assert_eq!(name, "task:save");
    }

    #[test]
    fn split_rejects_missing_colon() {
        assert!(split_ability_id("spawn").is_err());
    }

    #[test]
    fn split_rejects_underscore_in_module() {
        assert!(split_ability_id("task_mgr:spawn").is_err());
    }

    #[test]
    fn split_rejects_empty_name() {
        assert!(split_ability_id("task:").is_err());
    }

    #[test]
    fn split_allows_underscore_in_name() {
        let (_, name) = split_ability_id("model:list_llm").unwrap();
        assert_eq!(name, "list_llm");
    }

    #[test]
    fn split_allows_camel_case_name() {
        let (module, name) = split_ability_id("model:listLLM").unwrap();
        assert_eq!(module, "model");
        assert_eq!(name, "listLLM");
    }

    #[test]
    fn descriptor_derives_module_and_name() {
        let d = AbilityDescriptor::new(
            "shell:send",
            "Relay a content chunk to the task's subscriber",
            serde_json::json!({"type": "object"}),
            serde_json::json!({"type": "object"}),
        )
        .unwrap();
        assert_eq!(d.module, "shell");
        assert_eq!(d.name, "send");
    }

    #[test]
    fn outcome_tags_match_variants() {
        let ok = InvokeOutcome::Success {
            value: serde_json::json!({}),
        };
        assert_eq!(ok.tag(), OutcomeTag::Success);
        assert!(ok.is_success());

        let err = InvokeOutcome::Error {
            message: "nope".into(),
        };
        assert_eq!(err.tag(), OutcomeTag::Error);
        assert_eq!(err.failure_message(), Some("nope"));

        let inv = InvokeOutcome::InvalidAbility {
            message: "x".into(),
        };
        assert_eq!(inv.tag(), OutcomeTag::InvalidAbility);
    }
}
