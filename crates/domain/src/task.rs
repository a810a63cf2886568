use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An independently advancing agent context.
///
/// `completion_status` is `None` while the task is in progress and a
/// terminal string once set (`"success"`, `"cancelled"`, `"failed: …"`).
/// Once set it is never unset; `updated_at >= created_at` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<String>,
    pub system_prompt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(parent_task_id: Option<String>, system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_task_id,
            completion_status: None,
            system_prompt: system_prompt.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.completion_status.is_some()
    }
}

/// Lifecycle of a recorded tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Tool-invocation record for the ledger contract. The stub ledger stores
/// nothing, so only real ledger implementations enforce its invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub task_id: String,
    pub ability_name: String,
    /// Opaque to the core; whatever the caller supplied.
    pub parameters: Value,
    pub status: CallStatus,
    pub details: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub start_message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_message_id: Option<String>,
}
