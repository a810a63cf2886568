use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message roles. Tool results are inlined as assistant-role entries whose
/// content carries the ability id and payload, so three roles suffice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// An immutable entry in a task's message log.
///
/// Messages for a task form an ordered sequence by `timestamp`: the system
/// prompt first, the initial goal second, then alternating turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub id: String,
    pub task_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(task_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
