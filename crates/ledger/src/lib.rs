//! The persistence contract for tasks, calls and messages, plus the
//! no-op implementation the runtime ships with.
//!
//! The core depends only on the [`Ledger`] trait: any write succeeds,
//! any read returns what was previously written (or nothing). Real
//! implementations must preserve per-task message ordering and be
//! durable across the `save_message` return; [`NullLedger`] satisfies
//! the contract trivially by remembering nothing.

mod abilities;

pub use abilities::register_ledger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use colony_domain::error::Result;
use colony_domain::message::TaskMessage;
use colony_domain::task::{CallRecord, Task};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filters for [`Ledger::query_tasks`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    #[serde(default)]
    pub completion_status: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn d_limit() -> usize {
    100
}

/// Persistence boundary for the runtime.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn save_task(&self, task: &Task) -> Result<()>;
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;
    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>>;

    async fn save_call(&self, call: &CallRecord) -> Result<()>;
    async fn list_calls(&self, task_id: &str) -> Result<Vec<CallRecord>>;

    /// Append a message; returns the assigned message id. The log is
    /// append-only — saved messages are never mutated.
    async fn save_message(&self, message: &TaskMessage) -> Result<String>;
    async fn list_messages(
        &self,
        task_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskMessage>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Null implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accepts every write, returns nothing on reads, and echoes the id on
/// message save.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLedger;

#[async_trait]
impl Ledger for NullLedger {
    async fn save_task(&self, _task: &Task) -> Result<()> {
        Ok(())
    }

    async fn get_task(&self, _task_id: &str) -> Result<Option<Task>> {
        Ok(None)
    }

    async fn query_tasks(&self, _query: &TaskQuery) -> Result<Vec<Task>> {
        Ok(Vec::new())
    }

    async fn save_call(&self, _call: &CallRecord) -> Result<()> {
        Ok(())
    }

    async fn list_calls(&self, _task_id: &str) -> Result<Vec<CallRecord>> {
        Ok(Vec::new())
    }

    async fn save_message(&self, message: &TaskMessage) -> Result<String> {
        Ok(message.id.clone())
    }

    async fn list_messages(
        &self,
        _task_id: &str,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<TaskMessage>> {
        Ok(Vec::new())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
