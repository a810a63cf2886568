//! Task lifecycle, inter-task messaging, and the think/act run-loop.
//!
//! The task manager owns all in-memory task state and exposes the
//! `task:*` abilities. Each spawned task drives a run-loop that
//! alternates `model:llm` completions with tool invocations discovered
//! through the bus — the manager itself talks to the ledger, the model
//! layer and the transport exclusively through bus invocations.

pub mod catalog;
mod manager;
mod run_loop;

pub use manager::{register_task_manager, TaskManager, TaskSnapshot};
