//! Assembly: construct and wire every subsystem into an [`AppState`].
//!
//! Startup order matters only in that everything must be registered
//! before the required-ability check runs and the listener binds:
//! bus → ledger → model layer → transport → task manager.

use std::sync::Arc;

use anyhow::Context;

use colony_bus::Bus;
use colony_domain::config::Config;
use colony_ledger::{register_ledger, NullLedger};
use colony_providers::{register_model_layer, ModelLayer};
use colony_tasks::register_task_manager;

use crate::shell::register_shell;
use crate::state::AppState;
use crate::subscribers::SubscriberTable;

/// Ability ids that must be present before the gateway accepts traffic.
pub const REQUIRED_ABILITIES: [&str; 12] = [
    "task:spawn",
    "task:send",
    "model:llm",
    "model:listLLM",
    "shell:send",
    "ldg:task:save",
    "ldg:task:get",
    "ldg:task:query",
    "ldg:call:save",
    "ldg:call:list",
    "ldg:msg:save",
    "ldg:msg:list",
];

/// Boot the full runtime from configuration.
pub fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let layer =
        ModelLayer::from_config(&config.models).context("initializing LLM providers")?;
    build_state_with_layer(config, layer)
}

/// Boot the runtime with a caller-supplied provider table (tests and
/// embedders bring scripted adapters this way).
pub fn build_state_with_layer(
    config: Arc<Config>,
    layer: ModelLayer,
) -> anyhow::Result<AppState> {
    // ── Bus ──────────────────────────────────────────────────────────
    let bus = Bus::new().context("creating the capability bus")?;
    tracing::info!("capability bus ready");

    // ── Ledger (stub) ────────────────────────────────────────────────
    register_ledger(&bus, Arc::new(NullLedger)).context("registering ledger abilities")?;
    tracing::info!("ledger stub registered");

    // ── Model layer ──────────────────────────────────────────────────
    if layer.is_empty() {
        tracing::warn!("no LLM providers configured — tasks will fail until one is added");
    } else {
        tracing::info!(providers = layer.len(), "model layer ready");
    }
    register_model_layer(&bus, layer).context("registering model abilities")?;

    // ── Transport ────────────────────────────────────────────────────
    let subscribers = Arc::new(SubscriberTable::new());
    register_shell(&bus, subscribers.clone()).context("registering shell:send")?;
    tracing::info!("transport subscriber table ready");

    // ── Task manager ─────────────────────────────────────────────────
    let tasks = register_task_manager(&bus).context("registering task abilities")?;
    tracing::info!("task manager ready");

    verify_required_abilities(&bus)?;

    Ok(AppState {
        config,
        bus,
        subscribers,
        tasks,
    })
}

/// Fail startup when any required ability is missing from the bus.
fn verify_required_abilities(bus: &Bus) -> anyhow::Result<()> {
    let missing: Vec<&str> = REQUIRED_ABILITIES
        .iter()
        .copied()
        .filter(|id| !bus.has(id))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("required abilities missing from the bus: {}", missing.join(", "));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_config_boots_with_all_required_abilities() {
        let state = build_state(Arc::new(Config::default())).unwrap();
        for id in REQUIRED_ABILITIES {
            assert!(state.bus.has(id), "missing {id}");
        }
    }

    #[tokio::test]
    async fn bus_introspection_sees_every_module() {
        let state = build_state(Arc::new(Config::default())).unwrap();
        let listed = state
            .bus
            .invoke_value(
                "bus:list",
                "c1",
                colony_domain::ability::SYSTEM_CALLER,
                &serde_json::json!({}),
            )
            .await
            .into_value()
            .unwrap();
        let modules: Vec<&str> = listed["modules"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|m| m["module"].as_str())
            .collect();
        for module in ["bus", "ldg", "model", "shell", "task"] {
            assert!(modules.contains(&module), "missing module {module}");
        }
    }
}
