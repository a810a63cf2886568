//! Tool-catalog derivation.
//!
//! Before each LLM call the run-loop rebuilds the tool list from the
//! bus's own introspection abilities, so capabilities registered
//! mid-task become available on the next iteration. The `bus` and
//! `shell` modules are never exposed as tools.
//!
//! Tool names replace the first colon of the ability id with an
//! underscore. Module names cannot contain underscores (enforced at
//! registration), so mapping the first underscore back to a colon is
//! unambiguous even for ids whose name part contains underscores.

use serde_json::json;

use colony_bus::Bus;
use colony_domain::chat::ToolDefinition;

/// Modules that are plumbing, not tools.
const HIDDEN_MODULES: [&str; 2] = ["bus", "shell"];

/// `task:spawn` → `task_spawn`.
pub fn ability_to_tool_name(ability_id: &str) -> String {
    ability_id.replacen(':', "_", 1)
}

/// `task_spawn` → `task:spawn`.
pub fn tool_to_ability_name(tool_name: &str) -> String {
    tool_name.replacen('_', ":", 1)
}

/// Build the tool definitions for one run-loop iteration.
///
/// Issues `bus:list`, then `bus:abilities` + `bus:schema` per visible
/// module, all attributed to `caller_id`.
pub async fn build_tool_catalog(
    bus: &Bus,
    caller_id: &str,
) -> Result<Vec<ToolDefinition>, String> {
    let listed = bus
        .invoke_value(
            "bus:list",
            &uuid::Uuid::new_v4().to_string(),
            caller_id,
            &json!({}),
        )
        .await;
    let listed = listed
        .into_value()
        .ok_or_else(|| "bus:list failed".to_string())?;

    let mut tools = Vec::new();

    let modules = listed["modules"].as_array().cloned().unwrap_or_default();
    for module in modules {
        let module_name = module["module"].as_str().unwrap_or_default();
        if HIDDEN_MODULES.contains(&module_name) {
            continue;
        }

        let abilities = bus
            .invoke_value(
                "bus:abilities",
                &uuid::Uuid::new_v4().to_string(),
                caller_id,
                &json!({ "module": module_name }),
            )
            .await;
        let abilities = abilities
            .into_value()
            .ok_or_else(|| format!("bus:abilities failed for module '{module_name}'"))?;

        for ability in abilities["abilities"].as_array().cloned().unwrap_or_default() {
            let id = ability["id"].as_str().unwrap_or_default();
            let description = ability["description"].as_str().unwrap_or_default();

            let schema = bus
                .invoke_value(
                    "bus:schema",
                    &uuid::Uuid::new_v4().to_string(),
                    caller_id,
                    &json!({ "id": id }),
                )
                .await;
            let schema = schema
                .into_value()
                .ok_or_else(|| format!("bus:schema failed for '{id}'"))?;

            tools.push(ToolDefinition {
                name: ability_to_tool_name(id),
                description: description.to_string(),
                parameters: schema["input"].clone(),
            });
        }
    }

    Ok(tools)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
