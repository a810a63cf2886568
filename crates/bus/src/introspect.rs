//! The bus's own `bus:*` abilities.
//!
//! These four are the only discovery mechanism in the system: the
//! run-loop derives its tool catalog from `bus:list` + `bus:abilities`
//! + `bus:schema` on every iteration, so nothing else may hold a static
//! capability list.

use std::sync::{Arc, Weak};

use serde_json::json;

use colony_domain::ability::{AbilityDescriptor, AbilityError};
use colony_domain::error::Result;

use crate::handler::handler_fn;
use crate::Bus;

fn upgrade(weak: &Weak<Bus>) -> std::result::Result<Arc<Bus>, AbilityError> {
    weak.upgrade()
        .ok_or_else(|| AbilityError::failure("bus has been dropped"))
}

pub(crate) fn register(bus: &Arc<Bus>) -> Result<()> {
    let no_input = json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    });
    let id_input = json!({
        "type": "object",
        "properties": { "id": { "type": "string" } },
        "required": ["id"]
    });

    // ── bus:list ───────────────────────────────────────────────────
    let weak = Arc::downgrade(bus);
    bus.register(
        AbilityDescriptor::new(
            "bus:list",
            "Enumerate registered modules with per-module ability counts",
            no_input.clone(),
            json!({
                "type": "object",
                "properties": {
                    "modules": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "module": { "type": "string" },
                                "abilities": { "type": "integer" }
                            }
                        }
                    }
                }
            }),
        )?,
        handler_fn(move |_call, _input| {
            let weak = weak.clone();
            async move {
                let bus = upgrade(&weak)?;
                let modules: Vec<_> = bus
                    .modules()
                    .into_iter()
                    .map(|(module, abilities)| json!({ "module": module, "abilities": abilities }))
                    .collect();
                Ok(json!({ "modules": modules }))
            }
        }),
    )?;

    // ── bus:abilities ──────────────────────────────────────────────
    let weak = Arc::downgrade(bus);
    bus.register(
        AbilityDescriptor::new(
            "bus:abilities",
            "List id, name and description for every ability of one module",
            json!({
                "type": "object",
                "properties": { "module": { "type": "string" } },
                "required": ["module"]
            }),
            json!({
                "type": "object",
                "properties": {
                    "abilities": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "name": { "type": "string" },
                                "description": { "type": "string" }
                            }
                        }
                    }
                }
            }),
        )?,
        handler_fn(move |_call, input| {
            let weak = weak.clone();
            async move {
                let bus = upgrade(&weak)?;
                let module = input["module"].as_str().unwrap_or_default();
                let abilities = bus.abilities_of(module);
                if abilities.is_empty() {
                    return Err(AbilityError::domain(format!(
                        "no abilities registered for module '{module}'"
                    )));
                }
                let abilities: Vec<_> = abilities
                    .iter()
                    .map(|d| {
                        json!({
                            "id": d.id,
                            "name": d.name,
                            "description": d.description,
                        })
                    })
                    .collect();
                Ok(json!({ "abilities": abilities }))
            }
        }),
    )?;

    // ── bus:schema ─────────────────────────────────────────────────
    let weak = Arc::downgrade(bus);
    bus.register(
        AbilityDescriptor::new(
            "bus:schema",
            "Return the input and output schema for one ability",
            id_input.clone(),
            json!({
                "type": "object",
                "properties": {
                    "input": { "type": "object" },
                    "output": { "type": "object" }
                }
            }),
        )?,
        handler_fn(move |_call, input| {
            let weak = weak.clone();
            async move {
                let bus = upgrade(&weak)?;
                let id = input["id"].as_str().unwrap_or_default();
                let descriptor = bus
                    .descriptor(id)
                    .ok_or_else(|| AbilityError::domain(format!("unknown ability '{id}'")))?;
                Ok(json!({
                    "input": descriptor.input_schema,
                    "output": descriptor.output_schema,
                }))
            }
        }),
    )?;

    // ── bus:inspect ────────────────────────────────────────────────
    let weak = Arc::downgrade(bus);
    bus.register(
        AbilityDescriptor::new(
            "bus:inspect",
            "Return the full descriptor for one ability",
            id_input,
            json!({ "type": "object" }),
        )?,
        handler_fn(move |_call, input| {
            let weak = weak.clone();
            async move {
                let bus = upgrade(&weak)?;
                let id = input["id"].as_str().unwrap_or_default();
                let descriptor = bus
                    .descriptor(id)
                    .ok_or_else(|| AbilityError::domain(format!("unknown ability '{id}'")))?;
                serde_json::to_value(descriptor.as_ref()).map_err(AbilityError::from)
            }
        }),
    )?;

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
