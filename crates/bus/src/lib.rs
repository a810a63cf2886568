//! The capability bus: a typed registry and dispatcher for abilities.
//!
//! Every component-to-component call in Colony passes through here.
//! `invoke` parses the text-form input, validates it against the
//! registered input schema, dispatches to the handler, and appends one
//! call-log entry per invocation. Handlers may re-enter the bus freely;
//! no lock is ever held across a handler await.

mod handler;
mod introspect;

pub use handler::{handler_fn, typed_handler_fn, AbilityHandler, CallContext, HandlerResult};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use jsonschema::{Draft, JSONSchema};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use colony_domain::ability::{
    AbilityDescriptor, AbilityError, CallEntry, InvokeOutcome, OutcomeTag,
};
use colony_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
struct Registered {
    descriptor: Arc<AbilityDescriptor>,
    input_schema: Arc<JSONSchema>,
    handler: Arc<dyn AbilityHandler>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The in-process capability registry and dispatcher.
pub struct Bus {
    registry: RwLock<HashMap<String, Registered>>,
    /// Unbounded in-memory call log; one entry per `invoke`.
    call_log: Mutex<Vec<CallEntry>>,
}

impl Bus {
    /// Create a bus with its own `bus:*` introspection abilities installed.
    pub fn new() -> Result<Arc<Self>> {
        let bus = Arc::new(Self {
            registry: RwLock::new(HashMap::new()),
            call_log: Mutex::new(Vec::new()),
        });
        introspect::register(&bus)?;
        Ok(bus)
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register an ability. Fails if the id is already taken or the
    /// input schema does not compile.
    pub fn register(
        &self,
        descriptor: AbilityDescriptor,
        handler: Arc<dyn AbilityHandler>,
    ) -> Result<()> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&descriptor.input_schema)
            .map_err(|e| Error::Schema(format!("{}: {e}", descriptor.id)))?;

        let mut registry = self.registry.write();
        if registry.contains_key(&descriptor.id) {
            return Err(Error::Other(format!(
                "ability '{}' is already registered",
                descriptor.id
            )));
        }
        tracing::debug!(ability = %descriptor.id, "ability registered");
        registry.insert(
            descriptor.id.clone(),
            Registered {
                descriptor: Arc::new(descriptor),
                input_schema: Arc::new(compiled),
                handler,
            },
        );
        Ok(())
    }

    /// Remove an ability. Idempotent: unknown ids are ignored.
    pub fn unregister(&self, id: &str) {
        if self.registry.write().remove(id).is_some() {
            tracing::debug!(ability = %id, "ability unregistered");
        }
    }

    /// Whether an ability id is currently registered.
    pub fn has(&self, id: &str) -> bool {
        self.registry.read().contains_key(id)
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Dispatch one call.
    ///
    /// `raw_input` is the text wire form (JSON). The outcome envelope
    /// distinguishes handler domain errors from the three bus-produced
    /// failure categories; exactly one call-log entry is appended either
    /// way.
    pub async fn invoke(
        &self,
        ability_id: &str,
        call_id: &str,
        caller_id: &str,
        raw_input: &str,
    ) -> InvokeOutcome {
        let started_at = chrono::Utc::now();
        let clock = Instant::now();

        // Clone the entry out so no lock spans the handler call.
        let entry = self.registry.read().get(ability_id).cloned();
        let Some(entry) = entry else {
            let outcome = InvokeOutcome::InvalidAbility {
                message: format!("ability '{ability_id}' is not registered"),
            };
            self.finalize(caller_id, ability_id, started_at, clock, &outcome);
            return outcome;
        };

        let input: Value = match serde_json::from_str(raw_input) {
            Ok(v) => v,
            Err(e) => {
                let outcome = InvokeOutcome::InvalidInput {
                    message: format!("input is not valid JSON: {e}"),
                };
                self.finalize(caller_id, ability_id, started_at, clock, &outcome);
                return outcome;
            }
        };

        if let Err(errors) = entry.input_schema.validate(&input) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let outcome = InvokeOutcome::InvalidInput {
                message: format!("input does not match schema: {detail}"),
            };
            self.finalize(caller_id, ability_id, started_at, clock, &outcome);
            return outcome;
        }

        let call = CallContext {
            call_id: call_id.to_string(),
            caller_id: caller_id.to_string(),
        };
        let outcome = match entry.handler.handle(call, input).await {
            Ok(value) => InvokeOutcome::Success { value },
            Err(AbilityError::Domain(message)) => InvokeOutcome::Error { message },
            Err(AbilityError::Failure(message)) => InvokeOutcome::UnknownFailure { message },
        };

        self.finalize(caller_id, ability_id, started_at, clock, &outcome);
        outcome
    }

    /// [`Bus::invoke`] for callers that already hold a JSON value: the
    /// value is put on the text wire, keeping every call loggable.
    pub async fn invoke_value(
        &self,
        ability_id: &str,
        call_id: &str,
        caller_id: &str,
        input: &Value,
    ) -> InvokeOutcome {
        self.invoke(ability_id, call_id, caller_id, &input.to_string())
            .await
    }

    fn finalize(
        &self,
        caller_id: &str,
        ability_id: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        clock: Instant,
        outcome: &InvokeOutcome,
    ) {
        let tag = outcome.tag();
        let error = outcome.failure_message().map(String::from);
        if tag != OutcomeTag::Success && tag != OutcomeTag::Error {
            tracing::warn!(
                caller = %caller_id,
                ability = %ability_id,
                outcome = ?tag,
                error = error.as_deref().unwrap_or(""),
                "bus call failed"
            );
        }
        self.call_log.lock().push(CallEntry {
            caller_id: caller_id.to_string(),
            ability_id: ability_id.to_string(),
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            outcome: tag,
            error,
        });
    }

    // ── Introspection support ──────────────────────────────────────

    /// Registered modules with their ability counts, sorted by name.
    pub fn modules(&self) -> Vec<(String, usize)> {
        let registry = self.registry.read();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in registry.values() {
            *counts.entry(entry.descriptor.module.as_str()).or_default() += 1;
        }
        let mut out: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(m, n)| (m.to_string(), n))
            .collect();
        out.sort();
        out
    }

    /// Descriptors of one module, sorted by id.
    pub fn abilities_of(&self, module: &str) -> Vec<Arc<AbilityDescriptor>> {
        let registry = self.registry.read();
        let mut out: Vec<Arc<AbilityDescriptor>> = registry
            .values()
            .filter(|e| e.descriptor.module == module)
            .map(|e| e.descriptor.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// The descriptor for one ability id.
    pub fn descriptor(&self, id: &str) -> Option<Arc<AbilityDescriptor>> {
        self.registry.read().get(id).map(|e| e.descriptor.clone())
    }

    // ── Call log ───────────────────────────────────────────────────

    /// Snapshot of the call log.
    pub fn call_log(&self) -> Vec<CallEntry> {
        self.call_log.lock().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use colony_domain::ability::SYSTEM_CALLER;
    use serde_json::json;

    fn echo_descriptor(id: &str) -> AbilityDescriptor {
        AbilityDescriptor::new(
            id,
            "Echo the given text back",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } }
            }),
        )
        .unwrap()
    }

    fn echo_handler() -> Arc<dyn AbilityHandler> {
        handler_fn(|_call, input| async move {
            Ok(json!({ "text": input["text"] }))
        })
    }

    async fn invoke(bus: &Bus, id: &str, raw: &str) -> InvokeOutcome {
        bus.invoke(id, "call-1", SYSTEM_CALLER, raw).await
    }

    #[tokio::test]
    async fn invoke_success_round_trip() {
        let bus = Bus::new().unwrap();
        bus.register(echo_descriptor("test:echo"), echo_handler())
            .unwrap();

        let outcome = invoke(&bus, "test:echo", r#"{"text":"hi"}"#).await;
        assert_eq!(outcome.tag(), OutcomeTag::Success);
        assert_eq!(outcome.into_value().unwrap()["text"], "hi");
    }

    #[tokio::test]
    async fn unknown_ability_is_invalid_ability() {
        let bus = Bus::new().unwrap();
        let outcome = invoke(&bus, "test:missing", "{}").await;
        assert_eq!(outcome.tag(), OutcomeTag::InvalidAbility);
    }

    #[tokio::test]
    async fn bad_json_is_invalid_input() {
        let bus = Bus::new().unwrap();
        bus.register(echo_descriptor("test:echo"), echo_handler())
            .unwrap();
        let outcome = invoke(&bus, "test:echo", "{not json").await;
        assert_eq!(outcome.tag(), OutcomeTag::InvalidInput);
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_input() {
        let bus = Bus::new().unwrap();
        bus.register(echo_descriptor("test:echo"), echo_handler())
            .unwrap();

        // missing required field
        let outcome = invoke(&bus, "test:echo", "{}").await;
        assert_eq!(outcome.tag(), OutcomeTag::InvalidInput);

        // wrong type
        let outcome = invoke(&bus, "test:echo", r#"{"text":42}"#).await;
        assert_eq!(outcome.tag(), OutcomeTag::InvalidInput);
        assert!(outcome.failure_message().unwrap().contains("schema"));
    }

    #[tokio::test]
    async fn domain_error_maps_to_error_envelope() {
        let bus = Bus::new().unwrap();
        bus.register(
            echo_descriptor("test:grumpy"),
            handler_fn(|_call, _input| async move {
                Err(AbilityError::domain("not today"))
            }),
        )
        .unwrap();

        let outcome = invoke(&bus, "test:grumpy", r#"{"text":"hi"}"#).await;
        assert_eq!(outcome.tag(), OutcomeTag::Error);
        assert_eq!(outcome.failure_message(), Some("not today"));
    }

    #[tokio::test]
    async fn handler_failure_maps_to_unknown_failure() {
        let bus = Bus::new().unwrap();
        bus.register(
            echo_descriptor("test:broken"),
            handler_fn(|_call, _input| async move {
                Err(AbilityError::failure("wires crossed"))
            }),
        )
        .unwrap();

        let outcome = invoke(&bus, "test:broken", r#"{"text":"hi"}"#).await;
        assert_eq!(outcome.tag(), OutcomeTag::UnknownFailure);
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let bus = Bus::new().unwrap();
        bus.register(echo_descriptor("test:echo"), echo_handler())
            .unwrap();
        assert!(bus
            .register(echo_descriptor("test:echo"), echo_handler())
            .is_err());
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_frees_the_id() {
        let bus = Bus::new().unwrap();
        bus.register(echo_descriptor("test:echo"), echo_handler())
            .unwrap();
        assert!(bus.has("test:echo"));

        bus.unregister("test:echo");
        bus.unregister("test:echo"); // second time is a no-op
        assert!(!bus.has("test:echo"));

        // A fresh registration under the freed id succeeds.
        bus.register(echo_descriptor("test:echo"), echo_handler())
            .unwrap();
        assert!(bus.has("test:echo"));
    }

    #[tokio::test]
    async fn every_invoke_appends_exactly_one_log_entry() {
        let bus = Bus::new().unwrap();
        bus.register(echo_descriptor("test:echo"), echo_handler())
            .unwrap();
        bus.register(
            echo_descriptor("test:grumpy"),
            handler_fn(|_c, _i| async move { Err(AbilityError::domain("no")) }),
        )
        .unwrap();

        let calls: Vec<(&str, &str, OutcomeTag)> = vec![
            ("test:echo", r#"{"text":"a"}"#, OutcomeTag::Success),
            ("test:grumpy", r#"{"text":"b"}"#, OutcomeTag::Error),
            ("test:missing", "{}", OutcomeTag::InvalidAbility),
            ("test:echo", "{broken", OutcomeTag::InvalidInput),
        ];
        for (id, raw, _) in &calls {
            invoke(&bus, id, raw).await;
        }

        let log = bus.call_log();
        assert_eq!(log.len(), calls.len());
        for (entry, (id, _, expected)) in log.iter().zip(&calls) {
            assert_eq!(&entry.ability_id, id);
            assert_eq!(entry.outcome, *expected);
            assert_eq!(entry.caller_id, SYSTEM_CALLER);
            if *expected == OutcomeTag::Success {
                assert!(entry.error.is_none());
            } else {
                assert!(entry.error.is_some());
            }
        }
    }

    #[tokio::test]
    async fn bad_input_schema_is_a_registration_error() {
        let bus = Bus::new().unwrap();
        let descriptor = AbilityDescriptor::new(
            "test:odd",
            "Schema that does not compile",
            json!({ "type": 42 }),
            json!({}),
        )
        .unwrap();
        assert!(bus.register(descriptor, echo_handler()).is_err());
    }

    #[tokio::test]
    async fn typed_handler_deserializes_and_serializes() {
        #[derive(serde::Deserialize)]
        struct In {
            text: String,
        }
        #[derive(serde::Serialize)]
        struct Out {
            shouted: String,
        }

        let bus = Bus::new().unwrap();
        bus.register(
            echo_descriptor("test:shout"),
            typed_handler_fn(|_call, input: In| async move {
                Ok(Out {
                    shouted: input.text.to_uppercase(),
                })
            }),
        )
        .unwrap();

        let outcome = invoke(&bus, "test:shout", r#"{"text":"hi"}"#).await;
        assert_eq!(outcome.into_value().unwrap()["shouted"], "HI");
    }

    #[tokio::test]
    async fn handlers_can_reenter_the_bus() {
        let bus = Bus::new().unwrap();
        let weak = Arc::downgrade(&bus);
        bus.register(
            echo_descriptor("test:nested"),
            handler_fn(move |call, _input| {
                let weak = weak.clone();
                async move {
                    let bus = weak.upgrade().expect("bus alive");
                    let inner = bus
                        .invoke_value("bus:list", &call.call_id, &call.caller_id, &json!({}))
                        .await;
                    inner
                        .into_value()
                        .ok_or_else(|| AbilityError::failure("nested call failed"))
                }
            }),
        )
        .unwrap();

        let outcome = invoke(&bus, "test:nested", r#"{"text":"x"}"#).await;
        assert_eq!(outcome.tag(), OutcomeTag::Success);
        // Both the outer and inner invocation were logged.
        assert_eq!(bus.call_log().len(), 2);
    }
}
