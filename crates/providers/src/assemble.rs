//! Tool-call reassembly from streamed fragments.
//!
//! Provider streams deliver tool calls as fragments spread across
//! chunks. The assembler keeps an ordered list of in-progress calls:
//! a fragment whose id matches an existing entry appends to it, an
//! unseen id starts a new entry, and a missing or empty id binds to the
//! most recently added entry. Argument text is accumulated verbatim and
//! is not parsed as JSON here — that happens when the tool is invoked.

use colony_domain::chat::ToolCall;
use colony_domain::stream::ToolCallFragment;

#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    entries: Vec<ToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into the in-progress list.
    pub fn push(&mut self, fragment: ToolCallFragment) {
        let id = fragment.id.as_deref().unwrap_or("");

        let entry = if id.is_empty() {
            self.entries.last_mut()
        } else {
            self.entries.iter_mut().find(|e| e.id == id)
        };

        match entry {
            Some(entry) => {
                entry.name.push_str(&fragment.name);
                entry.arguments.push_str(&fragment.arguments);
            }
            None => self.entries.push(ToolCall {
                id: id.to_string(),
                name: fragment.name,
                arguments: fragment.arguments,
            }),
        }
    }

    /// Whether any fragments have been seen.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Emit the fully assembled calls in arrival order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.entries
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
