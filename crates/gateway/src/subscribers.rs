//! The process-wide subscriber table: `taskId` → the single active
//! event-stream subscriber.
//!
//! Subscribing to a task that already has a subscriber **replaces** it:
//! the older channel's sender is dropped, which terminates the older
//! HTTP stream. Each subscriber carries a generation number so the
//! replaced stream's teardown cannot evict its successor.
//!
//! Delivery uses a bounded queue (1024 frames). When a slow subscriber
//! cannot drain it, new frames are dropped from the tail — the run-loop
//! is never blocked by a slow reader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Per-subscriber queue depth.
const SUBSCRIBER_QUEUE: usize = 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One event on a task's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Sent once when the stream opens.
    Start { task_id: String },
    /// One content chunk; `index < 0` marks the last chunk of the
    /// message identified by `message_id`.
    Content {
        task_id: String,
        message_id: String,
        index: i64,
        content: String,
    },
    /// Emitted immediately after the `index < 0` chunk.
    MessageComplete { task_id: String, message_id: String },
}

impl StreamFrame {
    /// The SSE `event:` name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Content { .. } => "content",
            Self::MessageComplete { .. } => "message_complete",
        }
    }

    /// The SSE `data:` payload.
    pub fn payload(&self) -> Value {
        match self {
            Self::Start { task_id } => json!({ "taskId": task_id }),
            Self::Content {
                task_id,
                message_id,
                index,
                content,
            } => json!({
                "taskId": task_id,
                "messageId": message_id,
                "index": index,
                "content": content,
            }),
            Self::MessageComplete {
                task_id,
                message_id,
            } => json!({ "taskId": task_id, "messageId": message_id }),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Subscriber {
    tx: mpsc::Sender<StreamFrame>,
    generation: u64,
}

#[derive(Default)]
pub struct SubscriberTable {
    inner: RwLock<HashMap<String, Subscriber>>,
    generations: AtomicU64,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the subscriber for a task, replacing any previous one,
    /// and enqueue the `start` event. Returns the generation token the
    /// stream must present on teardown and the frame receiver.
    pub fn subscribe(&self, task_id: &str) -> (u64, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        // Fresh channel with capacity > 0: this send cannot fail.
        let _ = tx.try_send(StreamFrame::Start {
            task_id: task_id.to_string(),
        });

        let previous = self.inner.write().insert(
            task_id.to_string(),
            Subscriber { tx, generation },
        );
        if previous.is_some() {
            tracing::debug!(task_id, "subscriber replaced; older stream will close");
        }
        (generation, rx)
    }

    /// Remove the entry for a task, but only if it still belongs to the
    /// given generation — a replaced stream's teardown must not evict
    /// its successor.
    pub fn unsubscribe(&self, task_id: &str, generation: u64) {
        let mut inner = self.inner.write();
        if inner
            .get(task_id)
            .is_some_and(|s| s.generation == generation)
        {
            inner.remove(task_id);
        }
    }

    /// Whether a task currently has a subscriber.
    pub fn has_subscriber(&self, task_id: &str) -> bool {
        self.inner.read().contains_key(task_id)
    }

    /// Enqueue a frame for a task's subscriber. Returns `false` when no
    /// (live) subscriber exists. A full queue drops the frame from the
    /// tail rather than blocking the caller.
    pub fn dispatch(&self, task_id: &str, frame: StreamFrame) -> bool {
        let tx = match self.inner.read().get(task_id) {
            Some(subscriber) => subscriber.tx.clone(),
            None => return false,
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(task_id, "subscriber queue full; dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
