//! Runtime events emitted by the orchestrator for UI and observability.
//!
//! [`BroadcastObserver`] turns [`ChatObserver`] callbacks into
//! [`RuntimeEvent`]s on a `tokio::sync::broadcast` channel, so consumers in
//! other tasks (a websocket bridge, a status line) can follow the
//! conversation without implementing the observer trait.

use crate::observer::ChatObserver;
use crate::pipeline::messages::Message;
use crate::pipeline::session::SessionEndReason;
use crate::pipeline::state::ChatState;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default channel capacity. Slow receivers lag rather than block the pipeline.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events that describe what the orchestrator is doing "right now".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    SessionStarted {
        stream_idx: u64,
    },
    SessionEnded {
        stream_idx: u64,
        reason: SessionEndReason,
    },
    StateChanged {
        next: ChatState,
        prev: ChatState,
    },
    AssistantDelta {
        text: String,
    },
    AssistantFlush {
        text: String,
    },
    UserMessage {
        text: String,
    },
    /// Full durable history after a change.
    ChatLog {
        messages: Vec<Message>,
    },
    Processing {
        active: bool,
    },
    Speaking {
        active: bool,
    },
    Thought {
        thinking: bool,
        text: String,
    },
    Interrupted {
        stream_idx: u64,
    },
    Error {
        message: String,
    },
}

/// Observer that republishes every callback as a [`RuntimeEvent`].
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl Default for BroadcastObserver {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: RuntimeEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}

impl ChatObserver for BroadcastObserver {
    fn on_session_start(&self, stream_idx: u64) {
        self.send(RuntimeEvent::SessionStarted { stream_idx });
    }

    fn on_session_end(&self, stream_idx: u64, reason: SessionEndReason) {
        self.send(RuntimeEvent::SessionEnded { stream_idx, reason });
    }

    fn on_state_change(&self, next: ChatState, prev: ChatState) {
        self.send(RuntimeEvent::StateChanged { next, prev });
    }

    fn on_assistant_delta(&self, delta: &str) {
        self.send(RuntimeEvent::AssistantDelta {
            text: delta.to_owned(),
        });
    }

    fn on_assistant_flush(&self, text: &str) {
        self.send(RuntimeEvent::AssistantFlush {
            text: text.to_owned(),
        });
    }

    fn on_user_message(&self, text: &str) {
        self.send(RuntimeEvent::UserMessage {
            text: text.to_owned(),
        });
    }

    fn on_chat_log(&self, messages: &[Message]) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        self.send(RuntimeEvent::ChatLog {
            messages: messages.to_vec(),
        });
    }

    fn on_processing_change(&self, processing: bool) {
        self.send(RuntimeEvent::Processing { active: processing });
    }

    fn on_speaking_change(&self, speaking: bool) {
        self.send(RuntimeEvent::Speaking { active: speaking });
    }

    fn on_thought(&self, thinking: bool, text: &str) {
        self.send(RuntimeEvent::Thought {
            thinking,
            text: text.to_owned(),
        });
    }

    fn on_interrupt(&self, stream_idx: u64) {
        self.send(RuntimeEvent::Interrupted { stream_idx });
    }

    fn on_error(&self, message: &str) {
        self.send(RuntimeEvent::Error {
            message: message.to_owned(),
        });
    }
}
