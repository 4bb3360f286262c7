//! Notification seam between the orchestrator and presentation layers.
//!
//! Every [`ChatObserver`] method has an empty default, so observers only
//! implement what they care about. Callbacks run synchronously on the task
//! that produced the event and are never invoked while the orchestrator
//! holds one of its locks.

use crate::pipeline::messages::Message;
use crate::pipeline::session::SessionEndReason;
use crate::pipeline::state::ChatState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Receives orchestrator events.
#[allow(unused_variables)]
pub trait ChatObserver: Send + Sync {
    fn on_session_start(&self, stream_idx: u64) {}
    fn on_session_end(&self, stream_idx: u64, reason: SessionEndReason) {}
    fn on_state_change(&self, next: ChatState, prev: ChatState) {}
    /// Raw assistant text as it arrives, before debouncing.
    fn on_assistant_delta(&self, delta: &str) {}
    /// The assistant message of the current turn, as flushed so far.
    fn on_assistant_flush(&self, text: &str) {}
    /// The user utterance of the current turn.
    fn on_user_message(&self, text: &str) {}
    /// The durable history changed.
    fn on_chat_log(&self, messages: &[Message]) {}
    fn on_processing_change(&self, processing: bool) {}
    fn on_speaking_change(&self, speaking: bool) {}
    fn on_thought(&self, thinking: bool, text: &str) {}
    fn on_interrupt(&self, stream_idx: u64) {}
    fn on_error(&self, message: &str) {}
}

/// Registration token returned by [`ObserverSet::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered set of observers.
#[derive(Default)]
pub struct ObserverSet {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn ChatObserver>)>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn ChatObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke `f` on every observer in registration order.
    ///
    /// The list is copied first, so observers may add or remove observers
    /// from inside a callback.
    pub fn notify(&self, f: impl Fn(&dyn ChatObserver)) {
        let observers: Vec<Arc<dyn ChatObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            f(observer.as_ref());
        }
    }
}
