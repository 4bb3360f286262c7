//! Main orchestrator that wires sessions, queues and loops together.
//!
//! ```text
//! send_user_message ─▶ LLM backend ─▶ StreamSession ─▶ TTS queue
//!                                                        │
//!                                          TTS loop ◀────┘
//!                                             │ fetch_audio
//!                                             ▼
//!                                        speak queue ─▶ speak loop ─▶ Avatar
//! ```
//!
//! Every job carries the generation (`stream_idx`) it was created in.
//! [`Chat::interrupt`] bumps the generation; each consumer re-checks it
//! before acting and drops stale work silently.

use crate::alert::{Alert, TracingAlert};
use crate::avatar::{Avatar, NullAvatar};
use crate::backends::echo::EchoLlm;
use crate::backends::{Backends, LlmBackend, PassthroughTransform, VoiceTransform};
use crate::config::{ConfigProvider, keys};
use crate::error::Result;
use crate::observer::{ChatObserver, ObserverId, ObserverSet};
use crate::pipeline::messages::{ImageData, Message, Role, SpeakJob, TtsJob};
use crate::pipeline::queue::AsyncQueue;
use crate::pipeline::segment::{SentenceSegmenter, TextSegmenter};
use crate::pipeline::session::{
    SessionEndReason, SessionHandle, SessionHost, SessionOutcome, SessionTimings, StreamSession,
};
use crate::pipeline::state::{ChatState, StateSignal};
use crate::pipeline::tts::fetch_audio;
use crate::runtime::{BroadcastObserver, RuntimeEvent};
use crate::screenplay::Screenplay;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Debounce interval when `flush_interval_ms` is unset.
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 16;
/// Awake window when `awake_window_secs` is unset.
const DEFAULT_AWAKE_WINDOW_SECS: u64 = 120;

const VISION_DESCRIBE_PROMPT: &str = "Describe this image.";

/// Wraps an image description into a user turn the LLM can answer.
fn vision_turn(description: &str) -> String {
    format!(
        "This is a picture I just took from my webcam (described between [[ and ]] ): \
         [[{description}]] Please respond accordingly and as if it were just sent and \
         as though you can see it."
    )
}

/// Conversation state guarded by one lock.
#[derive(Default)]
struct Shared {
    /// Durable history, oldest first. Never includes the system prompt.
    messages: Vec<Message>,
    /// User text of the current turn, not yet folded into `messages`.
    current_user: String,
    /// Flushed assistant text of the current turn.
    assistant: String,
    /// Assistant text waiting for the next flush.
    pending_assistant: String,
    flush_scheduled: bool,
    /// Bumped on interrupt so scheduled flushes from before it do nothing.
    flush_epoch: u64,
    chat_state: ChatState,
    processing: bool,
    speaking: bool,
    session: Option<(u64, SessionHandle)>,
    awake_at: Option<Instant>,
}

impl Shared {
    /// Move the assistant turn (flushed and pending) into the history.
    fn fold_assistant(&mut self) -> bool {
        self.assistant.push_str(&self.pending_assistant);
        self.pending_assistant.clear();
        self.flush_scheduled = false;
        if self.assistant.is_empty() {
            return false;
        }
        let text = std::mem::take(&mut self.assistant);
        self.messages.push(Message::assistant(text));
        true
    }

    /// Move the user turn into the history.
    fn fold_user(&mut self) -> bool {
        if self.current_user.is_empty() {
            return false;
        }
        let text = std::mem::take(&mut self.current_user);
        self.messages.push(Message::user(text));
        true
    }

    fn assistant_is_empty(&self) -> bool {
        self.assistant.is_empty() && self.pending_assistant.is_empty()
    }
}

struct ChatInner {
    config: Arc<dyn ConfigProvider>,
    backends: Backends,
    avatar: Arc<dyn Avatar>,
    alert: Arc<dyn Alert>,
    rvc: Arc<dyn VoiceTransform>,
    segmenter: Arc<dyn TextSegmenter>,
    observers: ObserverSet,
    events: BroadcastObserver,
    stream_idx: AtomicU64,
    tts_queue: AsyncQueue<TtsJob>,
    speak_queue: AsyncQueue<SpeakJob>,
    shared: Mutex<Shared>,
    loops_started: AtomicBool,
    shutdown: CancellationToken,
}

/// Builder for [`Chat`]. Collaborators default to no-op implementations.
pub struct ChatBuilder {
    config: Arc<dyn ConfigProvider>,
    backends: Backends,
    avatar: Arc<dyn Avatar>,
    alert: Arc<dyn Alert>,
    rvc: Arc<dyn VoiceTransform>,
    segmenter: Arc<dyn TextSegmenter>,
    observers: Vec<Arc<dyn ChatObserver>>,
}

impl ChatBuilder {
    pub fn with_avatar(mut self, avatar: Arc<dyn Avatar>) -> Self {
        self.avatar = avatar;
        self
    }

    pub fn with_alert(mut self, alert: Arc<dyn Alert>) -> Self {
        self.alert = alert;
        self
    }

    /// Voice transform applied when `rvc_enabled` is set.
    pub fn with_voice_transform(mut self, rvc: Arc<dyn VoiceTransform>) -> Self {
        self.rvc = rvc;
        self
    }

    pub fn with_segmenter(mut self, segmenter: Arc<dyn TextSegmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChatObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Chat {
        let observers = ObserverSet::new();
        for observer in self.observers {
            observers.add(observer);
        }
        Chat {
            inner: Arc::new(ChatInner {
                config: self.config,
                backends: self.backends,
                avatar: self.avatar,
                alert: self.alert,
                rvc: self.rvc,
                segmenter: self.segmenter,
                observers,
                events: BroadcastObserver::default(),
                stream_idx: AtomicU64::new(0),
                tts_queue: AsyncQueue::new(),
                speak_queue: AsyncQueue::new(),
                shared: Mutex::new(Shared::default()),
                loops_started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

/// The conversation orchestrator.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Chat {
    inner: Arc<ChatInner>,
}

impl Chat {
    /// Create an orchestrator with default collaborators.
    pub fn new(config: Arc<dyn ConfigProvider>, backends: Backends) -> Self {
        Self::builder(config, backends).build()
    }

    pub fn builder(config: Arc<dyn ConfigProvider>, backends: Backends) -> ChatBuilder {
        ChatBuilder {
            config,
            backends,
            avatar: Arc::new(NullAvatar),
            alert: Arc::new(TracingAlert),
            rvc: Arc::new(PassthroughTransform),
            segmenter: Arc::new(SentenceSegmenter),
            observers: Vec::new(),
        }
    }

    /// Spawn the TTS and speak loops. Later calls do nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.inner.loops_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let chat = self.clone();
        tokio::spawn(async move { chat.run_tts_loop().await });
        let chat = self.clone();
        tokio::spawn(async move { chat.run_speak_loop().await });
        info!("chat loops started");
    }

    /// Stop both loops and abort the live session.
    pub fn shutdown(&self) {
        self.interrupt();
        self.inner.shutdown.cancel();
    }

    /// Current generation.
    pub fn stream_idx(&self) -> u64 {
        self.inner.stream_idx.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, stream_idx: u64) -> bool {
        self.stream_idx() == stream_idx
    }

    pub fn state(&self) -> ChatState {
        self.lock().chat_state
    }

    /// Durable history (excluding the turn in progress).
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Whether the assistant spoke within the configured awake window.
    pub fn is_awake(&self) -> bool {
        let window = Duration::from_secs(
            self.inner
                .config
                .u64_value(keys::AWAKE_WINDOW_SECS)
                .unwrap_or(DEFAULT_AWAKE_WINDOW_SECS),
        );
        self.lock()
            .awake_at
            .is_some_and(|at| at.elapsed() < window)
    }

    pub fn add_observer(&self, observer: Arc<dyn ChatObserver>) -> ObserverId {
        self.inner.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    /// Receive every observer callback as a [`RuntimeEvent`].
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.inner.events.subscribe()
    }

    /// Answer a user message.
    ///
    /// Interrupts whatever is in flight, then streams a reply. Returns
    /// `Ok(None)` for blank input.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM backend fails to start a response.
    pub async fn send_user_message(&self, text: &str) -> Result<Option<SessionOutcome>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        self.interrupt();
        self.bubble_message(Role::User, text);
        let messages = self.request_messages();
        self.stream_reply(messages).await.map(Some)
    }

    /// Describe `image` with the vision backend and answer the description.
    ///
    /// Returns the description, or `None` when no vision backend is
    /// available or it failed.
    pub async fn get_vision_response(&self, image: &ImageData) -> Option<String> {
        let name = self.inner.config.get_or(keys::VISION_BACKEND, "");
        let backend = match self.inner.backends.vision.get_or_load(&name).await {
            Ok(Some(backend)) => backend,
            Ok(None) => {
                warn!(backend = %name, "unsupported vision backend");
                return None;
            }
            Err(e) => {
                error!(backend = %name, "failed to load vision backend: {e}");
                self.inner
                    .alert
                    .error("Failed to load vision backend", &e.to_string());
                return None;
            }
        };

        let mut request = Vec::with_capacity(2);
        let prompt = self.inner.config.get_or(keys::VISION_SYSTEM_PROMPT, "");
        if !prompt.trim().is_empty() {
            request.push(Message::system(prompt));
        }
        request.push(Message::user(VISION_DESCRIBE_PROMPT));

        let description = match backend.describe(&request, image).await {
            Ok(description) => description.trim().to_owned(),
            Err(e) => {
                error!(backend = %name, "vision error: {e}");
                self.inner
                    .alert
                    .error("Failed to get vision response", &e.to_string());
                return None;
            }
        };
        if description.is_empty() {
            warn!(backend = %name, "vision backend returned an empty description");
            return None;
        }
        info!(backend = %name, "image described");

        if let Err(e) = self.send_user_message(&vision_turn(&description)).await {
            warn!("reply to image description failed: {e}");
        }
        Some(description)
    }

    /// Invalidate all in-flight work. Returns the new generation.
    ///
    /// Jobs already being executed finish, but their results are dropped.
    pub fn interrupt(&self) -> u64 {
        let stream_idx = self.inner.stream_idx.fetch_add(1, Ordering::SeqCst) + 1;
        let (session, was_processing, was_speaking) = {
            let mut shared = self.lock();
            shared.pending_assistant.clear();
            shared.flush_scheduled = false;
            shared.flush_epoch += 1;
            let was_processing = std::mem::replace(&mut shared.processing, false);
            let was_speaking = std::mem::replace(&mut shared.speaking, false);
            (shared.session.take(), was_processing, was_speaking)
        };
        if let Some((_, handle)) = session {
            handle.abort();
        }
        self.inner.tts_queue.clear();
        self.inner.speak_queue.clear();
        if let Err(e) = self.inner.avatar.stop_speaking() {
            warn!("failed to stop avatar playback: {e}");
        }

        if was_processing {
            self.notify(|o| o.on_processing_change(false));
        }
        if was_speaking {
            self.notify(|o| o.on_speaking_change(false));
        }
        self.transition(StateSignal::Interrupted);
        debug!(stream_idx, "interrupted");
        self.notify(|o| o.on_interrupt(stream_idx));
        stream_idx
    }

    /// Add text to the chat log.
    ///
    /// Switching roles folds the previous role's accumulated text into the
    /// durable history. Assistant text is flushed to observers either
    /// immediately or after a short debounce.
    pub fn bubble_message(&self, role: Role, text: &str) {
        match role {
            Role::User => {
                let (history, user) = {
                    let mut shared = self.lock();
                    let folded = shared.fold_assistant();
                    if !shared.current_user.is_empty() {
                        shared.current_user.push(' ');
                    }
                    shared.current_user.push_str(text);
                    (
                        folded.then(|| shared.messages.clone()),
                        shared.current_user.clone(),
                    )
                };
                if let Some(history) = history {
                    self.notify(|o| o.on_chat_log(&history));
                }
                self.notify(|o| o.on_user_message(&user));
            }
            Role::Assistant => self.bubble_assistant(text, self.immediate_flush()),
            Role::System => debug!("ignoring system text bubble"),
        }
    }

    fn bubble_assistant(&self, text: &str, immediate: bool) {
        if text.is_empty() {
            return;
        }
        let history = {
            let mut shared = self.lock();
            let folded = shared.fold_user();
            shared.pending_assistant.push_str(text);
            folded.then(|| shared.messages.clone())
        };
        if let Some(history) = history {
            self.notify(|o| o.on_chat_log(&history));
        }
        self.notify(|o| o.on_assistant_delta(text));

        if immediate {
            self.flush_assistant();
        } else {
            self.schedule_flush();
        }
    }

    /// Whether the active LLM backend bypasses the debounce.
    fn immediate_flush(&self) -> bool {
        let backend = self.inner.config.get_or(keys::CHATBOT_BACKEND, "");
        self.inner
            .config
            .get(keys::IMMEDIATE_FLUSH_BACKENDS)
            .is_some_and(|list| list.split(',').any(|b| b.trim() == backend))
    }

    fn flush_assistant(&self) {
        let flushed = {
            let mut shared = self.lock();
            shared.flush_scheduled = false;
            if shared.pending_assistant.is_empty() {
                None
            } else {
                let pending = std::mem::take(&mut shared.pending_assistant);
                shared.assistant.push_str(&pending);
                Some(shared.assistant.clone())
            }
        };
        if let Some(text) = flushed {
            self.notify(|o| o.on_assistant_flush(&text));
        }
    }

    /// Schedule one flush after the debounce interval. At most one is pending.
    fn schedule_flush(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.flush_assistant();
            return;
        };
        let epoch = {
            let mut shared = self.lock();
            if shared.flush_scheduled {
                return;
            }
            shared.flush_scheduled = true;
            shared.flush_epoch
        };
        let interval = Duration::from_millis(
            self.inner
                .config
                .u64_value(keys::FLUSH_INTERVAL_MS)
                .unwrap_or(DEFAULT_FLUSH_INTERVAL_MS),
        );
        let chat = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            let still_wanted = {
                let shared = chat.lock();
                shared.flush_scheduled && shared.flush_epoch == epoch
            };
            if still_wanted {
                chat.flush_assistant();
            }
        });
    }

    /// `[system, ...history, user]`, history trimmed to `max_history_messages`.
    fn request_messages(&self) -> Vec<Message> {
        let config = &self.inner.config;
        let system = config.get_or(keys::SYSTEM_PROMPT, "");
        let max_history = config.u64_value(keys::MAX_HISTORY_MESSAGES).unwrap_or(0) as usize;

        let shared = self.lock();
        let skip = if max_history > 0 {
            shared.messages.len().saturating_sub(max_history)
        } else {
            0
        };
        let mut messages = Vec::with_capacity(shared.messages.len() - skip + 2);
        if !system.trim().is_empty() {
            messages.push(Message::system(system));
        }
        messages.extend(shared.messages[skip..].iter().cloned());
        if !shared.current_user.is_empty() {
            messages.push(Message::user(shared.current_user.clone()));
        }
        messages
    }

    /// Resolve the configured LLM, falling back to echo.
    async fn resolve_llm(&self) -> Arc<dyn LlmBackend> {
        let name = self.inner.config.get_or(keys::CHATBOT_BACKEND, "");
        if name.is_empty() {
            warn!("no LLM backend configured, using echo");
            return Arc::new(EchoLlm);
        }
        match self.inner.backends.llm.get_or_load(&name).await {
            Ok(Some(backend)) => backend,
            Ok(None) => {
                warn!(backend = %name, "unsupported LLM backend, using echo");
                Arc::new(EchoLlm)
            }
            Err(e) => {
                error!(backend = %name, "failed to load LLM backend: {e}");
                self.inner
                    .alert
                    .error("Failed to load LLM backend", &e.to_string());
                Arc::new(EchoLlm)
            }
        }
    }

    async fn stream_reply(&self, messages: Vec<Message>) -> Result<SessionOutcome> {
        let stream_idx = self.stream_idx();
        let backend = self.resolve_llm().await;
        let stream = match backend.chat(&messages).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(stream_idx, "LLM error: {e}");
                self.inner
                    .alert
                    .error("Failed to get LLM response", &e.to_string());
                return Err(e);
            }
        };

        let session = StreamSession::new(stream_idx, stream, Arc::clone(&self.inner.segmenter));
        let handle = session.handle();
        // `interrupt` bumps the counter before taking the lock, so checking
        // under the lock means either it sees this handle or we see its bump.
        let registered = {
            let mut shared = self.lock();
            let current = self.is_current(stream_idx);
            if current {
                shared.session = Some((stream_idx, handle.clone()));
            }
            current
        };
        if !registered {
            // Interrupted while the backend was connecting.
            handle.abort();
            debug!(stream_idx, "dropping reply superseded before it started");
            let reason = SessionEndReason::Aborted;
            self.notify(|o| o.on_session_end(stream_idx, reason));
            return Ok(SessionOutcome {
                text: String::new(),
                reason,
                timings: SessionTimings::default(),
            });
        }

        self.notify(|o| o.on_session_start(stream_idx));
        let outcome = session.process(self).await;
        {
            let mut shared = self.lock();
            if shared
                .session
                .as_ref()
                .is_some_and(|(idx, _)| *idx == stream_idx)
            {
                shared.session = None;
            }
        }
        info!(
            stream_idx,
            reason = %outcome.reason,
            first_token = ?outcome.timings.first_token,
            "stream session ended"
        );
        let reason = outcome.reason;
        self.notify(|o| o.on_session_end(stream_idx, reason));
        Ok(outcome)
    }

    async fn run_tts_loop(self) {
        let cancel = self.inner.shutdown.clone();
        loop {
            let job = tokio::select! {
                () = cancel.cancelled() => break,
                job = self.inner.tts_queue.dequeue() => job,
            };
            let iteration = AssertUnwindSafe(self.process_tts_job(job)).catch_unwind();
            if let Err(panic) = iteration.await {
                error!("TTS loop iteration panicked: {}", panic_message(panic.as_ref()));
            }
        }
        debug!("TTS loop stopped");
    }

    async fn process_tts_job(&self, job: TtsJob) {
        if !self.is_current(job.stream_idx) {
            debug!(stream_idx = job.stream_idx, "dropping stale TTS job");
            return;
        }
        let audio = fetch_audio(
            &job.screenplay.talk,
            &self.inner.backends.tts,
            self.inner.config.as_ref(),
            Arc::clone(&self.inner.rvc),
            self.inner.alert.as_ref(),
        )
        .await;
        // Interrupted during synthesis.
        if !self.is_current(job.stream_idx) {
            debug!(stream_idx = job.stream_idx, "dropping audio synthesized for stale job");
            return;
        }
        self.inner.speak_queue.enqueue(SpeakJob {
            audio,
            screenplay: job.screenplay,
            stream_idx: job.stream_idx,
        });
    }

    async fn run_speak_loop(self) {
        let cancel = self.inner.shutdown.clone();
        loop {
            let job = tokio::select! {
                () = cancel.cancelled() => break,
                job = self.inner.speak_queue.dequeue() => job,
            };
            let iteration = AssertUnwindSafe(self.process_speak_job(job)).catch_unwind();
            if let Err(panic) = iteration.await {
                error!("speak loop iteration panicked: {}", panic_message(panic.as_ref()));
            }
        }
        debug!("speak loop stopped");
    }

    async fn process_speak_job(&self, job: SpeakJob) {
        if !self.is_current(job.stream_idx) {
            debug!(stream_idx = job.stream_idx, "dropping stale speak job");
            return;
        }

        let text = if self.lock().assistant_is_empty() {
            job.screenplay.text.clone()
        } else {
            format!(" {}", job.screenplay.text)
        };
        self.bubble_assistant(&text, true);

        if let Some(audio) = job.audio {
            self.set_speaking(true);
            let played = match self.inner.avatar.speak(audio, &job.screenplay).await {
                Ok(()) => true,
                Err(e) => {
                    error!(stream_idx = job.stream_idx, "avatar playback failed: {e}");
                    false
                }
            };
            self.set_speaking(false);
            if played && self.is_current(job.stream_idx) {
                self.lock().awake_at = Some(Instant::now());
            }
        }
    }

    /// Update the processing flag on behalf of generation `stream_idx`.
    fn set_processing(&self, stream_idx: u64, processing: bool) {
        {
            let mut shared = self.lock();
            if !self.is_current(stream_idx) || shared.processing == processing {
                return;
            }
            shared.processing = processing;
        }
        self.notify(|o| o.on_processing_change(processing));
        self.transition(if processing {
            StateSignal::SessionStarted
        } else {
            StateSignal::SessionFinished
        });
    }

    fn set_speaking(&self, speaking: bool) {
        let processing = {
            let mut shared = self.lock();
            if shared.speaking == speaking {
                return;
            }
            shared.speaking = speaking;
            shared.processing
        };
        self.notify(|o| o.on_speaking_change(speaking));
        self.transition(if speaking {
            StateSignal::SpeechStarted
        } else {
            StateSignal::SpeechFinished { processing }
        });
    }

    fn transition(&self, signal: StateSignal) {
        let change = {
            let mut shared = self.lock();
            let prev = shared.chat_state;
            match prev.next(signal) {
                Some(next) if next != prev => {
                    shared.chat_state = next;
                    Some((next, prev))
                }
                _ => None,
            }
        };
        if let Some((next, prev)) = change {
            debug!(%prev, %next, "chat state changed");
            self.notify(|o| o.on_state_change(next, prev));
        }
    }

    fn notify(&self, f: impl Fn(&dyn ChatObserver)) {
        f(&self.inner.events);
        self.inner.observers.notify(f);
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionHost for Chat {
    fn enqueue_screenplay(&self, screenplay: Screenplay, stream_idx: u64) {
        if !self.is_current(stream_idx) {
            debug!(stream_idx, "dropping screenplay from stale session");
            return;
        }
        self.inner.tts_queue.enqueue(TtsJob {
            screenplay,
            stream_idx,
        });
    }

    fn thought(&self, thinking: bool, text: &str) {
        self.notify(|o| o.on_thought(thinking, text));
        self.transition(if thinking {
            StateSignal::ThinkingStarted
        } else {
            StateSignal::ThinkingFinished
        });
    }

    fn set_processing_state(&self, stream_idx: u64, processing: bool) {
        self.set_processing(stream_idx, processing);
    }

    fn append_error(&self, message: &str) {
        error!("LLM stream error: {message}");
        self.notify(|o| o.on_error(message));
    }

    fn is_current(&self, stream_idx: u64) -> bool {
        Chat::is_current(self, stream_idx)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
