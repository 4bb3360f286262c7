//! Shared fakes and builders for integration tests.

use async_trait::async_trait;
use avatar_chat::alert::Alert;
use avatar_chat::avatar::Avatar;
use avatar_chat::backends::{
    Backends, LlmBackend, TextStream, TtsBackend, TtsContext, VisionBackend,
};
use avatar_chat::config::keys;
use avatar_chat::pipeline::messages::{AudioClip, ImageData, Message};
use avatar_chat::screenplay::{Screenplay, Talk};
use avatar_chat::{Chat, ChatError, ChatObserver, SessionEndReason, SettingsStore};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore, mpsc};

pub(crate) const SCRIPTED: &str = "scripted";
pub(crate) const COUNTING: &str = "counting";
pub(crate) const FAKE_VISION: &str = "fake-vision";
pub(crate) const FAILING_VISION: &str = "failing-vision";

/// LLM that streams a fixed list of chunks and records every request.
#[derive(Default)]
pub(crate) struct ScriptedLlm {
    chunks: Vec<String>,
    pub(crate) requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub(crate) fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| (*c).to_owned()).collect(),
            requests: Mutex::default(),
        }
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn chat(&self, messages: &[Message]) -> avatar_chat::Result<TextStream> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let chunks: Vec<avatar_chat::Result<Bytes>> = self
            .chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.clone())))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// LLM whose response is fed chunk by chunk from the test.
pub(crate) struct GatedLlm {
    rx: Mutex<Option<mpsc::UnboundedReceiver<&'static str>>>,
}

impl GatedLlm {
    /// Returns the backend and the sender that drives its single response.
    pub(crate) fn new() -> (Self, mpsc::UnboundedSender<&'static str>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl LlmBackend for GatedLlm {
    async fn chat(&self, _messages: &[Message]) -> avatar_chat::Result<TextStream> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ChatError::Llm("gated response already taken".to_owned()))?;
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, ChatError>(Bytes::from_static(chunk.as_bytes())), rx))
        });
        Ok(Box::pin(stream))
    }
}

/// LLM whose first `chat()` call blocks until [`HeldLlm::release`].
///
/// Later calls answer with `next`, or with a stream that never yields
/// when `next` is `None`.
pub(crate) struct HeldLlm {
    next: Option<Vec<String>>,
    holding: AtomicBool,
    released: Notify,
    calls: AtomicUsize,
}

impl HeldLlm {
    pub(crate) fn new(next: Option<&[&str]>) -> Self {
        Self {
            next: next.map(|chunks| chunks.iter().map(|c| (*c).to_owned()).collect()),
            holding: AtomicBool::new(false),
            released: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Whether the first call is parked waiting for [`release`](Self::release).
    pub(crate) fn is_holding(&self) -> bool {
        self.holding.load(Ordering::SeqCst)
    }

    pub(crate) fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl LlmBackend for HeldLlm {
    async fn chat(&self, _messages: &[Message]) -> avatar_chat::Result<TextStream> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.holding.store(true, Ordering::SeqCst);
            self.released.notified().await;
            self.holding.store(false, Ordering::SeqCst);
            let late = vec![Ok::<_, ChatError>(Bytes::from_static(b"[happy] Too late. "))];
            return Ok(Box::pin(futures_util::stream::iter(late)));
        }
        match &self.next {
            Some(chunks) => {
                let chunks: Vec<avatar_chat::Result<Bytes>> = chunks
                    .iter()
                    .map(|c| Ok(Bytes::from(c.clone())))
                    .collect();
                Ok(Box::pin(futures_util::stream::iter(chunks)))
            }
            None => Ok(Box::pin(futures_util::stream::pending())),
        }
    }
}

/// TTS that returns a short clip and records every message it synthesized.
///
/// A gated instance blocks after recording each call until the test adds
/// permits.
#[derive(Default)]
pub(crate) struct CountingTts {
    pub(crate) calls: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl CountingTts {
    pub(crate) fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                calls: Mutex::default(),
                gate: Some(gate.clone()),
            },
            gate,
        )
    }

    pub(crate) fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TtsBackend for CountingTts {
    async fn synthesize(
        &self,
        talk: &Talk,
        ctx: &TtsContext,
    ) -> avatar_chat::Result<Option<AudioClip>> {
        self.calls.lock().unwrap().push(talk.message.trim().to_owned());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let clip = AudioClip::from_samples(&[0.0; 240], 24_000);
        ctx.rvc_transform(clip).await.map(Some)
    }
}

/// Avatar that records what it was asked to say.
///
/// The first `failures` calls to `speak` fail without recording anything.
#[derive(Default)]
pub(crate) struct RecordingAvatar {
    pub(crate) spoken: Mutex<Vec<Screenplay>>,
    pub(crate) stops: AtomicUsize,
    failures: AtomicUsize,
}

impl RecordingAvatar {
    pub(crate) fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub(crate) fn spoken_texts(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.talk.message.trim().to_owned())
            .collect()
    }
}

#[async_trait]
impl Avatar for RecordingAvatar {
    async fn speak(&self, _audio: AudioClip, screenplay: &Screenplay) -> avatar_chat::Result<()> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ChatError::Avatar("renderer not ready".to_owned()));
        }
        self.spoken.lock().unwrap().push(screenplay.clone());
        Ok(())
    }

    fn stop_speaking(&self) -> avatar_chat::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Alert sink that keeps every title.
#[derive(Default)]
pub(crate) struct RecordingAlert {
    pub(crate) titles: Mutex<Vec<String>>,
}

impl Alert for RecordingAlert {
    fn error(&self, title: &str, _message: &str) {
        self.titles.lock().unwrap().push(title.to_owned());
    }
}

/// Vision backend with a canned description.
pub(crate) struct FakeVision(pub(crate) &'static str);

#[async_trait]
impl VisionBackend for FakeVision {
    async fn describe(
        &self,
        _messages: &[Message],
        _image: &ImageData,
    ) -> avatar_chat::Result<String> {
        Ok(self.0.to_owned())
    }
}

/// Vision backend that always fails.
pub(crate) struct FailingVision;

#[async_trait]
impl VisionBackend for FailingVision {
    async fn describe(
        &self,
        _messages: &[Message],
        _image: &ImageData,
    ) -> avatar_chat::Result<String> {
        Err(ChatError::Vision("image too large".to_owned()))
    }
}

/// Observer that records the callbacks the tests assert on.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    pub(crate) session_ends: Mutex<Vec<(u64, SessionEndReason)>>,
    pub(crate) flushes: Mutex<Vec<String>>,
    pub(crate) interrupts: Mutex<Vec<u64>>,
}

impl RecordingObserver {
    pub(crate) fn last_flush(&self) -> Option<String> {
        self.flushes.lock().unwrap().last().cloned()
    }
}

impl ChatObserver for RecordingObserver {
    fn on_session_end(&self, stream_idx: u64, reason: SessionEndReason) {
        self.session_ends.lock().unwrap().push((stream_idx, reason));
    }

    fn on_assistant_flush(&self, text: &str) {
        self.flushes.lock().unwrap().push(text.to_owned());
    }

    fn on_interrupt(&self, stream_idx: u64) {
        self.interrupts.lock().unwrap().push(stream_idx);
    }
}

/// Everything a test needs to drive and inspect a running [`Chat`].
pub(crate) struct Harness {
    pub(crate) chat: Chat,
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) tts: Arc<CountingTts>,
    pub(crate) avatar: Arc<RecordingAvatar>,
    pub(crate) alert: Arc<RecordingAlert>,
    pub(crate) observer: Arc<RecordingObserver>,
}

/// Start a chat wired to `llm`, [`CountingTts`] and [`FakeVision`].
///
/// Assistant text is flushed immediately so assertions do not depend on
/// the debounce timer.
pub(crate) fn start_chat(llm: Arc<dyn LlmBackend>) -> Harness {
    start_chat_with_tts(llm, CountingTts::default())
}

pub(crate) fn start_chat_with_tts(llm: Arc<dyn LlmBackend>, tts: CountingTts) -> Harness {
    start_chat_with(llm, tts, RecordingAvatar::default())
}

pub(crate) fn start_chat_with_avatar(
    llm: Arc<dyn LlmBackend>,
    avatar: RecordingAvatar,
) -> Harness {
    start_chat_with(llm, CountingTts::default(), avatar)
}

fn start_chat_with(
    llm: Arc<dyn LlmBackend>,
    tts: CountingTts,
    avatar: RecordingAvatar,
) -> Harness {
    let settings = Arc::new(SettingsStore::new());
    settings.set(keys::CHATBOT_BACKEND, SCRIPTED);
    settings.set(keys::IMMEDIATE_FLUSH_BACKENDS, SCRIPTED);
    settings.set(keys::TTS_BACKEND, COUNTING);
    settings.set(keys::VISION_BACKEND, FAKE_VISION);

    let tts = Arc::new(tts);
    let backends = Backends::new();
    backends.llm.register(SCRIPTED, llm);
    backends.tts.register(COUNTING, tts.clone());
    backends
        .vision
        .register(FAKE_VISION, Arc::new(FakeVision("a cat sitting on a keyboard")));
    backends.vision.register(FAILING_VISION, Arc::new(FailingVision));

    let avatar = Arc::new(avatar);
    let alert = Arc::new(RecordingAlert::default());
    let observer = Arc::new(RecordingObserver::default());
    let chat = Chat::builder(settings.clone(), backends)
        .with_avatar(avatar.clone())
        .with_alert(alert.clone())
        .with_observer(observer.clone())
        .build();
    chat.start();

    Harness {
        chat,
        settings,
        tts,
        avatar,
        alert,
        observer,
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub(crate) async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
