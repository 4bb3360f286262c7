//! Pluggable LLM, TTS and vision backends.
//!
//! Concrete network clients live outside this crate. They implement the
//! traits here and are registered by name in a [`BackendRegistry`]; the
//! orchestrator resolves the configured name on every call.

pub mod echo;
pub mod registry;
pub mod silence;

pub use registry::BackendRegistry;

use crate::config::{ConfigSnapshot, keys};
use crate::error::Result;
use crate::pipeline::messages::{AudioClip, ImageData, Message};
use crate::screenplay::Talk;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// A streamed model response. Chunks are concatenated in arrival order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Chat completion backend.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Start a streamed completion for `messages`.
    ///
    /// The returned stream must eventually close.
    async fn chat(&self, messages: &[Message]) -> Result<TextStream>;
}

/// Speech synthesis backend.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize one utterance.
    ///
    /// `Ok(None)` means "no audio" (muted voice, unsupported style, soft
    /// failure). Errors are reserved for unexpected failures.
    async fn synthesize(&self, talk: &Talk, ctx: &TtsContext) -> Result<Option<AudioClip>>;
}

/// Post-synthesis voice conversion.
#[async_trait]
pub trait VoiceTransform: Send + Sync {
    async fn transform(&self, audio: AudioClip, settings: &ConfigSnapshot) -> Result<AudioClip>;
}

/// Voice transform that returns audio unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTransform;

#[async_trait]
impl VoiceTransform for PassthroughTransform {
    async fn transform(&self, audio: AudioClip, _settings: &ConfigSnapshot) -> Result<AudioClip> {
        Ok(audio)
    }
}

/// Image description backend.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn describe(&self, messages: &[Message], image: &ImageData) -> Result<String>;
}

/// Per-call context handed to a [`TtsBackend`].
#[derive(Clone)]
pub struct TtsContext {
    /// Configuration frozen when the call started.
    pub snapshot: ConfigSnapshot,
    rvc: Arc<dyn VoiceTransform>,
}

impl TtsContext {
    pub fn new(snapshot: ConfigSnapshot, rvc: Arc<dyn VoiceTransform>) -> Self {
        Self { snapshot, rvc }
    }

    /// Apply the voice transform when `rvc_enabled` is set in the snapshot.
    ///
    /// # Errors
    ///
    /// Propagates transform failures.
    pub async fn rvc_transform(&self, audio: AudioClip) -> Result<AudioClip> {
        use crate::config::ConfigProvider as _;
        if self.snapshot.flag(keys::RVC_ENABLED) {
            self.rvc.transform(audio, &self.snapshot).await
        } else {
            Ok(audio)
        }
    }
}

/// The three backend registries used by the orchestrator.
pub struct Backends {
    pub llm: BackendRegistry<dyn LlmBackend>,
    pub tts: BackendRegistry<dyn TtsBackend>,
    pub vision: BackendRegistry<dyn VisionBackend>,
}

impl Default for Backends {
    fn default() -> Self {
        Self::new()
    }
}

impl Backends {
    /// Empty registries.
    pub fn new() -> Self {
        Self {
            llm: BackendRegistry::new("llm"),
            tts: BackendRegistry::new("tts"),
            vision: BackendRegistry::new("vision"),
        }
    }

    /// Registries pre-populated with the built-in echo LLM and silent TTS.
    pub fn with_builtins() -> Self {
        let backends = Self::new();
        backends
            .llm
            .register(echo::ECHO_BACKEND, Arc::new(echo::EchoLlm));
        backends
            .tts
            .register(silence::SILENCE_BACKEND, Arc::new(silence::SilenceTts::default()));
        backends
    }
}
