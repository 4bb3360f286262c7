//! Error types for the chat orchestration engine.

/// Top-level error type for the conversational pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Language model request or response error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Vision (image description) error.
    #[error("vision error: {0}")]
    Vision(String),

    /// Reading the streamed model response failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// A lazily registered backend failed to load.
    #[error("backend error: {0}")]
    Backend(String),

    /// The configured backend name is not registered.
    #[error("unsupported {kind} backend: {name}")]
    UnsupportedBackend {
        /// Backend family (`llm`, `tts`, `vision`).
        kind: &'static str,
        /// The configured name that could not be resolved.
        name: String,
    },

    /// Avatar playback error.
    #[error("avatar error: {0}")]
    Avatar(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;
