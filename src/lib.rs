//! avatar-chat: streaming conversation engine for an AI avatar.
//!
//! This crate turns a token-by-token LLM response into spoken, emoting
//! avatar output:
//! LLM stream → sentences → screenplays → TTS → avatar playback
//!
//! # Architecture
//!
//! - **Stream session**: reads the response, segments sentences and parses
//!   emotion tags into [`screenplay::Screenplay`]s
//! - **TTS loop**: synthesizes each screenplay with the configured backend
//! - **Speak loop**: plays the audio on the avatar and updates the chat log
//! - **Orchestrator** ([`Chat`]): owns the history, the queues and the
//!   generation counter that makes interruption cheap
//!
//! LLM, TTS and vision services, the avatar and the UI are collaborators
//! behind traits; see [`backends`], [`avatar`] and [`observer`].

pub mod alert;
pub mod avatar;
pub mod backends;
pub mod config;
pub mod error;
pub mod observer;
pub mod pipeline;
pub mod runtime;
pub mod screenplay;

pub use backends::Backends;
pub use config::{ChatConfig, ConfigProvider, SettingsStore};
pub use error::{ChatError, Result};
pub use observer::ChatObserver;
pub use pipeline::coordinator::{Chat, ChatBuilder};
pub use pipeline::session::{SessionEndReason, SessionOutcome};
pub use pipeline::state::ChatState;
pub use runtime::RuntimeEvent;
