//! Message types passed between pipeline stages.

use crate::screenplay::Screenplay;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) output.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
}

/// The content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a text message with the given role.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// A user message carrying text and an inline image.
    pub fn user_with_image(text: impl Into<String>, image: &ImageData) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    url: image.to_data_url(),
                },
            ]),
        }
    }
}

/// Encoding of an [`AudioClip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFormat {
    /// Little-endian mono f32 samples.
    Pcm { sample_rate: u32 },
    /// Container/codec bytes (`audio/mpeg`, `audio/wav`, ...).
    Encoded { mime: String },
}

/// Synthesized audio, ready for avatar playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Bytes,
    pub format: AudioFormat,
}

impl AudioClip {
    /// Build a PCM clip from f32 samples.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self {
            data: Bytes::from(data),
            format: AudioFormat::Pcm { sample_rate },
        }
    }

    pub fn encoded(data: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            format: AudioFormat::Encoded { mime: mime.into() },
        }
    }

    /// Playback length. Only known for PCM clips.
    pub fn duration(&self) -> Option<Duration> {
        match self.format {
            AudioFormat::Pcm { sample_rate } if sample_rate > 0 => {
                let samples = self.data.len() / std::mem::size_of::<f32>();
                Some(Duration::from_secs_f64(
                    samples as f64 / f64::from(sample_rate),
                ))
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A still image handed to the vision backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub data: Bytes,
    pub mime: String,
}

impl ImageData {
    pub fn new(data: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime: mime.into(),
        }
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// `data:` URL suitable for multimodal chat APIs.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.to_base64())
    }
}

/// A screenplay waiting for synthesis.
#[derive(Debug, Clone)]
pub struct TtsJob {
    pub screenplay: Screenplay,
    /// Generation the job was created in.
    pub stream_idx: u64,
}

/// A synthesized screenplay waiting for playback.
#[derive(Debug, Clone)]
pub struct SpeakJob {
    /// `None` when muted, unsupported or synthesis failed.
    pub audio: Option<AudioClip>,
    pub screenplay: Screenplay,
    pub stream_idx: u64,
}
