//! TTS backend producing silence.
//!
//! Lets the whole speak path (synthesis, voice transform, avatar playback,
//! state transitions) run without a speech model. Clip length follows the
//! message length so playback timing is roughly realistic.

use super::{TtsBackend, TtsContext};
use crate::config::{ConfigProvider as _, keys};
use crate::error::Result;
use crate::pipeline::messages::AudioClip;
use crate::screenplay::Talk;
use async_trait::async_trait;
use tracing::debug;

/// Registered name of [`SilenceTts`].
pub const SILENCE_BACKEND: &str = "silence";

/// Output sample rate.
const SAMPLE_RATE: u32 = 24_000;

/// Silent PCM synthesizer.
#[derive(Debug, Clone, Copy)]
pub struct SilenceTts {
    /// Seconds of audio per character at speed 1.0.
    pub seconds_per_char: f32,
}

impl Default for SilenceTts {
    fn default() -> Self {
        Self {
            seconds_per_char: 0.06,
        }
    }
}

#[async_trait]
impl TtsBackend for SilenceTts {
    async fn synthesize(&self, talk: &Talk, ctx: &TtsContext) -> Result<Option<AudioClip>> {
        let text = talk.message.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let speed = ctx
            .snapshot
            .get(keys::TTS_SPEED)
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0);
        let chars = text.chars().count() as f32;
        let samples = (chars * self.seconds_per_char * SAMPLE_RATE as f32 / speed) as usize;
        debug!(chars, samples, "synthesizing silence");

        let clip = AudioClip::from_samples(&vec![0.0f32; samples], SAMPLE_RATE);
        ctx.rvc_transform(clip).await.map(Some)
    }
}
