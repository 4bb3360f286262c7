//! Audio resolution for a single screenplay.

use crate::alert::Alert;
use crate::backends::{BackendRegistry, TtsBackend, TtsContext, VoiceTransform};
use crate::config::{ConfigProvider, ConfigSnapshot, keys};
use crate::error::ChatError;
use crate::pipeline::messages::AudioClip;
use crate::screenplay::Talk;
use std::sync::Arc;
use tracing::{error, warn};

/// Settings frozen into every TTS call.
pub const TTS_SNAPSHOT_KEYS: &[&str] = &[
    keys::TTS_BACKEND,
    keys::TTS_MUTED,
    keys::TTS_VOICE,
    keys::TTS_SPEED,
    keys::RVC_ENABLED,
    keys::RVC_MODEL,
    keys::RVC_F0_UPKEY,
    keys::RVC_INDEX_RATE,
];

/// Synthesize `talk` with the configured TTS backend.
///
/// Returns `None` when muted, when there is nothing to say, when the
/// backend is not registered (logged as a warning) and when the backend
/// fails (reported through `alert`). Never returns an error.
pub async fn fetch_audio(
    talk: &Talk,
    registry: &BackendRegistry<dyn TtsBackend>,
    config: &dyn ConfigProvider,
    rvc: Arc<dyn VoiceTransform>,
    alert: &dyn Alert,
) -> Option<AudioClip> {
    let snapshot = ConfigSnapshot::capture(config, TTS_SNAPSHOT_KEYS);
    if snapshot.flag(keys::TTS_MUTED) || talk.message.trim().is_empty() {
        return None;
    }

    let name = snapshot.get_or(keys::TTS_BACKEND, "");
    let backend = match registry.get_or_load(&name).await {
        Ok(Some(backend)) => backend,
        Ok(None) => {
            let err = ChatError::UnsupportedBackend {
                kind: registry.kind(),
                name,
            };
            warn!("{err}");
            return None;
        }
        Err(e) => {
            error!(backend = %name, "failed to load TTS backend: {e}");
            alert.error("Failed to load TTS backend", &e.to_string());
            return None;
        }
    };

    let ctx = TtsContext::new(snapshot, rvc);
    match backend.synthesize(talk, &ctx).await {
        Ok(audio) => audio,
        Err(e) => {
            error!(backend = %name, "TTS error: {e}");
            alert.error("Failed to get TTS response", &e.to_string());
            None
        }
    }
}
