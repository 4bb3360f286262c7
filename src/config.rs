//! Configuration for the chat orchestration engine.
//!
//! Two layers:
//! - [`ChatConfig`] is the typed TOML file model loaded at startup.
//! - [`ConfigProvider`] is the runtime view the orchestrator and backends
//!   read from. Values are plain strings keyed by the names in [`keys`] so
//!   settings UIs can change them while a conversation is running.
//!
//! Backends never read the provider directly during a call. They receive a
//! [`ConfigSnapshot`] captured before the call starts, so one synthesis sees
//! one consistent configuration even if settings change concurrently.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

/// Stable configuration key names.
pub mod keys {
    /// Assistant display name.
    pub const NAME: &str = "name";
    /// System prompt prepended to every LLM request.
    pub const SYSTEM_PROMPT: &str = "system_prompt";
    /// Registered LLM backend name.
    pub const CHATBOT_BACKEND: &str = "chatbot_backend";
    /// Maximum number of history messages sent to the LLM (0 = unlimited).
    pub const MAX_HISTORY_MESSAGES: &str = "max_history_messages";
    /// Debounce interval for assistant text flushes, in milliseconds.
    pub const FLUSH_INTERVAL_MS: &str = "flush_interval_ms";
    /// How long the assistant stays awake after speaking, in seconds.
    pub const AWAKE_WINDOW_SECS: &str = "awake_window_secs";
    /// Comma separated LLM backends whose assistant text bypasses the debounce.
    pub const IMMEDIATE_FLUSH_BACKENDS: &str = "immediate_flush_backends";
    /// Registered TTS backend name.
    pub const TTS_BACKEND: &str = "tts_backend";
    /// `"true"` disables speech synthesis entirely.
    pub const TTS_MUTED: &str = "tts_muted";
    /// Voice identifier passed to the TTS backend.
    pub const TTS_VOICE: &str = "tts_voice";
    /// Speech speed multiplier.
    pub const TTS_SPEED: &str = "tts_speed";
    /// `"true"` runs synthesized audio through the voice transform.
    pub const RVC_ENABLED: &str = "rvc_enabled";
    /// Voice transform model name.
    pub const RVC_MODEL: &str = "rvc_model";
    /// Voice transform pitch shift in semitones.
    pub const RVC_F0_UPKEY: &str = "rvc_f0_upkey";
    /// Voice transform feature index ratio.
    pub const RVC_INDEX_RATE: &str = "rvc_index_rate";
    /// Registered vision backend name.
    pub const VISION_BACKEND: &str = "vision_backend";
    /// System prompt used for image description requests.
    pub const VISION_SYSTEM_PROMPT: &str = "vision_system_prompt";
}

/// Runtime configuration source.
///
/// Implementations return raw string values; typed accessors are provided
/// on top of [`get`](Self::get).
pub trait ConfigProvider: Send + Sync {
    /// Look up a raw value.
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a value, falling back to `default` when unset.
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    /// Interpret a value as a boolean flag (`"true"` or `"1"`).
    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| parse_flag(&v))
    }

    /// Interpret a value as an unsigned integer.
    fn u64_value(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

fn parse_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw.eq_ignore_ascii_case("true") || raw == "1"
}

/// Mutable in-memory settings shared between the UI and the orchestrator.
#[derive(Debug, Default)]
pub struct SettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl SettingsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a loaded configuration file.
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            values: RwLock::new(config.to_settings()),
        }
    }

    /// Set a value, replacing any previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Remove a value. Returns the previous value if present.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}

impl ConfigProvider for SettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

/// Immutable copy of a fixed set of configuration values.
///
/// Cheap to clone; all clones share the same map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    values: Arc<BTreeMap<String, String>>,
}

impl ConfigSnapshot {
    /// Capture `keys` from `provider` at this instant. Unset keys are omitted.
    pub fn capture(provider: &dyn ConfigProvider, keys: &[&str]) -> Self {
        let values = keys
            .iter()
            .filter_map(|key| provider.get(key).map(|v| ((*key).to_owned(), v)))
            .collect();
        Self {
            values: Arc::new(values),
        }
    }

    /// Number of captured values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over captured key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl ConfigProvider for ConfigSnapshot {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Conversation behaviour.
    pub chat: ConversationConfig,
    /// Language model selection.
    pub llm: LlmConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Voice transform settings.
    pub rvc: RvcConfig,
    /// Image description settings.
    pub vision: VisionConfig,
}

/// Conversation behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Assistant display name.
    pub name: String,
    /// System prompt prepended to every request.
    pub system_prompt: String,
    /// Maximum history messages sent to the LLM (0 = unlimited).
    pub max_history_messages: usize,
    /// Debounce interval for assistant text flushes.
    ///
    /// 16 ms approximates one display frame.
    pub flush_interval_ms: u64,
    /// Seconds the assistant stays awake after it last spoke.
    pub awake_window_secs: u64,
    /// LLM backends whose assistant text is flushed without debouncing.
    pub immediate_flush_backends: Vec<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            name: "Aria".to_owned(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_history_messages: 0,
            flush_interval_ms: 16,
            awake_window_secs: 120,
            immediate_flush_backends: Vec::new(),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly companion with a 3D avatar. \
Keep replies short and conversational. Begin each sentence with one emotion tag \
from [neutral], [happy], [angry], [sad], [relaxed], [surprised], for example: \
[happy] It's great to see you!";

const DEFAULT_VISION_PROMPT: &str =
    "Describe the image as concisely as possible, mentioning people, objects and mood.";

/// Language model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Registered LLM backend name.
    pub backend: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: crate::backends::echo::ECHO_BACKEND.to_owned(),
        }
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Registered TTS backend name.
    pub backend: String,
    /// Disable speech synthesis.
    pub muted: bool,
    /// Voice identifier.
    pub voice: String,
    /// Speech speed multiplier (0.5–2.0).
    pub speed: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: crate::backends::silence::SILENCE_BACKEND.to_owned(),
            muted: false,
            voice: "default".to_owned(),
            speed: 1.0,
        }
    }
}

/// Voice transform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RvcConfig {
    /// Run synthesized audio through the voice transform.
    pub enabled: bool,
    /// Voice transform model name.
    pub model: String,
    /// Pitch shift in semitones.
    pub f0_upkey: i32,
    /// Feature index ratio (0.0–1.0).
    pub index_rate: f32,
}

impl Default for RvcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: String::new(),
            f0_upkey: 0,
            index_rate: 0.66,
        }
    }
}

/// Image description settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Registered vision backend name (empty = disabled).
    pub backend: String,
    /// System prompt for description requests.
    pub system_prompt: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            backend: String::new(),
            system_prompt: DEFAULT_VISION_PROMPT.to_owned(),
        }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ChatError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ChatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/avatar-chat/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("avatar-chat")
            .join("config.toml")
    }

    /// Flatten into runtime key/value settings.
    pub fn to_settings(&self) -> HashMap<String, String> {
        let pairs = [
            (keys::NAME, self.chat.name.clone()),
            (keys::SYSTEM_PROMPT, self.chat.system_prompt.clone()),
            (
                keys::MAX_HISTORY_MESSAGES,
                self.chat.max_history_messages.to_string(),
            ),
            (
                keys::FLUSH_INTERVAL_MS,
                self.chat.flush_interval_ms.to_string(),
            ),
            (
                keys::AWAKE_WINDOW_SECS,
                self.chat.awake_window_secs.to_string(),
            ),
            (
                keys::IMMEDIATE_FLUSH_BACKENDS,
                self.chat.immediate_flush_backends.join(","),
            ),
            (keys::CHATBOT_BACKEND, self.llm.backend.clone()),
            (keys::TTS_BACKEND, self.tts.backend.clone()),
            (keys::TTS_MUTED, self.tts.muted.to_string()),
            (keys::TTS_VOICE, self.tts.voice.clone()),
            (keys::TTS_SPEED, self.tts.speed.to_string()),
            (keys::RVC_ENABLED, self.rvc.enabled.to_string()),
            (keys::RVC_MODEL, self.rvc.model.clone()),
            (keys::RVC_F0_UPKEY, self.rvc.f0_upkey.to_string()),
            (keys::RVC_INDEX_RATE, self.rvc.index_rate.to_string()),
            (keys::VISION_BACKEND, self.vision.backend.clone()),
            (keys::VISION_SYSTEM_PROMPT, self.vision.system_prompt.clone()),
        ];
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect()
    }
}
