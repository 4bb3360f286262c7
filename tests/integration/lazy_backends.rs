//! Backends registered as placeholders and loaded on first use.

use crate::helpers::{CountingTts, RecordingAlert, RecordingAvatar, ScriptedLlm, wait_for};
use avatar_chat::backends::{LlmBackend, TtsBackend};
use avatar_chat::config::keys;
use avatar_chat::{Backends, Chat, ChatError, SettingsStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn tts_backend_loads_once_for_a_whole_reply() {
    let loads = Arc::new(AtomicUsize::new(0));
    let tts = Arc::new(CountingTts::default());

    let backends = Backends::new();
    backends.llm.register(
        "scripted",
        Arc::new(ScriptedLlm::new(&["[relaxed] One. Two. Three."])),
    );
    let (counter, handler) = (loads.clone(), tts.clone());
    backends.tts.register_lazy("lazy", move || {
        let counter = counter.clone();
        let handler = handler.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ChatError>(handler as Arc<dyn TtsBackend>)
        }
    });
    assert!(!backends.tts.is_loaded("lazy"));

    let settings = SettingsStore::new();
    settings.set(keys::CHATBOT_BACKEND, "scripted");
    settings.set(keys::TTS_BACKEND, "lazy");
    let avatar = Arc::new(RecordingAvatar::default());
    let chat = Chat::builder(Arc::new(settings), backends)
        .with_avatar(avatar.clone())
        .build();
    chat.start();

    chat.send_user_message("count").await.unwrap();
    assert!(wait_for(|| avatar.spoken_texts().len() == 3).await);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(tts.count(), 3);
}

#[tokio::test]
async fn failed_llm_load_alerts_and_falls_back_to_echo() {
    let backends = Backends::with_builtins();
    backends.llm.register_lazy("broken", || async {
        Err::<Arc<dyn LlmBackend>, _>(ChatError::Backend("model file missing".to_owned()))
    });

    let settings = SettingsStore::new();
    settings.set(keys::CHATBOT_BACKEND, "broken");
    let alert = Arc::new(RecordingAlert::default());
    let chat = Chat::builder(Arc::new(settings), backends)
        .with_alert(alert.clone())
        .build();
    chat.start();

    let outcome = chat.send_user_message("ping").await.unwrap().unwrap();
    assert_eq!(outcome.text, "[neutral] You said: ping");
    assert_eq!(
        *alert.titles.lock().unwrap(),
        vec!["Failed to load LLM backend"]
    );
}
