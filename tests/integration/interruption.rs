//! Interrupting a reply mid-stream and mid-synthesis.

use crate::helpers::{
    CountingTts, GatedLlm, HeldLlm, ScriptedLlm, start_chat, start_chat_with_tts, wait_for,
};
use avatar_chat::{ChatState, SessionEndReason};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn interrupt_aborts_the_live_stream() {
    let (llm, tx) = GatedLlm::new();
    let h = start_chat(Arc::new(llm));

    let chat = h.chat.clone();
    let reply = tokio::spawn(async move { chat.send_user_message("tell me a story").await });

    tx.send("[happy] Once upon a time. ").unwrap();
    tx.send("There was").unwrap();
    assert!(wait_for(|| h.avatar.spoken_texts() == vec!["Once upon a time."]).await);
    assert!(wait_for(|| h.chat.state() == ChatState::Processing).await);

    let idx = h.chat.interrupt();
    assert_eq!(idx, 2);
    // Anything the backend still produces belongs to the old generation.
    let _ = tx.send(" a dragon. It was big. ");

    let outcome = reply.await.unwrap().unwrap().unwrap();
    assert_eq!(outcome.reason, SessionEndReason::Aborted);
    assert_eq!(
        *h.observer.session_ends.lock().unwrap(),
        vec![(1, SessionEndReason::Aborted)]
    );
    assert!(h.observer.interrupts.lock().unwrap().contains(&2));
    assert!(h.avatar.stops.load(Ordering::SeqCst) >= 1);
    assert_eq!(h.chat.state(), ChatState::Idle);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.avatar.spoken_texts(), vec!["Once upon a time."]);
    assert_eq!(h.tts.count(), 1);
}

#[tokio::test]
async fn audio_from_before_an_interrupt_is_never_played() {
    let (tts, gate) = CountingTts::gated();
    let h = start_chat_with_tts(
        Arc::new(ScriptedLlm::new(&["[happy] One. [sad] Two. [angry] Three."])),
        tts,
    );

    h.chat.send_user_message("count").await.unwrap();
    // The first sentence is stuck in synthesis; the others are queued.
    assert!(wait_for(|| h.tts.count() == 1).await);

    h.chat.interrupt();
    gate.add_permits(16);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.avatar.spoken_texts().is_empty());
    assert_eq!(*h.tts.calls.lock().unwrap(), vec!["One."]);
    assert!(h.observer.last_flush().is_none());
}

#[tokio::test]
async fn replies_after_an_interrupt_are_spoken() {
    let (tts, gate) = CountingTts::gated();
    let h = start_chat_with_tts(Arc::new(ScriptedLlm::new(&["[happy] One. Two."])), tts);

    h.chat.send_user_message("first").await.unwrap();
    assert!(wait_for(|| h.tts.count() == 1).await);

    // A new message interrupts the first reply by itself.
    h.chat.send_user_message("second").await.unwrap();
    gate.add_permits(16);

    assert!(wait_for(|| h.avatar.spoken_texts() == vec!["One.", "Two."]).await);
    // One stale synthesis plus the two sentences of the second reply.
    assert_eq!(h.tts.count(), 3);
    assert_eq!(
        *h.observer.session_ends.lock().unwrap(),
        vec![
            (1, SessionEndReason::Completed),
            (2, SessionEndReason::Completed),
        ]
    );
}

#[tokio::test]
async fn superseded_reply_cannot_shield_the_live_one_from_interrupt() {
    let llm = Arc::new(HeldLlm::new(None));
    let h = start_chat(llm.clone());

    let chat = h.chat.clone();
    let first = tokio::spawn(async move { chat.send_user_message("first").await });
    assert!(wait_for(|| llm.is_holding()).await);

    let chat = h.chat.clone();
    let second = tokio::spawn(async move { chat.send_user_message("second").await });
    assert!(wait_for(|| h.chat.state() == ChatState::Processing).await);

    // The first reply connects only after the second one took over.
    llm.release();
    let outcome = first.await.unwrap().unwrap().unwrap();
    assert_eq!(outcome.reason, SessionEndReason::Aborted);
    assert!(outcome.text.is_empty());
    assert_eq!(h.chat.state(), ChatState::Processing);

    h.chat.interrupt();
    let outcome = tokio::time::timeout(Duration::from_secs(2), second)
        .await
        .expect("live reply was not aborted")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome.reason, SessionEndReason::Aborted);
    assert_eq!(
        *h.observer.session_ends.lock().unwrap(),
        vec![(1, SessionEndReason::Aborted), (2, SessionEndReason::Aborted)]
    );
    assert_eq!(h.chat.state(), ChatState::Idle);
    assert!(h.avatar.spoken_texts().is_empty());
}

#[tokio::test]
async fn late_superseded_reply_leaves_the_chat_idle() {
    let llm = Arc::new(HeldLlm::new(Some(&["[happy] Fresh."])));
    let h = start_chat(llm.clone());

    let chat = h.chat.clone();
    let first = tokio::spawn(async move { chat.send_user_message("first").await });
    assert!(wait_for(|| llm.is_holding()).await);

    let outcome = h.chat.send_user_message("second").await.unwrap().unwrap();
    assert_eq!(outcome.reason, SessionEndReason::Completed);
    assert!(wait_for(|| h.avatar.spoken_texts() == vec!["Fresh."]).await);
    assert!(wait_for(|| h.chat.state() == ChatState::Idle).await);

    llm.release();
    let outcome = first.await.unwrap().unwrap().unwrap();
    assert_eq!(outcome.reason, SessionEndReason::Aborted);
    assert_eq!(h.chat.state(), ChatState::Idle);

    let mut ends = h.observer.session_ends.lock().unwrap().clone();
    ends.sort_by_key(|(idx, _)| *idx);
    assert_eq!(
        ends,
        vec![(1, SessionEndReason::Aborted), (2, SessionEndReason::Completed)]
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.avatar.spoken_texts(), vec!["Fresh."]);
    assert_eq!(h.chat.state(), ChatState::Idle);
}
