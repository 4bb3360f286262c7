//! Offline LLM backend that repeats the last user message.
//!
//! Used as the fallback when no LLM backend is configured, and in the
//! console REPL and tests where no model is available.

use super::{LlmBackend, TextStream};
use crate::error::{ChatError, Result};
use crate::pipeline::messages::{Message, Role};
use async_trait::async_trait;
use bytes::Bytes;

/// Registered name of [`EchoLlm`].
pub const ECHO_BACKEND: &str = "echo";

/// Streams `"[neutral] You said: <last user text>"` one word at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoLlm;

impl EchoLlm {
    fn reply(messages: &[Message]) -> String {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.text())
            .unwrap_or_default();
        let last = last.trim();
        if last.is_empty() {
            "[neutral] I didn't catch that.".to_owned()
        } else {
            format!("[neutral] You said: {last}")
        }
    }
}

/// Split into chunks that each start with the whitespace preceding a word.
fn word_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    for c in text.chars() {
        if c.is_whitespace() && in_word {
            chunks.push(std::mem::take(&mut current));
            in_word = false;
        } else if !c.is_whitespace() {
            in_word = true;
        }
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl LlmBackend for EchoLlm {
    async fn chat(&self, messages: &[Message]) -> Result<TextStream> {
        let chunks = word_chunks(&Self::reply(messages));
        let stream = async_stream::stream! {
            for chunk in chunks {
                tokio::task::yield_now().await;
                yield Ok::<_, ChatError>(Bytes::from(chunk));
            }
        };
        Ok(Box::pin(stream))
    }
}
