//! One streamed LLM response, from bytes to screenplays.
//!
//! A [`StreamSession`] reads the response stream, decodes it as UTF-8
//! across chunk boundaries, runs the text through a [`TextSegmenter`] and
//! hands every completed non-reasoning sentence to its [`SessionHost`] as a
//! [`Screenplay`]. The host decides whether the session is still current;
//! once it is not, the session stops without further side effects.

use crate::backends::TextStream;
use crate::pipeline::segment::{ParseState, SegmentedSentence, TextSegmenter};
use crate::screenplay::{Screenplay, ScreenplayParser};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capabilities a session needs from its owner.
pub trait SessionHost: Send + Sync {
    /// Queue a screenplay for synthesis under generation `stream_idx`.
    fn enqueue_screenplay(&self, screenplay: Screenplay, stream_idx: u64);
    /// Report every completed sentence, reasoning or not.
    fn thought(&self, thinking: bool, text: &str);
    /// Ignored when `stream_idx` is no longer the active generation.
    fn set_processing_state(&self, stream_idx: u64, processing: bool);
    fn append_error(&self, message: &str);
    /// Whether `stream_idx` is still the active generation.
    fn is_current(&self, stream_idx: u64) -> bool;
}

/// Remote control for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    aborted: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }
}

impl SessionHandle {
    /// Stop the session. Safe to call any number of times.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEndReason {
    /// The stream closed.
    Completed,
    /// Aborted, or superseded by a newer generation.
    Aborted,
    /// Reading the stream failed.
    Failed,
}

impl SessionEndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency markers, measured from the start of [`StreamSession::process`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTimings {
    pub first_token: Option<Duration>,
    pub first_sentence: Option<Duration>,
}

/// Result of [`StreamSession::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Everything decoded from the stream, markup included.
    pub text: String,
    pub reason: SessionEndReason,
    pub timings: SessionTimings,
}

/// Reader for a single LLM response.
pub struct StreamSession {
    stream_idx: u64,
    stream: TextStream,
    segmenter: Arc<dyn TextSegmenter>,
    handle: SessionHandle,
    parser: ScreenplayParser,
}

impl StreamSession {
    pub fn new(stream_idx: u64, stream: TextStream, segmenter: Arc<dyn TextSegmenter>) -> Self {
        Self {
            stream_idx,
            stream,
            segmenter,
            handle: SessionHandle::default(),
            parser: ScreenplayParser::new(),
        }
    }

    /// Generation this session belongs to.
    pub fn stream_idx(&self) -> u64 {
        self.stream_idx
    }

    /// Handle that can abort this session from another task.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Read the stream to the end, or until aborted or superseded.
    pub async fn process(mut self, host: &dyn SessionHost) -> SessionOutcome {
        let started = Instant::now();
        let mut timings = SessionTimings::default();
        let mut reason = SessionEndReason::Completed;
        let mut log = String::new();
        let mut buffer = String::new();
        let mut state = ParseState::default();
        let mut decoder = Utf8Decoder::default();
        let cancel = self.handle.cancel.clone();

        host.set_processing_state(self.stream_idx, true);

        loop {
            if self.handle.is_aborted() {
                reason = SessionEndReason::Aborted;
                break;
            }

            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    reason = SessionEndReason::Aborted;
                    break;
                }
                next = self.stream.next() => next,
            };

            if timings.first_token.is_none() && next.is_some() {
                timings.first_token = Some(started.elapsed());
            }
            if !host.is_current(self.stream_idx) {
                debug!(stream_idx = self.stream_idx, "stream session superseded");
                reason = SessionEndReason::Aborted;
                break;
            }

            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(stream_idx = self.stream_idx, "stream read failed: {e}");
                    host.append_error(&e.to_string());
                    reason = SessionEndReason::Failed;
                    break;
                }
            };

            let text = decoder.push(&chunk);
            if text.is_empty() {
                continue;
            }
            log.push_str(&text);
            buffer.push_str(&text);

            let mut sentences = Vec::new();
            let segmented = self
                .segmenter
                .segment(state, &buffer, &mut |s| sentences.push(s));
            state = segmented.state;
            buffer = segmented.remainder;
            self.dispatch(sentences, host, started, &mut timings);
        }

        if reason == SessionEndReason::Completed {
            let tail = decoder.finish();
            log.push_str(&tail);
            buffer.push_str(&tail);
            let mut sentences = Vec::new();
            self.segmenter
                .finish(state, &buffer, &mut |s| sentences.push(s));
            self.dispatch(sentences, host, started, &mut timings);
        }

        // Release the reader before reporting the end.
        drop(self.stream);
        host.set_processing_state(self.stream_idx, false);

        SessionOutcome {
            text: log,
            reason,
            timings,
        }
    }

    fn dispatch(
        &mut self,
        sentences: Vec<SegmentedSentence>,
        host: &dyn SessionHost,
        started: Instant,
        timings: &mut SessionTimings,
    ) {
        for sentence in sentences {
            if self.handle.is_aborted() || !host.is_current(self.stream_idx) {
                return;
            }
            if timings.first_sentence.is_none() {
                timings.first_sentence = Some(started.elapsed());
            }
            if !sentence.thinking {
                let screenplay = self.parser.parse(&sentence.text);
                host.enqueue_screenplay(screenplay, self.stream_idx);
            }
            host.thought(sentence.thinking, &sentence.text);
        }
    }
}

/// Incremental UTF-8 decoder that holds back split code points.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end; wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
