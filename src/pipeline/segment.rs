//! Incremental sentence and tag extraction from streamed model text.
//!
//! The stream session owns a rolling text buffer and hands it to a
//! [`TextSegmenter`] after every chunk. The segmenter emits every sentence
//! that is complete so far and returns the unconsumed tail, which the
//! session keeps and extends with the next chunk.

/// Opening marker of a reasoning section.
pub const THINK_OPEN: &str = "<think>";
/// Closing marker of a reasoning section.
pub const THINK_CLOSE: &str = "</think>";

/// Minimum characters before a clause mark may end a unit.
const CLAUSE_MIN_CHARS: usize = 10;
/// An unclosed `[` or `*` longer than this is treated as plain text.
const MAX_PENDING_MARKUP: usize = 64;

/// Parse state carried between segmentation calls of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseState {
    /// Every sentence emitted so far, without tags.
    pub sentences: Vec<String>,
    /// Most recent emotion tag including brackets, e.g. `[happy]`.
    pub tag: String,
    /// Inside a `<think>` section.
    pub thinking: bool,
    /// Most recent `*action*` text, if any.
    pub roleplay: Option<String>,
}

/// A completed unit of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedSentence {
    /// Sentence prefixed with the active tag (`"[happy] Hi!"`).
    pub text: String,
    /// Produced inside a reasoning section.
    pub thinking: bool,
}

/// Result of one segmentation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmented {
    pub state: ParseState,
    /// Text not yet forming a complete unit.
    pub remainder: String,
}

/// Pure incremental sentence/tag extractor.
pub trait TextSegmenter: Send + Sync {
    /// Consume `received`, emitting completed sentences.
    fn segment(
        &self,
        state: ParseState,
        received: &str,
        emit: &mut dyn FnMut(SegmentedSentence),
    ) -> Segmented;

    /// Flush the final tail once the stream has closed.
    fn finish(
        &self,
        state: ParseState,
        remainder: &str,
        emit: &mut dyn FnMut(SegmentedSentence),
    ) -> ParseState;
}

/// Default punctuation-driven segmenter.
///
/// Splits on `. ! ?` followed by whitespace, on newlines and on CJK full
/// stops. Once a unit is long enough it also splits on the last clause
/// mark (`, ; 、`) so the first audio starts sooner.
#[derive(Debug, Default, Clone, Copy)]
pub struct SentenceSegmenter;

impl SentenceSegmenter {
    fn run(
        &self,
        mut state: ParseState,
        received: &str,
        at_end: bool,
        emit: &mut dyn FnMut(SegmentedSentence),
    ) -> Segmented {
        let mut rest = received;
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }

            let marker = if state.thinking {
                THINK_CLOSE
            } else {
                THINK_OPEN
            };
            if let Some(after) = rest.strip_prefix(marker) {
                state.thinking = !state.thinking;
                rest = after;
                continue;
            }

            if rest.starts_with('[') {
                match rest.find(']') {
                    Some(end) => {
                        state.tag = rest[..=end].to_owned();
                        rest = &rest[end + 1..];
                        continue;
                    }
                    None if !at_end && rest.len() < MAX_PENDING_MARKUP => break,
                    None => {}
                }
            }

            if let Some(body) = rest.strip_prefix('*') {
                match body.find('*') {
                    Some(end) => {
                        let action = body[..end].trim();
                        if !action.is_empty() {
                            state.roleplay = Some(action.to_owned());
                        }
                        rest = &body[end + 1..];
                        continue;
                    }
                    None if !at_end && rest.len() < MAX_PENDING_MARKUP => break,
                    None => {}
                }
            }

            // A marker in the middle of the buffer closes the current unit.
            let marker_pos = rest.find(marker);
            let region = &rest[..marker_pos.unwrap_or(rest.len())];
            let region_complete = marker_pos.is_some() || at_end;

            if let Some(end) = find_unit_end(region, region_complete) {
                emit_sentence(&mut state, &region[..end], emit);
                rest = &rest[end..];
                continue;
            }
            if region_complete {
                emit_sentence(&mut state, region, emit);
                rest = &rest[region.len()..];
                if marker_pos.is_none() {
                    break;
                }
                continue;
            }
            break;
        }

        Segmented {
            state,
            remainder: rest.to_owned(),
        }
    }
}

impl TextSegmenter for SentenceSegmenter {
    fn segment(
        &self,
        state: ParseState,
        received: &str,
        emit: &mut dyn FnMut(SegmentedSentence),
    ) -> Segmented {
        self.run(state, received, false, emit)
    }

    fn finish(
        &self,
        state: ParseState,
        remainder: &str,
        emit: &mut dyn FnMut(SegmentedSentence),
    ) -> ParseState {
        self.run(state, remainder, true, emit).state
    }
}

fn emit_sentence(state: &mut ParseState, raw: &str, emit: &mut dyn FnMut(SegmentedSentence)) {
    let sentence = raw.trim();
    if is_markup_only(sentence) {
        return;
    }
    state.sentences.push(sentence.to_owned());
    let text = if state.tag.is_empty() || state.thinking {
        sentence.to_owned()
    } else {
        format!("{} {}", state.tag, sentence)
    };
    emit(SegmentedSentence {
        text,
        thinking: state.thinking,
    });
}

/// True when nothing speakable is left (whitespace, brackets, punctuation).
fn is_markup_only(text: &str) -> bool {
    text.chars().all(|c| {
        c.is_whitespace()
            || c.is_ascii_punctuation()
            || "「」『』（）【】〈〉《》〔〕［］｛｝«»‹›。、！？".contains(c)
    })
}

/// Byte index just past the end of the first complete unit in `text`.
///
/// `complete` means no more text will follow, so a terminator at the very
/// end of `text` counts.
fn find_unit_end(text: &str, complete: bool) -> Option<usize> {
    find_sentence_end(text, complete).or_else(|| find_clause_end(text, complete))
}

fn find_sentence_end(text: &str, complete: bool) -> Option<usize> {
    for (i, c) in text.char_indices() {
        let end = i + c.len_utf8();
        match c {
            '\n' | '。' | '！' | '？' => return Some(end),
            '.' | '!' | '?' => match text[end..].chars().next() {
                Some(next) if next.is_whitespace() => return Some(end),
                None if complete => return Some(end),
                _ => {}
            },
            _ => {}
        }
    }
    None
}

fn find_clause_end(text: &str, complete: bool) -> Option<usize> {
    // Prefer the last clause mark so units are as long as possible.
    let mut last = None;
    for (n, (i, c)) in text.char_indices().enumerate() {
        let end = i + c.len_utf8();
        let is_clause = match c {
            '、' | '，' => true,
            ',' | ';' => match text[end..].chars().next() {
                Some(next) => next.is_whitespace(),
                None => complete,
            },
            _ => false,
        };
        if is_clause && n >= CLAUSE_MIN_CHARS {
            last = Some(end);
        }
    }
    last
}
