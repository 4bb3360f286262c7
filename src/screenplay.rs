//! Emotion-tagged speakable units.
//!
//! The LLM is prompted to prefix sentences with an emotion tag such as
//! `[happy]`. A [`ScreenplayParser`] turns each sentence into a
//! [`Screenplay`]: the avatar expression to show, the utterance to
//! synthesize, and the original text for the chat log. The expression
//! carries over to following sentences until another known tag appears.

use serde::{Deserialize, Serialize};

/// Avatar facial expression.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Angry,
    Sad,
    Relaxed,
    Surprised,
    Shy,
    Jealous,
    Bored,
    Serious,
    Suspicious,
    Victory,
    Sleep,
    Love,
}

impl Emotion {
    /// All known emotions.
    pub const ALL: [Self; 14] = [
        Self::Neutral,
        Self::Happy,
        Self::Angry,
        Self::Sad,
        Self::Relaxed,
        Self::Surprised,
        Self::Shy,
        Self::Jealous,
        Self::Bored,
        Self::Serious,
        Self::Suspicious,
        Self::Victory,
        Self::Sleep,
        Self::Love,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Angry => "angry",
            Self::Sad => "sad",
            Self::Relaxed => "relaxed",
            Self::Surprised => "surprised",
            Self::Shy => "shy",
            Self::Jealous => "jealous",
            Self::Bored => "bored",
            Self::Serious => "serious",
            Self::Suspicious => "suspicious",
            Self::Victory => "victory",
            Self::Sleep => "sleep",
            Self::Love => "love",
        }
    }

    /// Parse a tag body (without brackets). Case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(raw))
    }

    /// Coarse speaking style used by TTS backends.
    #[must_use]
    pub fn talk_style(self) -> TalkStyle {
        match self {
            Self::Angry => TalkStyle::Angry,
            Self::Happy => TalkStyle::Happy,
            Self::Sad => TalkStyle::Sad,
            _ => TalkStyle::Talk,
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaking style for synthesis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TalkStyle {
    #[default]
    Talk,
    Happy,
    Sad,
    Angry,
    Fear,
    Surprised,
}

/// A TTS-ready utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Talk {
    pub style: TalkStyle,
    /// Text to synthesize, with emotion tags removed.
    pub message: String,
}

/// One speakable unit of an assistant response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenplay {
    pub expression: Emotion,
    pub talk: Talk,
    /// Original text, tags included.
    pub text: String,
}

/// Stateful tagged-text parser.
///
/// Holds a single previous expression, not a stack.
#[derive(Debug, Default, Clone)]
pub struct ScreenplayParser {
    previous: Emotion,
}

impl ScreenplayParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// The expression applied to the next untagged text.
    pub fn current_expression(&self) -> Emotion {
        self.previous
    }

    /// Convert one piece of text into a [`Screenplay`].
    pub fn parse(&mut self, text: &str) -> Screenplay {
        if let Some(emotion) = first_tag(text).and_then(Emotion::parse) {
            self.previous = emotion;
        }
        let expression = self.previous;
        Screenplay {
            expression,
            talk: Talk {
                style: expression.talk_style(),
                message: strip_tags(text),
            },
            text: text.to_owned(),
        }
    }

    /// Convert a batch of texts, carrying the expression across them.
    pub fn parse_all<'a>(&mut self, texts: impl IntoIterator<Item = &'a str>) -> Vec<Screenplay> {
        texts.into_iter().map(|t| self.parse(t)).collect()
    }
}

/// Body of the first complete `[...]` group, if any.
pub(crate) fn first_tag(text: &str) -> Option<&str> {
    let open = text.find('[')?;
    let close = text[open + 1..].find(']')?;
    Some(&text[open + 1..open + 1 + close])
}

/// Remove every complete `[...]` group.
pub(crate) fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        match rest[open + 1..].find(']') {
            Some(close) => {
                out.push_str(&rest[..open]);
                rest = &rest[open + 1 + close + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}
