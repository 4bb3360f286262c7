//! Conversation state machine.

use serde::{Deserialize, Serialize};

/// What the assistant is doing right now.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    #[default]
    Idle,
    /// A model response is streaming in.
    Processing,
    /// Audio is playing on the avatar.
    Speaking,
    /// The model is inside a reasoning section. Does not block the loops.
    Thinking,
}

impl ChatState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Thinking => "thinking",
        }
    }

    /// Transition table. `None` means the signal does not change the state.
    #[must_use]
    pub fn next(self, signal: StateSignal) -> Option<Self> {
        use ChatState::{Idle, Processing, Speaking, Thinking};
        use StateSignal as S;

        match (self, signal) {
            (Idle, S::SessionStarted) => Some(Processing),
            (Processing | Thinking, S::SessionFinished) => Some(Idle),
            (Processing, S::ThinkingStarted) => Some(Thinking),
            (Thinking, S::ThinkingFinished) => Some(Processing),
            (Idle | Processing | Thinking, S::SpeechStarted) => Some(Speaking),
            (Speaking, S::SpeechFinished { processing: true }) => Some(Processing),
            (Speaking, S::SpeechFinished { processing: false }) => Some(Idle),
            (Processing | Thinking | Speaking, S::Interrupted) => Some(Idle),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input events of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSignal {
    SessionStarted,
    SessionFinished,
    ThinkingStarted,
    ThinkingFinished,
    SpeechStarted,
    /// Playback ended; `processing` tells whether a response is still streaming.
    SpeechFinished { processing: bool },
    Interrupted,
}
