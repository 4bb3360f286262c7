//! Streaming response pipeline: session → TTS loop → speak loop.

pub mod coordinator;
pub mod messages;
pub mod queue;
pub mod segment;
pub mod session;
pub mod state;
pub mod tts;
