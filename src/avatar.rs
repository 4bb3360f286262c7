//! Avatar playback collaborator.

use crate::error::Result;
use crate::pipeline::messages::AudioClip;
use crate::screenplay::Screenplay;
use async_trait::async_trait;

/// Plays synthesized speech on the avatar, with the screenplay's expression.
///
/// Both methods are best-effort: the orchestrator logs failures and moves on.
#[async_trait]
pub trait Avatar: Send + Sync {
    /// Play `audio` and resolve once playback has finished or was stopped.
    async fn speak(&self, audio: AudioClip, screenplay: &Screenplay) -> Result<()>;

    /// Stop any in-progress playback.
    fn stop_speaking(&self) -> Result<()>;
}

/// Avatar that discards audio immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAvatar;

#[async_trait]
impl Avatar for NullAvatar {
    async fn speak(&self, _audio: AudioClip, _screenplay: &Screenplay) -> Result<()> {
        Ok(())
    }

    fn stop_speaking(&self) -> Result<()> {
        Ok(())
    }
}
