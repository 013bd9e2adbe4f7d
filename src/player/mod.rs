//! Player module for the playback pipeline
//!
//! Player identity, lifecycle states and events, the observer relay that
//! fans engine notifications in to one observer per player, and the
//! `Pipeline` coordinator that owns every per-id registry.

mod pipeline;
mod relay;

pub use pipeline::{Pipeline, PipelineBuilder, PipelineStats};
pub use relay::PlaybackRelay;

use crate::utils::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque player (and audio stream) identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Player lifecycle state, owned and driven by the engine
///
/// Ordinals match the values exchanged with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    Unknown = 0,
    Initializing = 1,
    Prepared = 2,
    Buffering = 3,
    Ready = 4,
    Playing = 5,
    Pause = 6,
    Stop = 7,
    Error = 8,
    Completed = 9,
}

impl TryFrom<i32> for PlayerState {
    type Error = PipelineError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => PlayerState::Unknown,
            1 => PlayerState::Initializing,
            2 => PlayerState::Prepared,
            3 => PlayerState::Buffering,
            4 => PlayerState::Ready,
            5 => PlayerState::Playing,
            6 => PlayerState::Pause,
            7 => PlayerState::Stop,
            8 => PlayerState::Error,
            9 => PlayerState::Completed,
            other => {
                return Err(PipelineError::invalid_input(format!(
                    "unknown player state {}",
                    other
                )))
            }
        })
    }
}

/// Asynchronous player events
///
/// The accompanying value is a stringified payload: cache time in seconds
/// for `UpdateCacheTime`, the numeric error code for `OnError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerEvent {
    FirstFrameRendered = 0,
    SeekDone = 1,
    PlayEnd = 2,
    UpdateCacheTime = 3,
    OnError = 4,
}

impl TryFrom<i32> for PlayerEvent {
    type Error = PipelineError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => PlayerEvent::FirstFrameRendered,
            1 => PlayerEvent::SeekDone,
            2 => PlayerEvent::PlayEnd,
            3 => PlayerEvent::UpdateCacheTime,
            4 => PlayerEvent::OnError,
            other => {
                return Err(PipelineError::invalid_input(format!(
                    "unknown player event {}",
                    other
                )))
            }
        })
    }
}

/// Receiver of one player's notifications
///
/// Called from engine threads; implementations must not block.
pub trait PlayerObserver: Send + Sync {
    /// Current playback time in seconds
    fn notify_time(&self, player_id: &PlayerId, time: f64);

    fn notify_state(&self, player_id: &PlayerId, state: PlayerState);

    fn notify_event(&self, player_id: &PlayerId, event: PlayerEvent, value: &str);
}
