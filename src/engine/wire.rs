//! Packed values exchanged with the engine
//!
//! Both layouts are fixed wire contracts:
//! - frame signal (u64): bit 63 frame available, bit 62 stream completed,
//!   low 62 bits presentation timestamp;
//! - audio chunk result (u32): top byte outcome tag, low 24 bits byte count.

use crate::utils::error::{PipelineError, Result};

const FRAME_AVAILABLE_BIT: u64 = 1 << 63;
const STREAM_COMPLETED_BIT: u64 = 1 << 62;
const TIMESTAMP_MASK: u64 = STREAM_COMPLETED_BIT - 1;

/// Largest byte count representable in a packed chunk result
pub const MAX_CHUNK_BYTES: u32 = (1 << 24) - 1;

const TAG_NORMAL: u32 = 0;
const TAG_END_OF_STREAM: u32 = 1;
const TAG_SILENCE: u32 = 2;
const TAG_ERROR: u32 = 3;

/// Result of a blocking frame wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSignal {
    pub available: bool,
    pub completed: bool,
    /// Only the low 62 bits survive packing
    pub timestamp: u64,
}

impl FrameSignal {
    pub fn frame(timestamp: u64, completed: bool) -> Self {
        Self {
            available: true,
            completed,
            timestamp,
        }
    }

    pub fn empty(completed: bool) -> Self {
        Self {
            available: false,
            completed,
            timestamp: 0,
        }
    }

    pub fn pack(&self) -> u64 {
        let mut packed = self.timestamp & TIMESTAMP_MASK;
        if self.available {
            packed |= FRAME_AVAILABLE_BIT;
        }
        if self.completed {
            packed |= STREAM_COMPLETED_BIT;
        }
        packed
    }

    pub fn unpack(packed: u64) -> Self {
        Self {
            available: packed & FRAME_AVAILABLE_BIT != 0,
            completed: packed & STREAM_COMPLETED_BIT != 0,
            timestamp: packed & TIMESTAMP_MASK,
        }
    }
}

/// Result of an audio chunk request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioChunkOutcome {
    /// This many bytes of decoded audio were written into the buffer
    Normal(u32),
    EndOfStream,
    /// Nothing decoded yet; write this many zero bytes
    Silence(u32),
    Error,
}

impl AudioChunkOutcome {
    pub fn pack(&self) -> Result<u32> {
        let (tag, size) = match *self {
            AudioChunkOutcome::Normal(size) => (TAG_NORMAL, size),
            AudioChunkOutcome::EndOfStream => (TAG_END_OF_STREAM, 0),
            AudioChunkOutcome::Silence(size) => (TAG_SILENCE, size),
            AudioChunkOutcome::Error => (TAG_ERROR, 0),
        };
        if size > MAX_CHUNK_BYTES {
            return Err(PipelineError::invalid_input(format!(
                "chunk size {} exceeds {}",
                size, MAX_CHUNK_BYTES
            )));
        }
        Ok((tag << 24) | size)
    }

    pub fn unpack(packed: u32) -> Result<Self> {
        let size = packed & MAX_CHUNK_BYTES;
        match packed >> 24 {
            TAG_NORMAL => Ok(AudioChunkOutcome::Normal(size)),
            TAG_END_OF_STREAM => Ok(AudioChunkOutcome::EndOfStream),
            TAG_SILENCE => Ok(AudioChunkOutcome::Silence(size)),
            TAG_ERROR => Ok(AudioChunkOutcome::Error),
            tag => Err(PipelineError::invalid_input(format!("unknown chunk tag {}", tag))),
        }
    }
}
