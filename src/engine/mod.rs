//! Engine boundary
//!
//! The demuxer/clock engine sits on both sides of the pipeline: it feeds
//! packets in and it consumes decoded bytes, supplies audio chunks and
//! backup textures. These traits are the only way the pipeline calls back
//! into it.

mod wire;

pub use wire::{AudioChunkOutcome, FrameSignal, MAX_CHUNK_BYTES};

use crate::decoder::DecoderId;
use crate::player::PlayerId;
use crate::renderer::RenderTexture;

/// Consumer of byte-accurate decoded output
pub trait FrameSink: Send + Sync {
    /// Called once per drained output buffer, including the final
    /// end-of-stream buffer (`is_completed == true`, possibly empty)
    fn on_decoded(&self, decoder_id: &DecoderId, data: Vec<u8>, presentation_time_us: i64, is_completed: bool);
}

/// Producer of decoded PCM for the audio output scheduler
pub trait AudioChunkProvider: Send + Sync {
    /// Fill up to `buf.len()` bytes for `stream_id`
    fn request_chunk(&self, stream_id: &PlayerId, buf: &mut [u8]) -> AudioChunkOutcome;
}

/// Source of a previously rendered texture used to repaint a rebuilt surface
pub trait BackupTextureSource: Send + Sync {
    fn backup_texture(&self, player_id: &PlayerId) -> Option<RenderTexture>;
}
