//! Decoder module for the playback pipeline
//!
//! This module drives hardware decoders through a feed/drain protocol. The
//! decoder itself is an injected capability (`HardwareDecoder`), handles
//! are recycled through `DecoderPool`, and `DecodeSession` binds one pooled
//! handle to one stream configuration.

mod codec_config;
mod pool;
mod session;

pub use codec_config::{
    audio_specific_config, profile_to_object_type, sampling_frequency_index, AacProfile,
    SbrExtension,
};
pub use pool::{DecoderPool, PoolCapacities, PoolStats, PooledDecoder, WarmUpHandle, WarmUpReport};
pub use session::{DecodeSession, FrameWaiter, SessionState};

use crate::utils::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Media type tag used to key the decoder pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

impl MediaType {
    /// MIME type used when a decoder is created for this media type
    pub fn default_mime(&self) -> &'static str {
        match self {
            MediaType::Video => "video/avc",
            MediaType::Audio => "audio/mp4a-latm",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => write!(f, "video"),
            MediaType::Audio => write!(f, "audio"),
        }
    }
}

/// How decoded video leaves the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Decoded images are released straight onto the bound output surface
    DirectToSurface,

    /// Decoded bytes are copied out and forwarded to the engine
    ByteBuffer,
}

impl DecodeMode {
    /// Map the engine's integer mode; unknown values fall back to direct mode
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => DecodeMode::ByteBuffer,
            _ => DecodeMode::DirectToSurface,
        }
    }
}

/// Packet flag bitmask passed with every `send_packet`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u32);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    pub const KEY_FRAME: PacketFlags = PacketFlags(1);
    pub const CODEC_CONFIG: PacketFlags = PacketFlags(2);
    pub const END_OF_STREAM: PacketFlags = PacketFlags(4);
    pub const PARTIAL_FRAME: PacketFlags = PacketFlags(8);
    pub const DECODE_ONLY: PacketFlags = PacketFlags(32);

    pub const fn from_bits(bits: u32) -> Self {
        PacketFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        PacketFlags(self.0 | rhs.0)
    }
}

/// Tagged result of a feed/drain cycle
///
/// The discriminants are the integers exchanged with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DecodeOutcome {
    Success = 0,
    /// No progress this cycle; not an error
    Again = 1,
    NotStarted = 2,
    NoInputBuffer = 3,
    InputTooLarge = 4,
    InputInvalid = 5,
    DecoderNotFound = 6,
    DecoderError = 7,
}

impl DecodeOutcome {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Caller should back off and try the same packet again
    pub fn is_retryable(self) -> bool {
        matches!(self, DecodeOutcome::Again | DecodeOutcome::NoInputBuffer)
    }

    /// The packet was rejected; the session remains usable
    pub fn is_input_error(self) -> bool {
        matches!(self, DecodeOutcome::InputInvalid | DecodeOutcome::InputTooLarge)
    }
}

impl TryFrom<i32> for DecodeOutcome {
    type Error = PipelineError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => DecodeOutcome::Success,
            1 => DecodeOutcome::Again,
            2 => DecodeOutcome::NotStarted,
            3 => DecodeOutcome::NoInputBuffer,
            4 => DecodeOutcome::InputTooLarge,
            5 => DecodeOutcome::InputInvalid,
            6 => DecodeOutcome::DecoderNotFound,
            7 => DecodeOutcome::DecoderError,
            other => {
                return Err(PipelineError::invalid_input(format!(
                    "unknown decode outcome {}",
                    other
                )))
            }
        })
    }
}

/// Video stream parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub profile: i32,
    pub level: i32,
    pub max_input_size: usize,
}

impl VideoFormat {
    pub fn new(mime: impl Into<String>, width: u32, height: u32, profile: i32, level: i32) -> Self {
        Self {
            mime: mime.into(),
            width,
            height,
            profile,
            level,
            max_input_size: 2 * 1024 * 1024,
        }
    }

    /// Build from the engine's integer array `[width, height, profile, level, (mode)]`
    pub fn from_engine_info(mime: &str, info: &[i32]) -> Result<(Self, DecodeMode)> {
        if info.len() < 4 {
            return Err(PipelineError::invalid_input("Invalid video info format"));
        }
        if info[0] <= 0 || info[1] <= 0 {
            return Err(PipelineError::invalid_input(format!(
                "Invalid video dimensions {}x{}",
                info[0], info[1]
            )));
        }

        let format = Self::new(mime, info[0] as u32, info[1] as u32, info[2], info[3]);
        let mode = info.get(4).copied().map(DecodeMode::from_raw).unwrap_or(DecodeMode::DirectToSurface);
        Ok((format, mode))
    }
}

/// Audio stream parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub mime: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub profile: AacProfile,
    /// Codec-specific configuration bytes
    pub config: Vec<u8>,
    pub max_input_size: usize,
}

impl AudioFormat {
    /// Create an AAC format, synthesizing its codec config bytes
    pub fn aac(sample_rate: u32, channels: u16, profile: AacProfile, sbr: Option<SbrExtension>) -> Self {
        let config = audio_specific_config(profile, sample_rate, channels, sbr);
        Self {
            mime: MediaType::Audio.default_mime().to_string(),
            sample_rate,
            channels,
            profile,
            config,
            max_input_size: 4096,
        }
    }
}

/// Immutable stream configuration bound to a decode session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl StreamFormat {
    pub fn media_type(&self) -> MediaType {
        match self {
            StreamFormat::Video(_) => MediaType::Video,
            StreamFormat::Audio(_) => MediaType::Audio,
        }
    }

    pub fn mime(&self) -> &str {
        match self {
            StreamFormat::Video(v) => &v.mime,
            StreamFormat::Audio(a) => &a.mime,
        }
    }

    pub fn max_input_size(&self) -> usize {
        match self {
            StreamFormat::Video(v) => v.max_input_size,
            StreamFormat::Audio(a) => a.max_input_size,
        }
    }

    /// Configuration used to pre-create pooled decoders before real use
    pub fn placeholder(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Video => StreamFormat::Video(VideoFormat::new(media_type.default_mime(), 640, 360, 0, 0)),
            MediaType::Audio => StreamFormat::Audio(AudioFormat::aac(44100, 2, AacProfile::Lc, None)),
        }
    }
}

/// An input slot handed out by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    pub index: usize,
    pub capacity: usize,
}

/// A filled output slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    pub index: usize,
    pub presentation_time_us: i64,
    /// Decoded payload size; for direct-to-surface output `data` stays empty
    pub size: usize,
    pub data: Vec<u8>,
    pub end_of_stream: bool,
}

/// Result of polling the decoder for output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    Buffer(OutputBuffer),
    FormatChanged,
    TryAgainLater,
    BuffersChanged,
}

/// Hardware decoder capability
///
/// Mirrors the platform codec protocol: indices returned from
/// `dequeue_*` must be handed back through `queue_input` or
/// `release_output`. Dropping the decoder destroys the underlying resource.
pub trait HardwareDecoder: Send {
    /// Return to the unconfigured state so the handle can be reused
    fn reset(&mut self) -> Result<()>;

    /// Bind a stream configuration and, for direct video, an output surface
    fn configure(&mut self, format: &StreamFormat, surface: Option<Arc<dyn OutputSurface>>) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Wait up to `timeout` for a free input slot
    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<InputSlot>>;

    fn queue_input(&mut self, index: usize, data: &[u8], presentation_time_us: i64, flags: PacketFlags) -> Result<()>;

    /// Wait up to `timeout` for decoded output
    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus>;

    /// Give an output slot back; `render` releases the image to the bound surface
    fn release_output(&mut self, index: usize, render: bool) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// Creates new hardware decoder handles
pub trait DecoderFactory: Send + Sync {
    fn create(&self, media_type: MediaType) -> Result<Box<dyn HardwareDecoder>>;
}

/// Surface that receives decoded images in direct-to-surface mode
pub trait OutputSurface: Send + Sync {
    /// Producer side: the decoder released an image with this timestamp
    fn post_frame(&self, presentation_time_us: i64);

    /// Wait up to `timeout` for a new image; returns its timestamp
    fn await_frame(&self, timeout: Duration) -> Option<i64>;

    /// Draw the latched image into the currently bound target of the given size
    fn draw(&self, width: u32, height: u32) -> Result<()>;
}

/// Opaque decoder identifier, unique per live session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderId(String);

impl DecoderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
