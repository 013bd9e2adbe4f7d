//! Audio output module for the playback pipeline
//!
//! The `AudioScheduler` keeps one output device fed by pulling decoded PCM
//! from the engine on a dedicated thread. Devices are injected through
//! `AudioDeviceFactory`; a cpal-backed factory is available behind the
//! `cpal-output` feature.

mod position;
mod scheduler;

#[cfg(feature = "cpal-output")]
mod cpal_output;

#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalDeviceFactory;
pub use position::PlaybackPosition;
pub use scheduler::{AudioScheduler, FeedState, PollOutcome};

use crate::utils::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PCM layout written to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of interleaved channels
    pub channels: u16,

    /// Bytes per sample (2 for 16-bit PCM)
    pub bytes_per_sample: u16,
}

impl AudioSpec {
    pub fn new(sample_rate: u32, channels: u16, bytes_per_sample: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 || bytes_per_sample == 0 {
            return Err(PipelineError::invalid_input(format!(
                "Invalid audio spec {} Hz, {} ch, {} bytes/sample",
                sample_rate, channels, bytes_per_sample
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
            bytes_per_sample,
        })
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    /// Whole frames worth of bytes covering `duration`
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_micros()) / 1_000_000;
        frames as usize * self.bytes_per_frame()
    }

    pub fn frames_to_us(&self, frames: u64) -> u64 {
        ((frames as u128 * 1_000_000) / self.sample_rate as u128) as u64
    }
}

/// Audio output device capability
///
/// Devices are driven by exactly one scheduler; calls never overlap.
pub trait AudioOutputDevice: Send {
    /// Queue PCM bytes; returns how many were accepted
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Raw played-frame counter; wraps at 2^32
    fn played_frames(&self) -> u32;

    /// Device buffer size in bytes
    fn buffer_capacity_bytes(&self) -> usize;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Stop playback and discard queued data
    fn stop(&mut self) -> Result<()>;

    fn set_volume(&mut self, volume: f32) -> Result<()>;

    /// Change speed; pitch is preserved where the device supports it
    fn set_playback_rate(&mut self, rate: f32) -> Result<()>;
}

/// Creates output devices for a given PCM layout
pub trait AudioDeviceFactory: Send + Sync {
    fn create(&self, spec: &AudioSpec) -> Result<Box<dyn AudioOutputDevice>>;
}

/// Transport actions accepted by an audio output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioAction {
    Play,
    Pause,
    Flush,
    Release,
}

/// Runtime parameters of an audio output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioParam {
    Volume(f32),
    PlayRate(f32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_sizes() {
        let spec = AudioSpec::new(48000, 2, 2).unwrap();
        assert_eq!(spec.bytes_per_frame(), 4);
        assert_eq!(spec.bytes_for(Duration::from_millis(10)), 1920);
        assert_eq!(spec.frames_to_us(48000), 1_000_000);
        assert_eq!(spec.frames_to_us(24), 500);
    }

    #[test]
    fn test_spec_rejects_zero() {
        assert!(AudioSpec::new(0, 2, 2).is_err());
        assert!(AudioSpec::new(44100, 0, 2).is_err());
        assert!(AudioSpec::new(44100, 2, 0).is_err());
    }
}
