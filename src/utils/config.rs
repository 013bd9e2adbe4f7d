//! Configuration management for the playback pipeline
//!
//! Configuration is read from TOML files and environment variables. The
//! decoder pool capacities in `[pool]` are read once at startup and drive
//! the warm-up task.

use crate::decoder::{DecodeMode, MediaType, PoolCapacities};
use crate::utils::error::{IntoPipelineError, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "PLAYBACK_PIPELINE";

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decoder instance pool
    pub pool: PoolConfig,

    /// Decode session settings
    pub decoder: DecoderConfig,

    /// Render thread settings
    pub render: RenderConfig,

    /// Audio output settings
    pub audio: AudioConfig,

    /// General settings
    pub general: GeneralConfig,
}

/// Decoder pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pooled video decoders kept warm
    pub video_capacity: usize,

    /// Pooled audio decoders kept warm
    pub audio_capacity: usize,

    /// Pre-create decoders in the background when the pipeline starts
    pub warm_up: bool,
}

/// Decode session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Bound on waiting for a decoder input slot, in milliseconds
    pub input_timeout_ms: u64,

    /// Bound on waiting for a decoder output slot, in milliseconds
    pub output_timeout_ms: u64,

    /// Default maximum input size for video packets
    pub video_max_input_size: usize,

    /// Default maximum input size for audio packets
    pub audio_max_input_size: usize,

    /// Output mode used for video sessions when the caller does not choose
    pub video_mode: DecodeMode,
}

/// Render thread configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Default wait for a decoded frame, in milliseconds
    pub frame_wait_ms: u64,

    /// How long `shutdown` waits for the render thread to exit
    pub shutdown_timeout_ms: u64,
}

/// Audio output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Duration of audio requested per pull, in milliseconds
    pub pull_period_ms: u64,

    /// Sleep between polls when the device buffer is full, in milliseconds
    pub idle_sleep_ms: u64,

    /// Device buffer length, in milliseconds
    pub device_buffer_ms: u64,

    /// Bytes per PCM sample (2 for 16-bit output)
    pub bytes_per_sample: u16,

    /// Initial volume (0.0 - 1.0)
    pub volume: f32,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            video_capacity: 2,
            audio_capacity: 2,
            warm_up: true,
        }
    }
}

impl PoolConfig {
    /// Per-type target capacities for the decoder pool
    pub fn capacities(&self) -> PoolCapacities {
        let mut capacities = PoolCapacities::new();
        capacities.insert(MediaType::Video, self.video_capacity);
        capacities.insert(MediaType::Audio, self.audio_capacity);
        capacities
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            input_timeout_ms: 10,
            output_timeout_ms: 10,
            video_max_input_size: 2 * 1024 * 1024,
            audio_max_input_size: 4096,
            video_mode: DecodeMode::DirectToSurface,
        }
    }
}

impl DecoderConfig {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn output_timeout(&self) -> Duration {
        Duration::from_millis(self.output_timeout_ms)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_wait_ms: 30,
            shutdown_timeout_ms: 500,
        }
    }
}

impl RenderConfig {
    pub fn frame_wait(&self) -> Duration {
        Duration::from_millis(self.frame_wait_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            pull_period_ms: 10,
            idle_sleep_ms: 5,
            device_buffer_ms: 100,
            bytes_per_sample: 2,
            volume: 1.0,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. System config file (/etc/playback-pipeline/config.toml on Linux)
    /// 3. User config file (~/.config/playback-pipeline/config.toml on Linux)
    /// 4. Environment variables (PLAYBACK_PIPELINE_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::read_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::read_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from an explicit file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as TOML to the given path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).config_err("Failed to create config directory")?;
        }

        let toml = toml::to_string_pretty(self).config_err("Failed to serialize config")?;
        std::fs::write(path, toml).config_err("Failed to write config file")?;

        Ok(())
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).config_err("Failed to read config file")?;
        toml::from_str(&contents).config_err("Failed to parse config file")
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_override("POOL_VIDEO")? {
            self.pool.video_capacity = value;
        }

        if let Some(value) = env_override("POOL_AUDIO")? {
            self.pool.audio_capacity = value;
        }

        if let Some(value) = env_override("POOL_WARM_UP")? {
            self.pool.warm_up = value;
        }

        if let Some(value) = env_override("AUDIO_PULL_PERIOD_MS")? {
            self.audio.pull_period_ms = value;
        }

        if let Ok(log_level) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.decoder.input_timeout_ms == 0 || self.decoder.output_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "Decoder slot timeouts must be non-zero".to_string(),
            ));
        }

        if self.decoder.video_max_input_size == 0 || self.decoder.audio_max_input_size == 0 {
            return Err(PipelineError::Config(
                "Decoder input sizes must be non-zero".to_string(),
            ));
        }

        if self.audio.pull_period_ms == 0 || self.audio.device_buffer_ms < self.audio.pull_period_ms {
            return Err(PipelineError::Config(
                "Audio device buffer must hold at least one pull period".to_string(),
            ));
        }

        if !matches!(self.audio.bytes_per_sample, 1 | 2 | 4) {
            return Err(PipelineError::Config(format!(
                "Unsupported bytes per sample: {}",
                self.audio.bytes_per_sample
            )));
        }

        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(PipelineError::Config(
                "Audio volume must be between 0.0 and 1.0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(PipelineError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/playback-pipeline/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA")
            .ok()
            .map(|p| PathBuf::from(p).join("PlaybackPipeline").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from(
            "/Library/Application Support/PlaybackPipeline/config.toml",
        ));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("playback-pipeline").join("config.toml"))
    }
}

fn env_override<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    let name = format!("{}_{}", ENV_PREFIX, key);
    match std::env::var(&name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::Config(format!("Invalid {}", name))),
        Err(_) => Ok(None),
    }
}
