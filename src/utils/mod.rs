//! Utility module for the playback pipeline
//!
//! - Error handling with custom error types
//! - Configuration management
//! - Position formatting for diagnostics

pub mod config;
pub mod error;

pub use config::{AudioConfig, Config, DecoderConfig, GeneralConfig, PoolConfig, RenderConfig};
pub use error::{IntoPipelineError, PipelineError, Result};

/// Initialize the pipeline configuration from files and environment
pub fn load_config() -> Result<Config> {
    Config::load()
}

/// Format a microsecond position for display as "MM:SS.mmm" or "HH:MM:SS.mmm"
pub fn format_position_us(position_us: u64) -> String {
    let total_ms = position_us / 1_000;
    let millis = total_ms % 1_000;
    let total_secs = total_ms / 1_000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}
