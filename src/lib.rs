//! Device-facing playback pipeline
//!
//! Pooled hardware decoders, one coalescing render thread per surface and a
//! pull-driven audio output scheduler, tied together by `player::Pipeline`.
//! Hardware capabilities are traits; `sim` provides in-process backends.

pub mod audio;
pub mod decoder;
pub mod engine;
pub mod player;
pub mod renderer;
pub mod sim;
pub mod utils;

pub use player::{Pipeline, PipelineBuilder};
pub use utils::config::Config;
pub use utils::error::{PipelineError, Result};
