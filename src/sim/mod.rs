//! In-process simulated backends
//!
//! Every capability the pipeline consumes has a simulated implementation
//! here: hardware decoders, output and graphics surfaces, audio devices and
//! the engine itself. The binary uses them for smoke runs; tests use their
//! probes and logs to observe what the pipeline did.

mod audio;
mod decoder;
mod engine;
mod surface;

pub use audio::{SimAudioDevice, SimAudioDeviceFactory, SimAudioProbe};
pub use decoder::{SimDecoder, SimDecoderFactory};
pub use engine::{ChunkScript, DecodedFrame, Notification, RecordingObserver, SimEngine};
pub use surface::{SimOutputSurface, SimSurface, SurfaceEvent, SurfaceLog};
