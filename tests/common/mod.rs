//! Shared fixtures for the integration tests

#![allow(dead_code)]

use playback_pipeline::audio::AudioDeviceFactory;
use playback_pipeline::sim::{SimAudioDeviceFactory, SimDecoderFactory, SimEngine};
use playback_pipeline::{Config, Pipeline};
use std::sync::Arc;
use std::time::Duration;

/// A pipeline wired to simulated backends, with handles onto each of them
pub struct TestFixture {
    pub pipeline: Pipeline,
    pub decoders: Arc<SimDecoderFactory>,
    pub engine: Arc<SimEngine>,
    pub audio: Arc<SimAudioDeviceFactory>,
}

impl TestFixture {
    /// Warm-up disabled, 1 ms audio pull period, manual 4 KiB audio devices
    pub fn new() -> Self {
        Self::with(test_config(), SimAudioDeviceFactory::manual(4096))
    }

    pub fn with(config: Config, audio: SimAudioDeviceFactory) -> Self {
        let decoders = Arc::new(SimDecoderFactory::new());
        let engine = Arc::new(SimEngine::new());
        let audio = Arc::new(audio);

        let pipeline = Pipeline::builder()
            .with_config(config)
            .with_decoder_factory(decoders.clone())
            .with_frame_sink(engine.clone())
            .with_chunk_provider(engine.clone())
            .with_backup_source(engine.clone())
            .with_audio_device_factory(audio.clone() as Arc<dyn AudioDeviceFactory>)
            .build()
            .expect("pipeline should build");

        Self {
            pipeline,
            decoders,
            engine,
            audio,
        }
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pool.warm_up = false;
    config.audio.pull_period_ms = 1;
    config.audio.idle_sleep_ms = 1;
    config
}

/// Poll `check` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}
