//! Pull-driven audio output scheduler
//!
//! One scheduler per audio stream. A dedicated thread repeatedly polls:
//! when the device has room for at least one pull period, a chunk is
//! requested from the engine and written. The scheduler is the only owner
//! of the device handle, the written-byte counter and the position tracker.

use crate::audio::{AudioDeviceFactory, AudioOutputDevice, AudioSpec, PlaybackPosition};
use crate::engine::{AudioChunkOutcome, AudioChunkProvider, MAX_CHUNK_BYTES};
use crate::player::PlayerId;
use crate::utils::config::AudioConfig;
use crate::utils::error::{PipelineError, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Whether the scheduler still asks the engine for data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Feeding,
    /// End of stream seen; only silence is written until flush
    Drained,
    /// The engine reported an error; the loop stops
    Failed,
}

/// Result of one scheduler step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Less than one pull period of space available
    Idle,
    /// Decoded bytes written
    Wrote(usize),
    /// Zero bytes written
    Silence(usize),
    EndOfStream,
    Failed,
    /// The device is released
    Closed,
}

struct Inner {
    stream_id: PlayerId,
    spec: AudioSpec,
    factory: Arc<dyn AudioDeviceFactory>,
    provider: Arc<dyn AudioChunkProvider>,
    device: Mutex<Option<Box<dyn AudioOutputDevice>>>,
    written: AtomicU64,
    position: Mutex<PlaybackPosition>,
    state: Mutex<FeedState>,
    scratch: Mutex<Vec<u8>>,
    pull_bytes: usize,
    idle_sleep: Duration,
    volume: Mutex<f32>,
    play_rate: Mutex<f32>,
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Feeds one audio output device from the engine
pub struct AudioScheduler {
    inner: Arc<Inner>,
    worker: Option<Worker>,
}

impl AudioScheduler {
    /// Create the device; failure is returned and no scheduler exists
    pub fn new(
        stream_id: PlayerId,
        spec: AudioSpec,
        config: &AudioConfig,
        factory: Arc<dyn AudioDeviceFactory>,
        provider: Arc<dyn AudioChunkProvider>,
    ) -> Result<Self> {
        let mut device = factory.create(&spec)?;
        let volume = config.volume.clamp(0.0, 1.0);
        device.set_volume(volume)?;

        let pull_bytes = spec
            .bytes_for(Duration::from_millis(config.pull_period_ms))
            .max(spec.bytes_per_frame());
        let capacity = device.buffer_capacity_bytes();
        if capacity < pull_bytes {
            warn!(
                "Audio {}: device buffer {} bytes is smaller than one pull period ({} bytes)",
                stream_id, capacity, pull_bytes
            );
        }

        info!(
            "Audio output {} created: {} Hz, {} ch, buffer {} bytes",
            stream_id, spec.sample_rate, spec.channels, capacity
        );

        Ok(Self {
            inner: Arc::new(Inner {
                stream_id,
                spec,
                factory,
                provider,
                device: Mutex::new(Some(device)),
                written: AtomicU64::new(0),
                position: Mutex::new(PlaybackPosition::new()),
                state: Mutex::new(FeedState::Feeding),
                scratch: Mutex::new(Vec::new()),
                pull_bytes,
                idle_sleep: Duration::from_millis(config.idle_sleep_ms.max(1)),
                volume: Mutex::new(volume),
                play_rate: Mutex::new(1.0),
            }),
            worker: None,
        })
    }

    pub fn stream_id(&self) -> &PlayerId {
        &self.inner.stream_id
    }

    pub fn spec(&self) -> AudioSpec {
        self.inner.spec
    }

    pub fn feed_state(&self) -> FeedState {
        *self.inner.state.lock()
    }

    pub fn is_playing(&self) -> bool {
        self.worker.is_some()
    }

    /// Total bytes written since creation or the last flush
    pub fn bytes_written(&self) -> u64 {
        self.inner.written.load(Ordering::Acquire)
    }

    /// Free device buffer space in bytes
    pub fn available_space(&self) -> usize {
        self.inner.available_space()
    }

    /// Wraparound-safe playback position in microseconds
    pub fn position_us(&self) -> u64 {
        let frames = self.inner.absolute_frames();
        self.inner.spec.frames_to_us(frames)
    }

    /// Run one scheduling step on the calling thread
    pub fn poll_once(&self) -> PollOutcome {
        self.inner.poll_once()
    }

    /// Start the device and the pull loop, replacing any running loop
    pub fn play(&mut self) -> Result<()> {
        self.stop_loop();
        self.inner.with_device(|device| device.play())?;

        let cancel = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&self.inner);
        let loop_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name(format!("audio-{}", self.inner.stream_id))
            .spawn(move || inner.run(&loop_cancel))?;

        self.worker = Some(Worker { cancel, handle });
        debug!("Audio {}: playing", self.inner.stream_id);
        Ok(())
    }

    /// Stop the pull loop and pause the device
    pub fn pause(&mut self) -> Result<()> {
        self.stop_loop();
        self.inner.with_device(|device| device.pause())?;
        debug!("Audio {}: paused", self.inner.stream_id);
        Ok(())
    }

    /// Stop the loop, recreate the device and zero every counter
    pub fn flush(&mut self) -> Result<()> {
        self.stop_loop();

        let mut slot = self.inner.device.lock();
        let Some(mut old) = slot.take() else {
            return Err(PipelineError::Audio(format!(
                "Audio output {} is released",
                self.inner.stream_id
            )));
        };
        if let Err(e) = old.stop() {
            warn!("Audio {}: stop before flush failed: {}", self.inner.stream_id, e);
        }
        drop(old);

        let mut device = self.inner.factory.create(&self.inner.spec)?;
        device.set_volume(*self.inner.volume.lock())?;
        let rate = *self.inner.play_rate.lock();
        if (rate - 1.0).abs() > f32::EPSILON {
            device.set_playback_rate(rate)?;
        }
        *slot = Some(device);
        drop(slot);

        self.inner.written.store(0, Ordering::Release);
        self.inner.position.lock().reset();
        *self.inner.state.lock() = FeedState::Feeding;

        info!("Audio {}: flushed", self.inner.stream_id);
        Ok(())
    }

    /// Stop the loop and destroy the device; idempotent
    pub fn release(&mut self) {
        self.stop_loop();
        if let Some(mut device) = self.inner.device.lock().take() {
            if let Err(e) = device.stop() {
                warn!("Audio {}: stop on release failed: {}", self.inner.stream_id, e);
            }
            info!("Audio {}: released", self.inner.stream_id);
        }
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = volume.clamp(0.0, 1.0);
        *self.inner.volume.lock() = volume;
        self.inner.with_device(|device| device.set_volume(volume))
    }

    /// Change playback speed without changing pitch
    pub fn set_play_rate(&self, rate: f32) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(PipelineError::invalid_input(format!("Invalid play rate {}", rate)));
        }
        *self.inner.play_rate.lock() = rate;
        self.inner.with_device(|device| device.set_playback_rate(rate))
    }

    fn stop_loop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.store(true, Ordering::Release);
            if worker.handle.join().is_err() {
                error!("Audio {}: pull loop panicked", self.inner.stream_id);
            }
        }
    }
}

impl Drop for AudioScheduler {
    fn drop(&mut self) {
        self.release();
    }
}

impl Inner {
    fn with_device<T>(&self, f: impl FnOnce(&mut dyn AudioOutputDevice) -> Result<T>) -> Result<T> {
        let mut slot = self.device.lock();
        match slot.as_mut() {
            Some(device) => f(device.as_mut()),
            None => Err(PipelineError::Audio(format!(
                "Audio output {} is released",
                self.stream_id
            ))),
        }
    }

    fn absolute_frames(&self) -> u64 {
        // Read and apply under the device lock so updates land in counter order
        let slot = self.device.lock();
        let mut position = self.position.lock();
        match slot.as_ref() {
            Some(device) => position.update(device.played_frames()),
            None => position.absolute(),
        }
    }

    fn available_space(&self) -> usize {
        let Some(capacity) = self.device.lock().as_ref().map(|d| d.buffer_capacity_bytes()) else {
            return 0;
        };
        let consumed = self.absolute_frames() * self.spec.bytes_per_frame() as u64;
        let written = self.written.load(Ordering::Acquire);
        let queued = written.saturating_sub(consumed);
        (capacity as u64).saturating_sub(queued) as usize
    }

    fn run(&self, cancel: &AtomicBool) {
        debug!("Audio {}: pull loop started", self.stream_id);
        while !cancel.load(Ordering::Acquire) {
            match self.poll_once() {
                PollOutcome::Failed | PollOutcome::Closed => break,
                PollOutcome::Idle | PollOutcome::Wrote(0) | PollOutcome::Silence(0) => {
                    thread::sleep(self.idle_sleep)
                }
                PollOutcome::Wrote(_) | PollOutcome::Silence(_) | PollOutcome::EndOfStream => {}
            }
        }
        debug!("Audio {}: pull loop exited", self.stream_id);
    }

    fn poll_once(&self) -> PollOutcome {
        let state = *self.state.lock();
        if state == FeedState::Failed {
            return PollOutcome::Failed;
        }
        if self.device.lock().is_none() {
            return PollOutcome::Closed;
        }

        let available = self.available_space();
        if available < self.pull_bytes {
            return PollOutcome::Idle;
        }

        let frame = self.spec.bytes_per_frame();
        let request = available.min(MAX_CHUNK_BYTES as usize);
        let request = request - request % frame;

        let mut scratch = self.scratch.lock();
        if scratch.len() < request {
            scratch.resize(request, 0);
        }
        let buf = &mut scratch[..request];

        if state == FeedState::Drained {
            buf.fill(0);
            return PollOutcome::Silence(self.write(buf));
        }

        match self.provider.request_chunk(&self.stream_id, buf) {
            AudioChunkOutcome::Normal(size) => {
                let size = (size as usize).min(request);
                PollOutcome::Wrote(self.write(&buf[..size]))
            }
            AudioChunkOutcome::Silence(size) => {
                let size = (size as usize).min(request);
                let zeros = &mut buf[..size];
                zeros.fill(0);
                PollOutcome::Silence(self.write(zeros))
            }
            AudioChunkOutcome::EndOfStream => {
                info!("Audio {}: end of stream, padding with silence", self.stream_id);
                *self.state.lock() = FeedState::Drained;
                PollOutcome::EndOfStream
            }
            AudioChunkOutcome::Error => {
                error!("Audio {}: engine reported an error, stopping", self.stream_id);
                *self.state.lock() = FeedState::Failed;
                PollOutcome::Failed
            }
        }
    }

    /// Write to the device; failures count as zero progress
    fn write(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let result = self.with_device(|device| device.write(data));
        match result {
            Ok(written) => {
                self.written.fetch_add(written as u64, Ordering::AcqRel);
                written
            }
            Err(e) => {
                warn!("Audio {}: write of {} bytes failed: {}", self.stream_id, data.len(), e);
                0
            }
        }
    }
}
