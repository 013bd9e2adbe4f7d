//! Simulated audio output device
//!
//! The played-frame counter is a wrapping `u32`, like real devices expose.
//! A manual clock only advances through the probe; a realtime clock plays
//! queued frames as wall time passes.

use crate::audio::{AudioDeviceFactory, AudioOutputDevice, AudioSpec};
use crate::utils::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clock {
    Manual,
    Realtime,
}

struct DeviceState {
    spec: AudioSpec,
    clock: Clock,
    capacity: usize,
    queued: usize,
    written: u64,
    all_zero: bool,
    raw_frames: u32,
    playing: bool,
    paused: bool,
    volume: f32,
    play_rate: f32,
    fail_writes: bool,
    last_tick: Instant,
    carry_us: u128,
}

impl DeviceState {
    /// Consume `frames` of queued audio and advance the raw counter
    fn consume(&mut self, frames: u64) {
        let bpf = self.spec.bytes_per_frame();
        let frames = frames.min((self.queued / bpf) as u64);
        self.queued -= frames as usize * bpf;
        self.raw_frames = self.raw_frames.wrapping_add(frames as u32);
    }

    fn tick(&mut self) {
        let now = Instant::now();
        if self.clock == Clock::Realtime && self.playing {
            let elapsed_us = now.duration_since(self.last_tick).as_micros() + self.carry_us;
            let scaled_us = (elapsed_us as f64 * self.play_rate as f64) as u128;
            let frames = scaled_us * self.spec.sample_rate as u128 / 1_000_000;
            let used_us = frames * 1_000_000 / self.spec.sample_rate as u128;
            self.carry_us = ((scaled_us - used_us) as f64 / self.play_rate as f64) as u128;
            self.consume(frames as u64);
        }
        self.last_tick = now;
    }
}

struct Shared {
    state: Mutex<DeviceState>,
    written: Condvar,
}

/// Test and diagnostics handle onto a `SimAudioDevice`
#[derive(Clone)]
pub struct SimAudioProbe {
    shared: Arc<Shared>,
}

impl SimAudioProbe {
    /// Total bytes accepted by the device
    pub fn written_bytes(&self) -> u64 {
        self.shared.state.lock().written
    }

    /// Every accepted byte was zero
    pub fn all_zero(&self) -> bool {
        self.shared.state.lock().all_zero
    }

    /// Play `frames` of queued audio (manual clock)
    pub fn advance(&self, frames: u64) {
        self.shared.state.lock().consume(frames);
    }

    /// Overwrite the raw played-frame counter
    pub fn set_raw_frames(&self, raw: u32) {
        self.shared.state.lock().raw_frames = raw;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.shared.state.lock().fail_writes = fail;
    }

    pub fn volume(&self) -> f32 {
        self.shared.state.lock().volume
    }

    pub fn play_rate(&self) -> f32 {
        self.shared.state.lock().play_rate
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Wait until at least `bytes` were written in total
    pub fn wait_for_written(&self, bytes: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.written < bytes {
            if self.shared.written.wait_until(&mut state, deadline).timed_out() {
                return state.written >= bytes;
            }
        }
        true
    }
}

/// Simulated output device
pub struct SimAudioDevice {
    shared: Arc<Shared>,
    live: Arc<AtomicUsize>,
}

impl Drop for SimAudioDevice {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AudioOutputDevice for SimAudioDevice {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = self.shared.state.lock();
        if state.fail_writes {
            return Err(PipelineError::Audio("simulated write failure".to_string()));
        }
        state.tick();

        let accepted = data.len().min(state.capacity - state.queued);
        state.queued += accepted;
        state.written += accepted as u64;
        if data[..accepted].iter().any(|&b| b != 0) {
            state.all_zero = false;
        }
        drop(state);
        self.shared.written.notify_all();
        Ok(accepted)
    }

    fn played_frames(&self) -> u32 {
        let mut state = self.shared.state.lock();
        state.tick();
        state.raw_frames
    }

    fn buffer_capacity_bytes(&self) -> usize {
        self.shared.state.lock().capacity
    }

    fn play(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.tick();
        state.playing = true;
        state.paused = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.tick();
        state.playing = false;
        state.paused = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.playing = false;
        state.paused = false;
        state.queued = 0;
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.shared.state.lock().volume = volume;
        Ok(())
    }

    fn set_playback_rate(&mut self, rate: f32) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.tick();
        state.play_rate = rate;
        Ok(())
    }
}

/// Factory for simulated devices
pub struct SimAudioDeviceFactory {
    clock: Clock,
    capacity: Option<usize>,
    buffer: Duration,
    failing: bool,
    created: AtomicUsize,
    live: Arc<AtomicUsize>,
    last: Mutex<Option<SimAudioProbe>>,
}

impl SimAudioDeviceFactory {
    /// Devices with a fixed byte capacity whose clock only moves through the probe
    pub fn manual(capacity_bytes: usize) -> Self {
        Self::with_clock(Clock::Manual, Some(capacity_bytes), Duration::ZERO)
    }

    /// Devices that play in real time with a buffer of `buffer` duration
    pub fn realtime(buffer: Duration) -> Self {
        Self::with_clock(Clock::Realtime, None, buffer)
    }

    fn with_clock(clock: Clock, capacity: Option<usize>, buffer: Duration) -> Self {
        Self {
            clock,
            capacity,
            buffer,
            failing: false,
            created: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            last: Mutex::new(None),
        }
    }

    /// Every creation fails
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Probe for the most recently created device
    pub fn last_probe(&self) -> Option<SimAudioProbe> {
        self.last.lock().clone()
    }
}

impl AudioDeviceFactory for SimAudioDeviceFactory {
    fn create(&self, spec: &AudioSpec) -> Result<Box<dyn AudioOutputDevice>> {
        if self.failing {
            return Err(PipelineError::Audio("simulated device creation failure".to_string()));
        }

        let capacity = self
            .capacity
            .unwrap_or_else(|| spec.bytes_for(self.buffer))
            .max(spec.bytes_per_frame());

        let shared = Arc::new(Shared {
            state: Mutex::new(DeviceState {
                spec: *spec,
                clock: self.clock,
                capacity,
                queued: 0,
                written: 0,
                all_zero: true,
                raw_frames: 0,
                playing: false,
                paused: false,
                volume: 1.0,
                play_rate: 1.0,
                fail_writes: false,
                last_tick: Instant::now(),
                carry_us: 0,
            }),
            written: Condvar::new(),
        });

        self.created.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);
        *self.last.lock() = Some(SimAudioProbe {
            shared: Arc::clone(&shared),
        });

        Ok(Box::new(SimAudioDevice {
            shared,
            live: Arc::clone(&self.live),
        }))
    }
}
