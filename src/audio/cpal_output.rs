//! cpal-backed audio output device
//!
//! cpal streams are not `Send`, so each device keeps its stream on a small
//! owner thread and talks to it over a command channel. PCM travels through
//! a lock-free ring buffer; the stream callback counts the frames it
//! actually plays.

use crate::audio::{AudioDeviceFactory, AudioOutputDevice, AudioSpec};
use crate::utils::error::{IntoPipelineError, PipelineError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{error, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

enum Command {
    Play,
    Pause,
    Shutdown,
}

/// Creates cpal devices on the default output device
pub struct CpalDeviceFactory {
    buffer: Duration,
}

impl CpalDeviceFactory {
    pub fn new(buffer: Duration) -> Self {
        Self { buffer }
    }
}

impl AudioDeviceFactory for CpalDeviceFactory {
    fn create(&self, spec: &AudioSpec) -> Result<Box<dyn AudioOutputDevice>> {
        if spec.bytes_per_sample != 2 {
            return Err(PipelineError::Audio(format!(
                "cpal output expects 16-bit PCM, got {} bytes per sample",
                spec.bytes_per_sample
            )));
        }
        Ok(Box::new(CpalAudioDevice::open(*spec, self.buffer)?))
    }
}

struct StreamShared {
    played_frames: AtomicU32,
    volume_bits: AtomicU32,
    discard: AtomicBool,
}

/// One cpal output stream fed from a ring buffer of i16 samples
pub struct CpalAudioDevice {
    producer: HeapProd<i16>,
    shared: Arc<StreamShared>,
    commands: Sender<Command>,
    owner: Option<thread::JoinHandle<()>>,
    capacity_bytes: usize,
    pending_byte: Option<u8>,
}

impl CpalAudioDevice {
    fn open(spec: AudioSpec, buffer: Duration) -> Result<Self> {
        let capacity_bytes = spec.bytes_for(buffer).max(spec.bytes_per_frame());
        let ring = HeapRb::<i16>::new(capacity_bytes / 2);
        let (producer, mut consumer) = ring.split();

        let shared = Arc::new(StreamShared {
            played_frames: AtomicU32::new(0),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            discard: AtomicBool::new(false),
        });

        let (command_tx, command_rx) = unbounded::<Command>();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let callback_shared = Arc::clone(&shared);
        let channels = spec.channels as usize;

        let owner = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let Some(device) = host.default_output_device() else {
                    let _ = ready_tx.send(Err(PipelineError::Audio(
                        "No default output device found".to_string(),
                    )));
                    return;
                };

                let config = StreamConfig {
                    channels: spec.channels,
                    sample_rate: SampleRate(spec.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let stream = device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            if callback_shared.discard.swap(false, Ordering::AcqRel) {
                                while consumer.try_pop().is_some() {}
                            }
                            let volume = f32::from_bits(callback_shared.volume_bits.load(Ordering::Relaxed));
                            let mut popped = 0usize;
                            for sample in data.iter_mut() {
                                *sample = match consumer.try_pop() {
                                    Some(s) => {
                                        popped += 1;
                                        (s as f32 / i16::MAX as f32) * volume
                                    }
                                    None => 0.0,
                                };
                            }
                            let frames = (popped / channels) as u32;
                            callback_shared.played_frames.fetch_add(frames, Ordering::AcqRel);
                        },
                        |err| error!("Audio stream error: {}", err),
                        None,
                    )
                    .audio_err("Failed to create audio stream");

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = command_rx.recv() {
                    let result = match command {
                        Command::Play => stream.play().audio_err("Failed to start audio stream"),
                        Command::Pause => stream.pause().audio_err("Failed to pause audio stream"),
                        Command::Shutdown => break,
                    };
                    if let Err(e) = result {
                        warn!("{}", e);
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = owner.join();
                return Err(e);
            }
            Err(_) => {
                let _ = owner.join();
                return Err(PipelineError::Audio("Audio owner thread died".to_string()));
            }
        }

        Ok(Self {
            producer,
            shared,
            commands: command_tx,
            owner: Some(owner),
            capacity_bytes,
            pending_byte: None,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PipelineError::Audio("Audio owner thread is gone".to_string()))
    }
}

impl AudioOutputDevice for CpalAudioDevice {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut accepted = 0;
        let mut bytes = data.iter().copied();

        if let Some(low) = self.pending_byte {
            let Some(high) = bytes.next() else {
                return Ok(0);
            };
            if self.producer.try_push(i16::from_le_bytes([low, high])).is_err() {
                return Ok(0);
            }
            self.pending_byte = None;
            accepted += 1;
        }

        let rest = &data[accepted..];
        let vacant = self.producer.vacant_len();
        let samples: Vec<i16> = rest
            .chunks_exact(2)
            .take(vacant)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let pushed = self.producer.push_slice(&samples);
        accepted += pushed * 2;

        // Keep a dangling odd byte for the next write
        if pushed == rest.len() / 2 && rest.len() % 2 == 1 {
            self.pending_byte = rest.last().copied();
            accepted += 1;
        }
        Ok(accepted)
    }

    fn played_frames(&self) -> u32 {
        self.shared.played_frames.load(Ordering::Acquire)
    }

    fn buffer_capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    fn play(&mut self) -> Result<()> {
        self.send(Command::Play)
    }

    fn pause(&mut self) -> Result<()> {
        self.send(Command::Pause)
    }

    fn stop(&mut self) -> Result<()> {
        self.send(Command::Pause)?;
        self.shared.discard.store(true, Ordering::Release);
        self.pending_byte = None;
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn set_playback_rate(&mut self, rate: f32) -> Result<()> {
        if (rate - 1.0).abs() <= f32::EPSILON {
            return Ok(());
        }
        Err(PipelineError::Audio(format!(
            "cpal output cannot time-stretch (requested rate {})",
            rate
        )))
    }
}

impl Drop for CpalAudioDevice {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
    }
}
