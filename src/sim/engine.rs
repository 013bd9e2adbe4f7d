//! Simulated engine and observer
//!
//! `SimEngine` stands on the engine side of every boundary trait. By default
//! it answers each chunk request with a full buffer of a 16-bit sawtooth;
//! scripts and byte budgets let callers shape what a stream returns.

use crate::decoder::DecoderId;
use crate::engine::{AudioChunkOutcome, AudioChunkProvider, BackupTextureSource, FrameSink};
use crate::player::{PlayerEvent, PlayerId, PlayerObserver, PlayerState};
use crate::renderer::RenderTexture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// One scripted answer to a chunk request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkScript {
    /// Up to this many bytes of tone
    Tone(u32),
    Silence(u32),
    EndOfStream,
    Error,
}

/// Output buffer delivered through `FrameSink`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFrame {
    pub decoder_id: String,
    pub data: Vec<u8>,
    pub presentation_time_us: i64,
    pub is_completed: bool,
}

#[derive(Default)]
struct StreamState {
    script: VecDeque<ChunkScript>,
    budget: Option<u64>,
    requests: usize,
    phase: u16,
}

impl StreamState {
    fn tone(&mut self, buf: &mut [u8]) {
        for pair in buf.chunks_exact_mut(2) {
            self.phase = self.phase.wrapping_add(0x0400);
            let sample = (self.phase as i16) / 8;
            pair.copy_from_slice(&sample.to_le_bytes());
        }
        // A sawtooth can hit an all-zero sample; keep payloads observably nonzero
        if let Some(first) = buf.first_mut() {
            *first |= 1;
        }
    }

    fn next_chunk(&mut self, buf: &mut [u8]) -> AudioChunkOutcome {
        self.requests += 1;

        let limit = match self.script.pop_front() {
            Some(ChunkScript::EndOfStream) => return AudioChunkOutcome::EndOfStream,
            Some(ChunkScript::Error) => return AudioChunkOutcome::Error,
            Some(ChunkScript::Silence(size)) => {
                return AudioChunkOutcome::Silence(size.min(buf.len() as u32));
            }
            Some(ChunkScript::Tone(size)) => (size as usize).min(buf.len()),
            None => buf.len(),
        };

        let size = match self.budget.as_mut() {
            Some(0) => return AudioChunkOutcome::EndOfStream,
            Some(remaining) => {
                let size = limit.min(*remaining as usize);
                *remaining -= size as u64;
                size
            }
            None => limit,
        };

        self.tone(&mut buf[..size]);
        AudioChunkOutcome::Normal(size as u32)
    }
}

/// In-process engine implementing every callback the pipeline makes
#[derive(Default)]
pub struct SimEngine {
    frames: Mutex<Vec<DecodedFrame>>,
    streams: Mutex<HashMap<PlayerId, StreamState>>,
    backups: Mutex<HashMap<PlayerId, RenderTexture>>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every buffer received through `FrameSink`, in order
    pub fn decoded_frames(&self) -> Vec<DecodedFrame> {
        self.frames.lock().clone()
    }

    /// Queue answers for the next chunk requests of `stream_id`
    pub fn script_chunks(&self, stream_id: &PlayerId, script: Vec<ChunkScript>) {
        self.streams
            .lock()
            .entry(stream_id.clone())
            .or_default()
            .script
            .extend(script);
    }

    /// Report end of stream once `bytes` of tone were handed out
    pub fn set_audio_budget(&self, stream_id: &PlayerId, bytes: u64) {
        self.streams.lock().entry(stream_id.clone()).or_default().budget = Some(bytes);
    }

    pub fn chunk_requests(&self, stream_id: &PlayerId) -> usize {
        self.streams.lock().get(stream_id).map_or(0, |s| s.requests)
    }

    pub fn set_backup_texture(&self, player_id: &PlayerId, texture: RenderTexture) {
        self.backups.lock().insert(player_id.clone(), texture);
    }
}

impl FrameSink for SimEngine {
    fn on_decoded(&self, decoder_id: &DecoderId, data: Vec<u8>, presentation_time_us: i64, is_completed: bool) {
        self.frames.lock().push(DecodedFrame {
            decoder_id: decoder_id.as_str().to_string(),
            data,
            presentation_time_us,
            is_completed,
        });
    }
}

impl AudioChunkProvider for SimEngine {
    fn request_chunk(&self, stream_id: &PlayerId, buf: &mut [u8]) -> AudioChunkOutcome {
        self.streams
            .lock()
            .entry(stream_id.clone())
            .or_default()
            .next_chunk(buf)
    }
}

impl BackupTextureSource for SimEngine {
    fn backup_texture(&self, player_id: &PlayerId) -> Option<RenderTexture> {
        self.backups.lock().get(player_id).copied()
    }
}

/// One notification seen by a `RecordingObserver`
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Time(f64),
    State(PlayerState),
    Event(PlayerEvent, String),
}

/// Observer that keeps every notification it receives
#[derive(Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }
}

impl PlayerObserver for RecordingObserver {
    fn notify_time(&self, _player_id: &PlayerId, time: f64) {
        self.seen.lock().push(Notification::Time(time));
    }

    fn notify_state(&self, _player_id: &PlayerId, state: PlayerState) {
        self.seen.lock().push(Notification::State(state));
    }

    fn notify_event(&self, _player_id: &PlayerId, event: PlayerEvent, value: &str) {
        self.seen.lock().push(Notification::Event(event, value.to_string()));
    }
}
