//! Top-level pipeline coordinator
//!
//! `Pipeline` owns the decoder pool and every per-id registry: decode
//! sessions, render threads, audio schedulers and player observers. Ids
//! are generated from a monotonic counter and never reused, so a stale id
//! fails lookup instead of aliasing a newer instance.

use crate::audio::{AudioAction, AudioDeviceFactory, AudioParam, AudioScheduler, AudioSpec};
use crate::decoder::{
    AudioFormat, DecodeMode, DecodeOutcome, DecodeSession, DecoderFactory, DecoderId, DecoderPool,
    MediaType, OutputSurface, PacketFlags, PoolStats, StreamFormat, VideoFormat, WarmUpHandle,
    WarmUpReport,
};
use crate::engine::{AudioChunkProvider, BackupTextureSource, FrameSignal, FrameSink};
use crate::player::{PlaybackRelay, PlayerId, PlayerObserver};
use crate::renderer::{RenderStats, RenderTarget, RenderTexture, RenderThread, Rotation, Viewport};
use crate::utils::config::Config;
use crate::utils::error::{PipelineError, Result};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type SessionRef = Arc<Mutex<DecodeSession>>;
type SchedulerRef = Arc<Mutex<AudioScheduler>>;

/// Builder for a `Pipeline`
pub struct PipelineBuilder {
    config: Config,
    decoder_factory: Option<Arc<dyn DecoderFactory>>,
    frame_sink: Option<Arc<dyn FrameSink>>,
    chunk_provider: Option<Arc<dyn AudioChunkProvider>>,
    backup_source: Option<Arc<dyn BackupTextureSource>>,
    audio_factory: Option<Arc<dyn AudioDeviceFactory>>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            decoder_factory: None,
            frame_sink: None,
            chunk_provider: None,
            backup_source: None,
            audio_factory: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_decoder_factory(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoder_factory = Some(factory);
        self
    }

    /// Consumer of byte-mode decoder output
    pub fn with_frame_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.frame_sink = Some(sink);
        self
    }

    pub fn with_chunk_provider(mut self, provider: Arc<dyn AudioChunkProvider>) -> Self {
        self.chunk_provider = Some(provider);
        self
    }

    pub fn with_backup_source(mut self, source: Arc<dyn BackupTextureSource>) -> Self {
        self.backup_source = Some(source);
        self
    }

    pub fn with_audio_device_factory(mut self, factory: Arc<dyn AudioDeviceFactory>) -> Self {
        self.audio_factory = Some(factory);
        self
    }

    /// Validate the configuration, create the pool and start warm-up
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let decoder_factory = self
            .decoder_factory
            .ok_or_else(|| PipelineError::Config("A decoder factory is required".to_string()))?;
        let frame_sink = self
            .frame_sink
            .ok_or_else(|| PipelineError::Config("A frame sink is required".to_string()))?;

        let capacities = self.config.pool.capacities();
        let pool = Arc::new(DecoderPool::new(decoder_factory, &capacities));
        let warm_up = if self.config.pool.warm_up {
            Some(pool.warm_up_async(capacities)?)
        } else {
            None
        };

        info!(
            "Pipeline ready (pool video={} audio={}, warm-up {})",
            self.config.pool.video_capacity,
            self.config.pool.audio_capacity,
            if warm_up.is_some() { "started" } else { "disabled" }
        );

        Ok(Pipeline {
            config: self.config,
            pool,
            warm_up: Mutex::new(warm_up),
            frame_sink,
            chunk_provider: self.chunk_provider,
            backup_source: self.backup_source,
            audio_factory: self.audio_factory,
            sessions: RwLock::new(HashMap::new()),
            renderers: Mutex::new(HashMap::new()),
            audio: RwLock::new(HashMap::new()),
            relay: Arc::new(PlaybackRelay::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Snapshot of pipeline registries
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub decoders: usize,
    pub render_threads: usize,
    pub audio_outputs: usize,
    pub players: usize,
    pub video_pool: PoolStats,
    pub audio_pool: PoolStats,
}

/// Coordinator owning the decoder pool and all per-id registries
pub struct Pipeline {
    config: Config,
    pool: Arc<DecoderPool>,
    warm_up: Mutex<Option<WarmUpHandle>>,
    frame_sink: Arc<dyn FrameSink>,
    chunk_provider: Option<Arc<dyn AudioChunkProvider>>,
    backup_source: Option<Arc<dyn BackupTextureSource>>,
    audio_factory: Option<Arc<dyn AudioDeviceFactory>>,
    sessions: RwLock<HashMap<DecoderId, SessionRef>>,
    renderers: Mutex<HashMap<PlayerId, RenderThread>>,
    audio: RwLock<HashMap<PlayerId, SchedulerRef>>,
    relay: Arc<PlaybackRelay>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<DecoderPool> {
        &self.pool
    }

    pub fn relay(&self) -> &Arc<PlaybackRelay> {
        &self.relay
    }

    /// Block until the startup warm-up finishes; `None` if it was not started
    /// or was already joined
    pub fn wait_for_warm_up(&self) -> Result<Option<WarmUpReport>> {
        match self.warm_up.lock().take() {
            Some(handle) => handle.join().map(Some),
            None => Ok(None),
        }
    }

    fn next_decoder_id(&self, media_type: MediaType) -> DecoderId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        DecoderId::new(format!("{}-{}", media_type, n))
    }

    fn session(&self, id: &DecoderId) -> Option<SessionRef> {
        let session = self.sessions.read().get(id).cloned();
        if session.is_none() {
            debug!("Unknown decoder {}", id);
        }
        session
    }

    fn scheduler(&self, stream_id: &PlayerId) -> Option<SchedulerRef> {
        let scheduler = self.audio.read().get(stream_id).cloned();
        if scheduler.is_none() {
            debug!("Unknown audio output {}", stream_id);
        }
        scheduler
    }

    fn open_session(&self, format: StreamFormat, mode: DecodeMode, surface: Option<Arc<dyn OutputSurface>>) -> Result<DecoderId> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PipelineError::Internal("Pipeline is shut down".to_string()));
        }

        let id = self.next_decoder_id(format.media_type());
        let session = DecodeSession::new(
            id.clone(),
            format,
            mode,
            surface,
            Arc::clone(&self.pool),
            Arc::clone(&self.frame_sink),
            self.config.decoder.input_timeout(),
            self.config.decoder.output_timeout(),
        )?;

        self.sessions
            .write()
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        Ok(id)
    }

    /// Create a video decode session
    ///
    /// `surface` is required for direct-to-surface mode and ignored otherwise.
    pub fn create_video_decoder(
        &self,
        mut format: VideoFormat,
        mode: DecodeMode,
        surface: Option<Arc<dyn OutputSurface>>,
    ) -> Result<DecoderId> {
        format.max_input_size = self.config.decoder.video_max_input_size;
        self.open_session(StreamFormat::Video(format), mode, surface)
    }

    /// Create a video decode session from the engine's integer info array
    pub fn create_video_decoder_from_info(
        &self,
        mime: &str,
        info: &[i32],
        surface: Option<Arc<dyn OutputSurface>>,
    ) -> Result<DecoderId> {
        let (format, mode) = VideoFormat::from_engine_info(mime, info)?;
        // The mode element is optional; fall back to the configured default
        let mode = if info.len() > 4 { mode } else { self.config.decoder.video_mode };
        self.create_video_decoder(format, mode, surface)
    }

    /// Create an audio decode session; audio always decodes to bytes
    pub fn create_audio_decoder(&self, mut format: AudioFormat) -> Result<DecoderId> {
        format.max_input_size = self.config.decoder.audio_max_input_size;
        self.open_session(StreamFormat::Audio(format), DecodeMode::ByteBuffer, None)
    }

    pub fn send_packet(&self, id: &DecoderId, payload: Option<&[u8]>, presentation_time_us: i64, flags: PacketFlags) -> DecodeOutcome {
        match self.session(id) {
            Some(session) => session.lock().send_packet(payload, presentation_time_us, flags),
            None => DecodeOutcome::DecoderNotFound,
        }
    }

    /// Pump decoder output without feeding a packet
    pub fn drain_decoder(&self, id: &DecoderId) -> DecodeOutcome {
        match self.session(id) {
            Some(session) => session.lock().drain(),
            None => DecodeOutcome::DecoderNotFound,
        }
    }

    /// Wait up to `wait` for a direct-to-surface frame and draw it
    ///
    /// Returns the packed frame signal. Unknown ids yield 0. The session
    /// lock is not held while waiting.
    pub fn request_video_frame(&self, id: &DecoderId, wait: Duration, width: u32, height: u32) -> u64 {
        let Some(session) = self.session(id) else {
            return FrameSignal::empty(false).pack();
        };

        let (waiter, completed) = {
            let session = session.lock();
            (session.frame_waiter(), session.is_completed())
        };

        match waiter {
            Some(waiter) => waiter.await_frame(wait, width, height).pack(),
            None => FrameSignal::empty(completed).pack(),
        }
    }

    pub fn is_decoder_completed(&self, id: &DecoderId) -> Option<bool> {
        self.session(id).map(|s| s.lock().is_completed())
    }

    pub fn flush_decoder(&self, id: &DecoderId) -> Result<()> {
        let session = self
            .session(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
        let result = session.lock().flush();
        result
    }

    /// Release a session and return its handle to the pool
    ///
    /// Returns false for unknown ids.
    pub fn release_decoder(&self, id: &DecoderId) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            debug!("Release of unknown decoder {}", id);
            return false;
        };
        session.lock().release();
        true
    }

    /// Start a render thread for `player_id`, replacing any existing one
    ///
    /// The previous thread is shut down before the new context is created.
    pub fn attach_render_target(&self, player_id: PlayerId, target: RenderTarget) -> Result<()> {
        if let Err(e) = self.detach_render_target(&player_id) {
            warn!("Previous render thread for {} did not stop cleanly: {}", player_id, e);
        }

        let thread = RenderThread::spawn(
            player_id.clone(),
            target,
            self.backup_source.clone(),
            self.config.render.shutdown_timeout(),
        )?;
        self.renderers.lock().insert(player_id, thread);
        Ok(())
    }

    /// Shut down the render thread for `player_id`, if any
    pub fn detach_render_target(&self, player_id: &PlayerId) -> Result<()> {
        let previous = self.renderers.lock().remove(player_id);
        match previous {
            Some(mut thread) => thread.shutdown(),
            None => Ok(()),
        }
    }

    pub fn request_render(&self, player_id: &PlayerId, texture: RenderTexture) {
        match self.renderers.lock().get(player_id) {
            Some(thread) => thread.render(texture),
            None => debug!("No render thread for {}, frame dropped", player_id),
        }
    }

    pub fn rebuild_surface(&self, player_id: &PlayerId) {
        match self.renderers.lock().get(player_id) {
            Some(thread) => thread.rebuild_surface(),
            None => debug!("No render thread for {}, rebuild ignored", player_id),
        }
    }

    /// Invalid sizes are rejected even when no thread is attached
    pub fn set_render_size(&self, player_id: &PlayerId, width: u32, height: u32) -> Result<()> {
        Viewport::new(width, height)?;
        match self.renderers.lock().get(player_id) {
            Some(thread) => thread.set_render_size(width, height),
            None => {
                debug!("No render thread for {}, size ignored", player_id);
                Ok(())
            }
        }
    }

    /// Rotations that are not a multiple of 90 degrees are rejected
    pub fn set_rotation(&self, player_id: &PlayerId, degrees: i32) -> Result<()> {
        Rotation::from_degrees(degrees)?;
        match self.renderers.lock().get(player_id) {
            Some(thread) => thread.set_rotation(degrees),
            None => {
                debug!("No render thread for {}, rotation ignored", player_id);
                Ok(())
            }
        }
    }

    pub fn render_stats(&self, player_id: &PlayerId) -> Option<RenderStats> {
        self.renderers.lock().get(player_id).map(|t| t.stats())
    }

    /// Create an audio output for `stream_id`, replacing any existing one
    pub fn create_audio_output(&self, stream_id: PlayerId, spec: AudioSpec) -> Result<()> {
        let factory = self
            .audio_factory
            .clone()
            .ok_or_else(|| PipelineError::Config("No audio device factory configured".to_string()))?;
        let provider = self
            .chunk_provider
            .clone()
            .ok_or_else(|| PipelineError::Config("No audio chunk provider configured".to_string()))?;

        let previous = self.audio.write().remove(&stream_id);
        if let Some(previous) = previous {
            warn!("Replacing audio output {}", stream_id);
            previous.lock().release();
        }

        let scheduler = AudioScheduler::new(stream_id.clone(), spec, &self.config.audio, factory, provider)?;
        self.audio
            .write()
            .insert(stream_id, Arc::new(Mutex::new(scheduler)));
        Ok(())
    }

    /// Apply a transport action; unknown streams are ignored
    pub fn audio_action(&self, stream_id: &PlayerId, action: AudioAction) -> Result<()> {
        if action == AudioAction::Release {
            let removed = self.audio.write().remove(stream_id);
            if let Some(scheduler) = removed {
                scheduler.lock().release();
            }
            return Ok(());
        }

        let Some(scheduler) = self.scheduler(stream_id) else {
            return Ok(());
        };
        let mut scheduler = scheduler.lock();
        match action {
            AudioAction::Play => scheduler.play(),
            AudioAction::Pause => scheduler.pause(),
            AudioAction::Flush => scheduler.flush(),
            AudioAction::Release => Ok(()),
        }
    }

    /// Apply a runtime parameter; unknown streams are ignored
    pub fn audio_config(&self, stream_id: &PlayerId, param: AudioParam) -> Result<()> {
        let Some(scheduler) = self.scheduler(stream_id) else {
            return Ok(());
        };
        let scheduler = scheduler.lock();
        match param {
            AudioParam::Volume(volume) => scheduler.set_volume(volume),
            AudioParam::PlayRate(rate) => scheduler.set_play_rate(rate),
        }
    }

    pub fn audio_position_us(&self, stream_id: &PlayerId) -> Option<u64> {
        self.scheduler(stream_id).map(|s| s.lock().position_us())
    }

    pub fn add_player(&self, player_id: PlayerId, observer: Arc<dyn PlayerObserver>) {
        self.relay.add(player_id, observer);
    }

    /// Unregister the observer and stop the player's render thread
    pub fn remove_player(&self, player_id: &PlayerId) {
        self.relay.remove(player_id);
        if let Err(e) = self.detach_render_target(player_id) {
            warn!("Render thread for {} did not stop cleanly: {}", player_id, e);
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            decoders: self.sessions.read().len(),
            render_threads: self.renderers.lock().len(),
            audio_outputs: self.audio.read().len(),
            players: self.relay.len(),
            video_pool: self.pool.stats(MediaType::Video),
            audio_pool: self.pool.stats(MediaType::Audio),
        }
    }

    /// Stop render threads, release audio and sessions, then clear the pool
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let renderers: Vec<_> = self.renderers.lock().drain().collect();
        for (player_id, mut thread) in renderers {
            if let Err(e) = thread.shutdown() {
                warn!("Render thread for {} did not stop cleanly: {}", player_id, e);
            }
        }

        let schedulers: Vec<_> = self.audio.write().drain().collect();
        for (_, scheduler) in schedulers {
            scheduler.lock().release();
        }

        let sessions: Vec<_> = self.sessions.write().drain().collect();
        for (_, session) in sessions {
            session.lock().release();
        }

        if let Err(e) = self.wait_for_warm_up() {
            warn!("{}", e);
        }
        self.pool.clear();
        info!("Pipeline shut down");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
