//! Decode session
//!
//! A `DecodeSession` binds one pooled decoder handle to one immutable
//! stream configuration and runs the feed/drain protocol against it.
//! Calls on a session must be serialized by the caller; the pipeline keeps
//! each session behind its own mutex.

use crate::decoder::{
    DecodeMode, DecodeOutcome, DecoderId, DecoderPool, MediaType, OutputStatus, OutputSurface,
    PacketFlags, PooledDecoder, StreamFormat,
};
use crate::engine::{FrameSignal, FrameSink};
use crate::utils::error::{PipelineError, Result};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a decode session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    /// At least one packet has been accepted since start or the last flush
    Running,
    Flushed,
    Released,
}

impl SessionState {
    fn accepts_packets(self) -> bool {
        matches!(
            self,
            SessionState::Started | SessionState::Running | SessionState::Flushed
        )
    }
}

/// Blocking frame wait for a direct-to-surface session
///
/// Holds only the surface and the completion flag, so it can be used
/// without locking the session that produced it.
#[derive(Clone)]
pub struct FrameWaiter {
    surface: Arc<dyn OutputSurface>,
    completed: Arc<AtomicBool>,
}

impl FrameWaiter {
    /// Wait up to `wait` for a decoded image and draw it at `width`x`height`
    pub fn await_frame(&self, wait: Duration, width: u32, height: u32) -> FrameSignal {
        let frame = self.surface.await_frame(wait);
        // Read after the wait so an end of stream drained meanwhile is reported
        let completed = self.completed.load(Ordering::Acquire);

        let Some(timestamp) = frame else {
            return FrameSignal::empty(completed);
        };

        match self.surface.draw(width, height) {
            Ok(()) => FrameSignal::frame(timestamp.max(0) as u64, completed),
            Err(e) => {
                warn!("Failed to draw decoded frame at {}: {}", timestamp, e);
                FrameSignal::empty(completed)
            }
        }
    }
}

/// One configured hardware decoder driven through feed/drain
pub struct DecodeSession {
    id: DecoderId,
    format: StreamFormat,
    mode: DecodeMode,
    decoder: Option<PooledDecoder>,
    pool: Arc<DecoderPool>,
    state: SessionState,
    completed: Arc<AtomicBool>,
    surface: Option<Arc<dyn OutputSurface>>,
    sink: Arc<dyn FrameSink>,
    input_timeout: Duration,
    output_timeout: Duration,
}

impl DecodeSession {
    /// Acquire a handle from `pool`, configure it for `format` and start it
    ///
    /// Audio always decodes to bytes. Direct-to-surface video requires a
    /// surface. A handle that fails to configure is discarded, not pooled.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: DecoderId,
        format: StreamFormat,
        mode: DecodeMode,
        surface: Option<Arc<dyn OutputSurface>>,
        pool: Arc<DecoderPool>,
        sink: Arc<dyn FrameSink>,
        input_timeout: Duration,
        output_timeout: Duration,
    ) -> Result<Self> {
        let media_type = format.media_type();
        let mode = match media_type {
            MediaType::Audio => DecodeMode::ByteBuffer,
            MediaType::Video => mode,
        };

        if mode == DecodeMode::DirectToSurface && surface.is_none() {
            return Err(PipelineError::invalid_input(format!(
                "Decoder {} needs an output surface for direct rendering",
                id
            )));
        }

        let mut decoder = pool.acquire(media_type)?;
        let bound_surface = match mode {
            DecodeMode::DirectToSurface => surface.clone(),
            DecodeMode::ByteBuffer => None,
        };

        let setup = {
            let handle = decoder.decoder_mut();
            handle
                .reset()
                .and_then(|_| handle.configure(&format, bound_surface))
                .and_then(|_| handle.start())
        };
        if let Err(e) = setup {
            error!("Failed to start {} decoder {}: {}", media_type, id, e);
            pool.discard(decoder);
            return Err(e);
        }

        info!(
            "Decoder {} started ({}, {:?}, handle #{})",
            id,
            format.mime(),
            mode,
            decoder.serial()
        );

        Ok(Self {
            id,
            format,
            mode,
            decoder: Some(decoder),
            pool,
            state: SessionState::Started,
            completed: Arc::new(AtomicBool::new(false)),
            surface: match mode {
                DecodeMode::DirectToSurface => surface,
                DecodeMode::ByteBuffer => None,
            },
            sink,
            input_timeout,
            output_timeout,
        })
    }

    pub fn id(&self) -> &DecoderId {
        &self.id
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// End-of-stream has been drained and no flush happened since
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Serial of the held pool handle, `None` once released
    pub fn decoder_serial(&self) -> Option<u64> {
        self.decoder.as_ref().map(|d| d.serial())
    }

    /// Frame waiter for direct-to-surface sessions
    pub fn frame_waiter(&self) -> Option<FrameWaiter> {
        self.surface.as_ref().map(|surface| FrameWaiter {
            surface: Arc::clone(surface),
            completed: Arc::clone(&self.completed),
        })
    }

    /// Feed one packet, then drain whatever output is ready
    ///
    /// `payload` may be `None` or empty only for end-of-stream packets.
    /// Once end-of-stream has been drained every further packet is rejected
    /// with `DecoderError` until `flush`.
    pub fn send_packet(&mut self, payload: Option<&[u8]>, presentation_time_us: i64, flags: PacketFlags) -> DecodeOutcome {
        if !self.state.accepts_packets() || self.decoder.is_none() {
            return DecodeOutcome::NotStarted;
        }

        if self.is_completed() {
            warn!(
                "Decoder {} already drained end-of-stream, flush before sending more packets",
                self.id
            );
            return DecodeOutcome::DecoderError;
        }

        let fed = self.feed(payload, presentation_time_us, flags);
        let drained = self.drain();

        if fed != DecodeOutcome::Success {
            return fed;
        }

        self.state = SessionState::Running;
        match drained {
            DecodeOutcome::DecoderError => DecodeOutcome::DecoderError,
            _ => DecodeOutcome::Success,
        }
    }

    fn feed(&mut self, payload: Option<&[u8]>, presentation_time_us: i64, flags: PacketFlags) -> DecodeOutcome {
        let end_of_stream = flags.is_end_of_stream();
        let data = payload.unwrap_or(&[]);

        if !end_of_stream && data.is_empty() {
            warn!("Decoder {}: dropping empty packet at {}", self.id, presentation_time_us);
            return DecodeOutcome::InputInvalid;
        }

        let max_input = self.format.max_input_size();
        if !end_of_stream && data.len() > max_input {
            warn!(
                "Decoder {}: packet of {} bytes exceeds max input size {}",
                self.id,
                data.len(),
                max_input
            );
            return DecodeOutcome::InputTooLarge;
        }

        let input_timeout = self.input_timeout;
        let Some(decoder) = self.decoder.as_mut() else {
            return DecodeOutcome::NotStarted;
        };
        let handle = decoder.decoder_mut();

        let slot = match handle.dequeue_input(input_timeout) {
            Ok(Some(slot)) => slot,
            Ok(None) => return DecodeOutcome::NoInputBuffer,
            Err(e) => {
                error!("Decoder {}: failed to dequeue input: {}", self.id, e);
                return DecodeOutcome::DecoderError;
            }
        };

        if end_of_stream {
            return match handle.queue_input(slot.index, &[], presentation_time_us, PacketFlags::END_OF_STREAM) {
                Ok(()) => {
                    debug!("Decoder {}: queued end-of-stream", self.id);
                    DecodeOutcome::Success
                }
                Err(e) => {
                    error!("Decoder {}: failed to queue end-of-stream: {}", self.id, e);
                    DecodeOutcome::DecoderError
                }
            };
        }

        if data.len() > slot.capacity {
            warn!(
                "Decoder {}: packet of {} bytes exceeds input slot capacity {}",
                self.id,
                data.len(),
                slot.capacity
            );
            // Hand the slot back empty so it is not lost.
            if let Err(e) = handle.queue_input(slot.index, &[], presentation_time_us, PacketFlags::NONE) {
                warn!("Decoder {}: failed to return input slot: {}", self.id, e);
            }
            return DecodeOutcome::InputTooLarge;
        }

        match handle.queue_input(slot.index, data, presentation_time_us, flags) {
            Ok(()) => {
                debug!(
                    "Decoder {}: queued {} bytes at {}",
                    self.id,
                    data.len(),
                    presentation_time_us
                );
                DecodeOutcome::Success
            }
            Err(e) => {
                error!("Decoder {}: failed to queue input: {}", self.id, e);
                DecodeOutcome::DecoderError
            }
        }
    }

    /// Pump one output slot without feeding
    pub fn drain(&mut self) -> DecodeOutcome {
        let output_timeout = self.output_timeout;
        let mode = self.mode;
        let Some(decoder) = self.decoder.as_mut() else {
            return DecodeOutcome::NotStarted;
        };
        let handle = decoder.decoder_mut();

        let buffer = match handle.dequeue_output(output_timeout) {
            Ok(OutputStatus::Buffer(buffer)) => buffer,
            Ok(OutputStatus::FormatChanged) => {
                debug!("Decoder {}: output format changed", self.id);
                return DecodeOutcome::Again;
            }
            Ok(OutputStatus::TryAgainLater) | Ok(OutputStatus::BuffersChanged) => {
                return DecodeOutcome::Again;
            }
            Err(e) => {
                error!("Decoder {}: failed to dequeue output: {}", self.id, e);
                return DecodeOutcome::DecoderError;
            }
        };

        if buffer.end_of_stream {
            info!("Decoder {}: end of stream reached", self.id);
            self.completed.store(true, Ordering::Release);
        }
        let completed = self.completed.load(Ordering::Acquire);

        let released = match mode {
            DecodeMode::DirectToSurface => {
                let render = !(buffer.end_of_stream && buffer.size == 0);
                handle.release_output(buffer.index, render)
            }
            DecodeMode::ByteBuffer => {
                let index = buffer.index;
                self.sink
                    .on_decoded(&self.id, buffer.data, buffer.presentation_time_us, completed);
                handle.release_output(index, false)
            }
        };

        match released {
            Ok(()) => DecodeOutcome::Success,
            Err(e) => {
                error!("Decoder {}: failed to release output: {}", self.id, e);
                DecodeOutcome::DecoderError
            }
        }
    }

    /// Discard in-flight data and clear the completed flag
    pub fn flush(&mut self) -> Result<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(PipelineError::decoder_error(format!(
                "Decoder {} is released",
                self.id
            )));
        };
        decoder.decoder_mut().flush()?;
        self.completed.store(false, Ordering::Release);
        self.state = SessionState::Flushed;
        debug!("Decoder {} flushed", self.id);
        Ok(())
    }

    /// Stop and hand the decoder back to the pool; idempotent
    pub fn release(&mut self) {
        self.state = SessionState::Released;
        let Some(mut decoder) = self.decoder.take() else {
            return;
        };

        let handle = decoder.decoder_mut();
        if let Err(e) = handle.flush() {
            warn!("Decoder {}: flush on release failed: {}", self.id, e);
        }
        if let Err(e) = handle.stop() {
            warn!("Decoder {}: stop on release failed: {}", self.id, e);
        }

        info!("Decoder {} released (handle #{})", self.id, decoder.serial());
        self.pool.release(decoder);
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{PoolCapacities, VideoFormat};
    use crate::sim::{SimDecoderFactory, SimEngine, SimOutputSurface};

    fn pool(factory: Arc<SimDecoderFactory>) -> Arc<DecoderPool> {
        let mut caps = PoolCapacities::new();
        caps.insert(MediaType::Video, 2);
        caps.insert(MediaType::Audio, 2);
        Arc::new(DecoderPool::new(factory, &caps))
    }

    fn video_session(mode: DecodeMode, engine: Arc<SimEngine>) -> (DecodeSession, Arc<DecoderPool>) {
        let pool = pool(Arc::new(SimDecoderFactory::new()));
        let surface: Arc<dyn OutputSurface> = Arc::new(SimOutputSurface::new());
        let format = StreamFormat::Video(VideoFormat::new("video/avc", 320, 240, 0, 0));
        let session = DecodeSession::new(
            DecoderId::new("video-1"),
            format,
            mode,
            Some(surface),
            Arc::clone(&pool),
            engine,
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .unwrap();
        (session, pool)
    }

    #[test]
    fn test_end_of_stream_completes_session() {
        let (mut session, _pool) = video_session(DecodeMode::DirectToSurface, Arc::new(SimEngine::new()));
        assert_eq!(session.state(), SessionState::Started);

        let outcome = session.send_packet(None, 0, PacketFlags::END_OF_STREAM);
        assert_eq!(outcome, DecodeOutcome::Success);
        assert!(!session.is_completed());

        assert_eq!(session.drain(), DecodeOutcome::Success);
        assert!(session.is_completed());

        let outcome = session.send_packet(Some(&[1, 2, 3]), 40_000, PacketFlags::NONE);
        assert_eq!(outcome, DecodeOutcome::DecoderError);

        session.flush().unwrap();
        assert!(!session.is_completed());
        assert_eq!(session.state(), SessionState::Flushed);
        assert_eq!(session.send_packet(Some(&[1, 2, 3]), 40_000, PacketFlags::NONE), DecodeOutcome::Success);
    }

    #[test]
    fn test_input_validation() {
        let (mut session, _pool) = video_session(DecodeMode::DirectToSurface, Arc::new(SimEngine::new()));

        assert_eq!(session.send_packet(None, 0, PacketFlags::NONE), DecodeOutcome::InputInvalid);
        assert_eq!(session.send_packet(Some(&[]), 0, PacketFlags::KEY_FRAME), DecodeOutcome::InputInvalid);

        let oversized = vec![0u8; 2 * 1024 * 1024 + 1];
        assert_eq!(session.send_packet(Some(&oversized), 0, PacketFlags::NONE), DecodeOutcome::InputTooLarge);

        // The session stays usable after rejected input
        assert_eq!(session.send_packet(Some(&[0, 0, 1]), 0, PacketFlags::KEY_FRAME), DecodeOutcome::Success);
    }

    #[test]
    fn test_byte_mode_forwards_to_sink() {
        let engine = Arc::new(SimEngine::new());
        let (mut session, _pool) = video_session(DecodeMode::ByteBuffer, Arc::clone(&engine));
        assert!(session.frame_waiter().is_none());

        // First drain only reports the output format
        session.send_packet(Some(&[9, 8, 7]), 1_000, PacketFlags::KEY_FRAME);
        session.send_packet(Some(&[6, 5]), 2_000, PacketFlags::NONE);
        let frames = engine.decoded_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].decoder_id, "video-1");
        assert_eq!(frames[0].data, vec![9, 8, 7]);
        assert_eq!(frames[0].presentation_time_us, 1_000);
        assert!(!frames[0].is_completed);
    }

    #[test]
    fn test_direct_mode_frame_waiter() {
        let (mut session, _pool) = video_session(DecodeMode::DirectToSurface, Arc::new(SimEngine::new()));
        let waiter = session.frame_waiter().unwrap();

        let signal = waiter.await_frame(Duration::from_millis(1), 320, 240);
        assert!(!signal.available);

        session.send_packet(Some(&[1]), 33_000, PacketFlags::KEY_FRAME);
        session.drain();
        let signal = waiter.await_frame(Duration::from_millis(50), 320, 240);
        assert!(signal.available);
        assert_eq!(signal.timestamp, 33_000);
        assert!(!signal.completed);
    }

    #[test]
    fn test_waiter_reports_end_of_stream_drained_during_wait() {
        let (mut session, _pool) = video_session(DecodeMode::DirectToSurface, Arc::new(SimEngine::new()));
        let waiter = session.frame_waiter().unwrap();

        let waiting = std::thread::spawn(move || waiter.await_frame(Duration::from_millis(300), 320, 240));
        std::thread::sleep(Duration::from_millis(20));
        session.send_packet(None, 0, PacketFlags::END_OF_STREAM);
        session.drain();

        let signal = waiting.join().unwrap();
        assert!(!signal.available);
        assert!(signal.completed);
    }

    #[test]
    fn test_direct_mode_requires_surface() {
        let pool = pool(Arc::new(SimDecoderFactory::new()));
        let format = StreamFormat::Video(VideoFormat::new("video/avc", 320, 240, 0, 0));
        let result = DecodeSession::new(
            DecoderId::new("video-2"),
            format,
            DecodeMode::DirectToSurface,
            None,
            Arc::clone(&pool),
            Arc::new(SimEngine::new()),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
        assert_eq!(pool.stats(MediaType::Video).outstanding, 0);
    }

    #[test]
    fn test_release_returns_handle_to_pool() {
        let (mut session, pool) = video_session(DecodeMode::DirectToSurface, Arc::new(SimEngine::new()));
        let serial = session.decoder_serial().unwrap();
        assert_eq!(pool.stats(MediaType::Video).outstanding, 1);

        session.release();
        session.release();
        assert_eq!(session.state(), SessionState::Released);
        assert_eq!(session.send_packet(Some(&[1]), 0, PacketFlags::NONE), DecodeOutcome::NotStarted);
        assert!(session.flush().is_err());

        let stats = pool.stats(MediaType::Video);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(pool.acquire(MediaType::Video).unwrap().serial(), serial);
    }
}
