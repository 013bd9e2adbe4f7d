//! Integration tests for the playback pipeline
//!
//! These drive `Pipeline` end to end against the simulated backends:
//! - decoder warm-up and pooled handle reuse
//! - the feed/drain protocol and end-of-stream handling
//! - coalescing render threads and their shutdown
//! - the audio pull loop and its position tracking
//! - observer relay and configuration files

mod common;

use anyhow::Result;
use common::{test_config, wait_until, TestFixture};
use playback_pipeline::audio::{AudioAction, AudioParam, AudioSpec};
use playback_pipeline::decoder::{
    AacProfile, AudioFormat, DecodeMode, DecodeOutcome, MediaType, OutputSurface, PacketFlags, VideoFormat,
};
use playback_pipeline::engine::FrameSignal;
use playback_pipeline::player::{PlayerEvent, PlayerId, PlayerState};
use playback_pipeline::renderer::{RenderTarget, RenderTexture};
use playback_pipeline::sim::{
    Notification, RecordingObserver, SimAudioDeviceFactory, SimOutputSurface, SimSurface, SurfaceEvent,
};
use playback_pipeline::{Config, PipelineError};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn aac() -> AudioFormat {
    AudioFormat::aac(44100, 2, AacProfile::Lc, None)
}

#[test]
fn test_warm_up_then_concurrent_video_acquire() -> Result<()> {
    let mut config = test_config();
    config.pool.warm_up = true;
    config.pool.video_capacity = 2;
    config.pool.audio_capacity = 2;
    let fixture = TestFixture::with(config, SimAudioDeviceFactory::manual(4096));

    let report = fixture.pipeline.wait_for_warm_up()?.expect("warm-up was started");
    assert_eq!(report.created, 4);
    assert_eq!(report.failed, 0);
    assert_eq!(fixture.decoders.created(), 4);

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let pool = Arc::clone(fixture.pipeline.pool());
            thread::spawn(move || pool.acquire(MediaType::Video))
        })
        .collect();

    let mut serials = HashSet::new();
    let mut handles = Vec::new();
    for worker in workers {
        let handle = worker.join().expect("acquire thread panicked")?;
        serials.insert(handle.serial());
        handles.push(handle);
    }

    assert_eq!(serials.len(), 2);
    // Both came from the warmed pool
    assert_eq!(fixture.decoders.created(), 4);

    for handle in handles {
        fixture.pipeline.pool().release(handle);
    }
    assert_eq!(fixture.pipeline.pool().stats(MediaType::Video).idle, 2);
    Ok(())
}

#[test]
fn test_end_of_stream_then_flush() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let surface: Arc<dyn OutputSurface> = Arc::new(SimOutputSurface::new());
    let id = pipeline.create_video_decoder(
        VideoFormat::new("video/avc", 640, 360, 0, 0),
        DecodeMode::DirectToSurface,
        Some(surface),
    )?;

    assert_eq!(pipeline.send_packet(&id, None, 0, PacketFlags::END_OF_STREAM), DecodeOutcome::Success);
    assert_eq!(pipeline.drain_decoder(&id), DecodeOutcome::Success);
    assert_eq!(pipeline.is_decoder_completed(&id), Some(true));

    let signal = FrameSignal::unpack(pipeline.request_video_frame(&id, Duration::from_millis(1), 640, 360));
    assert!(!signal.available);
    assert!(signal.completed);

    assert_eq!(
        pipeline.send_packet(&id, Some(&[0, 0, 1]), 33_000, PacketFlags::NONE),
        DecodeOutcome::DecoderError
    );

    pipeline.flush_decoder(&id)?;
    assert_eq!(pipeline.is_decoder_completed(&id), Some(false));
    assert_eq!(
        pipeline.send_packet(&id, Some(&[0, 0, 1]), 33_000, PacketFlags::KEY_FRAME),
        DecodeOutcome::Success
    );
    Ok(())
}

#[test]
fn test_rejected_input_keeps_session_usable() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let id = pipeline.create_audio_decoder(aac())?;

    assert_eq!(pipeline.send_packet(&id, Some(&[]), 0, PacketFlags::NONE), DecodeOutcome::InputInvalid);
    let oversized = vec![1u8; 4097];
    assert_eq!(
        pipeline.send_packet(&id, Some(&oversized), 0, PacketFlags::NONE),
        DecodeOutcome::InputTooLarge
    );
    assert_eq!(pipeline.send_packet(&id, Some(&[1; 4096]), 0, PacketFlags::NONE), DecodeOutcome::Success);
    Ok(())
}

#[test]
fn test_byte_mode_audio_reaches_engine() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let id = pipeline.create_audio_decoder(aac())?;

    pipeline.send_packet(&id, Some(&[1, 2, 3]), 0, PacketFlags::NONE);
    pipeline.send_packet(&id, Some(&[4, 5]), 23_219, PacketFlags::NONE);
    pipeline.send_packet(&id, None, 46_438, PacketFlags::END_OF_STREAM);

    let completed = wait_until(Duration::from_secs(1), || {
        pipeline.drain_decoder(&id);
        pipeline.is_decoder_completed(&id) == Some(true)
    });
    assert!(completed);

    let frames: Vec<_> = fixture
        .engine
        .decoded_frames()
        .into_iter()
        .filter(|f| f.decoder_id == id.as_str())
        .collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].data, vec![1, 2, 3]);
    assert_eq!(frames[1].data, vec![4, 5]);
    assert_eq!(frames[1].presentation_time_us, 23_219);
    assert!(frames[2].is_completed);
    assert!(frames[2].data.is_empty());
    assert!(!frames[0].is_completed);
    Ok(())
}

#[test]
fn test_released_decoder_handle_is_reused() -> Result<()> {
    let mut config = test_config();
    config.pool.audio_capacity = 1;
    let fixture = TestFixture::with(config, SimAudioDeviceFactory::manual(4096));
    let pipeline = &fixture.pipeline;

    let first = pipeline.create_audio_decoder(aac())?;
    assert!(pipeline.release_decoder(&first));
    let second = pipeline.create_audio_decoder(aac())?;

    assert_ne!(first, second);
    assert_eq!(fixture.decoders.created(), 1);
    assert_eq!(pipeline.stats().audio_pool.outstanding, 1);
    assert_eq!(pipeline.send_packet(&first, Some(&[1]), 0, PacketFlags::NONE), DecodeOutcome::DecoderNotFound);
    Ok(())
}

#[test]
fn test_render_coalesces_to_latest_frame() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let player = PlayerId::new("player-1");

    let surface = SimSurface::new(1280, 720).with_draw_delay(Duration::from_millis(40));
    let log = surface.log();
    pipeline.attach_render_target(player.clone(), RenderTarget::View(Box::new(surface)))?;

    pipeline.request_render(&player, RenderTexture::new(1, 1280, 720));
    thread::sleep(Duration::from_millis(10));
    for handle in 2..=10 {
        pipeline.request_render(&player, RenderTexture::new(handle, 1280, 720));
    }
    pipeline.request_render(&player, RenderTexture::default());

    assert!(log.wait_for_draws_of(10, Duration::from_secs(2)));
    let draws = log.draws();
    assert_eq!(draws.last(), Some(&10));
    assert!(draws.iter().all(|&h| h == 1 || h == 10));
    assert!(!draws.contains(&0));

    let stats = pipeline.render_stats(&player).expect("render thread attached");
    assert_eq!(stats.requests, 10);
    assert_eq!(stats.rejected, 1);
    assert!(stats.coalesced >= 8);
    Ok(())
}

#[test]
fn test_rebuild_repaints_backup_texture() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let player = PlayerId::new("player-1");
    fixture
        .engine
        .set_backup_texture(&player, RenderTexture::new(42, 640, 360));

    let surface = SimSurface::new(640, 360);
    let log = surface.log();
    pipeline.attach_render_target(
        player.clone(),
        RenderTarget::Surface {
            surface: Box::new(surface),
            width: 640,
            height: 360,
        },
    )?;

    pipeline.set_render_size(&player, 400, 800)?;
    pipeline.rebuild_surface(&player);
    assert!(log.wait_for_draws(1, Duration::from_secs(2)));

    assert_eq!(log.draws(), vec![42]);
    assert_eq!(log.presented(), vec![0]);
    let events = log.events();
    let rebuilt = events.iter().position(|e| *e == SurfaceEvent::Rebuilt);
    let drew = events.iter().position(|e| *e == SurfaceEvent::Drew(42));
    assert!(rebuilt < drew);

    // 640x360 content letterboxed into a 400x800 viewport
    let layout = log.last_layout().expect("a draw was recorded");
    assert_eq!(layout.rect.width, 400);
    assert_eq!(layout.rect.height, 225);
    assert_eq!(layout.rect.y, 287);
    Ok(())
}

#[test]
fn test_render_shutdown_without_pending_frame() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let player = PlayerId::new("player-1");

    let surface = SimSurface::new(320, 240);
    let log = surface.log();
    pipeline.attach_render_target(player.clone(), RenderTarget::View(Box::new(surface)))?;

    let started = Instant::now();
    pipeline.detach_render_target(&player)?;
    assert!(started.elapsed() < Duration::from_secs(1));

    let events = log.events();
    assert_eq!(
        &events[events.len() - 2..],
        &[SurfaceEvent::ContextDestroyed, SurfaceEvent::Released]
    );
    assert!(log.draws().is_empty());
    Ok(())
}

#[test]
fn test_context_failure_is_reported_at_attach() {
    let fixture = TestFixture::new();
    let player = PlayerId::new("player-1");
    let surface = SimSurface::new(320, 240).fail_context();
    let log = surface.log();

    let result = fixture
        .pipeline
        .attach_render_target(player.clone(), RenderTarget::View(Box::new(surface)));
    assert!(matches!(result, Err(PipelineError::Render(_))));
    assert!(log.is_released());
    assert_eq!(fixture.pipeline.stats().render_threads, 0);
}

#[test]
fn test_audio_plays_and_flush_resets_position() -> Result<()> {
    let fixture = TestFixture::with(test_config(), SimAudioDeviceFactory::realtime(Duration::from_millis(20)));
    let pipeline = &fixture.pipeline;
    let stream = PlayerId::new("player-1");

    pipeline.create_audio_output(stream.clone(), AudioSpec::new(48000, 2, 2)?)?;
    pipeline.audio_action(&stream, AudioAction::Play)?;

    let mut last = 0;
    let advanced = wait_until(Duration::from_secs(2), || {
        let position = pipeline.audio_position_us(&stream).unwrap_or(0);
        assert!(position >= last, "position went backwards");
        last = position;
        position >= 30_000
    });
    assert!(advanced);

    pipeline.audio_action(&stream, AudioAction::Pause)?;
    let paused_at = pipeline.audio_position_us(&stream).unwrap_or(0);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pipeline.audio_position_us(&stream), Some(paused_at));

    pipeline.audio_action(&stream, AudioAction::Flush)?;
    assert_eq!(pipeline.audio_position_us(&stream), Some(0));
    assert_eq!(fixture.audio.created(), 2);
    assert_eq!(fixture.audio.live(), 1);

    pipeline.audio_action(&stream, AudioAction::Release)?;
    assert_eq!(fixture.audio.live(), 0);
    Ok(())
}

#[test]
fn test_audio_end_of_stream_keeps_writing_silence() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let stream = PlayerId::new("player-1");
    fixture.engine.set_audio_budget(&stream, 256);

    pipeline.create_audio_output(stream.clone(), AudioSpec::new(48000, 2, 2)?)?;
    pipeline.audio_config(&stream, AudioParam::Volume(0.5))?;
    pipeline.audio_action(&stream, AudioAction::Play)?;

    let probe = fixture.audio.last_probe().expect("device created");
    assert!(probe.wait_for_written(4096, Duration::from_secs(2)));

    // One tone chunk, one end-of-stream answer, then silence without asking
    assert_eq!(fixture.engine.chunk_requests(&stream), 2);
    assert_eq!(probe.volume(), 0.5);
    pipeline.audio_action(&stream, AudioAction::Release)?;
    Ok(())
}

#[test]
fn test_invalid_play_rate_is_rejected() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let stream = PlayerId::new("player-1");
    pipeline.create_audio_output(stream.clone(), AudioSpec::new(44100, 2, 2)?)?;

    assert!(pipeline.audio_config(&stream, AudioParam::PlayRate(-1.0)).is_err());
    pipeline.audio_config(&stream, AudioParam::PlayRate(2.0))?;
    assert_eq!(fixture.audio.last_probe().expect("device created").play_rate(), 2.0);
    Ok(())
}

#[test]
fn test_audio_device_failure_is_construction_error() {
    let fixture = TestFixture::with(test_config(), SimAudioDeviceFactory::manual(4096).failing());
    let result = fixture
        .pipeline
        .create_audio_output(PlayerId::new("player-1"), AudioSpec::new(44100, 2, 2).unwrap());
    assert!(matches!(result, Err(PipelineError::Audio(_))));
    assert_eq!(fixture.pipeline.stats().audio_outputs, 0);
}

#[test]
fn test_relay_forwards_until_removed() {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let player = PlayerId::new("player-1");
    let observer = Arc::new(RecordingObserver::new());
    pipeline.add_player(player.clone(), observer.clone());

    pipeline.relay().notify_state(&player, PlayerState::Buffering);
    pipeline.relay().notify_event(&player, PlayerEvent::SeekDone, "");
    pipeline.relay().report_error(&player, 5);
    pipeline.remove_player(&player);
    pipeline.relay().notify_time(&player, 3.0);
    pipeline.remove_player(&player);

    assert_eq!(
        observer.notifications(),
        vec![
            Notification::State(PlayerState::Buffering),
            Notification::Event(PlayerEvent::SeekDone, String::new()),
            Notification::State(PlayerState::Error),
            Notification::Event(PlayerEvent::OnError, "5".to_string()),
        ]
    );
    assert_eq!(pipeline.stats().players, 0);
}

#[test]
fn test_shutdown_releases_everything() -> Result<()> {
    let fixture = TestFixture::new();
    let pipeline = &fixture.pipeline;
    let player = PlayerId::new("player-1");

    let surface = SimSurface::new(320, 240);
    let log = surface.log();
    pipeline.attach_render_target(player.clone(), RenderTarget::View(Box::new(surface)))?;
    pipeline.create_audio_output(player.clone(), AudioSpec::new(44100, 2, 2)?)?;
    pipeline.audio_action(&player, AudioAction::Play)?;
    pipeline.create_audio_decoder(aac())?;

    pipeline.shutdown();
    pipeline.shutdown();

    assert!(log.is_released());
    assert_eq!(fixture.audio.live(), 0);
    assert_eq!(fixture.decoders.live(), 0);
    let stats = pipeline.stats();
    assert_eq!((stats.decoders, stats.render_threads, stats.audio_outputs), (0, 0, 0));
    Ok(())
}

#[test]
fn test_config_file_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pipeline.toml");

    let mut config = Config::default();
    config.pool.video_capacity = 3;
    config.audio.volume = 0.4;
    config.general.log_level = "debug".to_string();
    config.save_to(&path)?;

    let loaded = Config::from_file(&path)?;
    assert_eq!(loaded.pool.video_capacity, 3);
    assert_eq!(loaded.audio.volume, 0.4);
    assert_eq!(loaded.general.log_level, "debug");
    assert_eq!(loaded.decoder.audio_max_input_size, 4096);
    Ok(())
}

#[test]
fn test_info_without_mode_uses_configured_default() -> Result<()> {
    let mut config = test_config();
    config.decoder.video_mode = DecodeMode::ByteBuffer;
    let fixture = TestFixture::with(config, SimAudioDeviceFactory::manual(4096));
    let pipeline = &fixture.pipeline;

    // No surface is needed when the default mode decodes to bytes
    let id = pipeline.create_video_decoder_from_info("video/avc", &[320, 240, 0, 0], None)?;
    assert_eq!(pipeline.request_video_frame(&id, Duration::from_millis(1), 320, 240), 0);

    let direct = pipeline.create_video_decoder_from_info("video/avc", &[320, 240, 0, 0, 0], None);
    assert!(matches!(direct, Err(PipelineError::InvalidInput(_))));
    Ok(())
}
