use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use playback_pipeline::audio::{AudioAction, AudioSpec};
use playback_pipeline::decoder::{DecodeOutcome, DecoderId, OutputSurface, PacketFlags};
use playback_pipeline::engine::FrameSignal;
use playback_pipeline::player::{PipelineStats, PlayerEvent, PlayerId, PlayerObserver, PlayerState};
use playback_pipeline::renderer::{RenderStats, RenderTarget, RenderTexture};
use playback_pipeline::sim::{SimAudioDeviceFactory, SimDecoderFactory, SimEngine, SimOutputSurface, SimSurface};
use playback_pipeline::utils::format_position_us;
use playback_pipeline::{Config, Pipeline};

const FRAME_INTERVAL_US: i64 = 33_333;
const FRAME_WIDTH: u32 = 1280;
const FRAME_HEIGHT: u32 = 720;

/// playback-pipeline - drive the decode, render and audio pipeline against simulated devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the system and user config files)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of video frames to decode and present
    #[arg(short, long, default_value = "120")]
    frames: u32,

    /// Milliseconds of audio to play
    #[arg(long = "audio-ms", default_value = "500")]
    audio_ms: u64,

    /// Override the pooled video decoder count
    #[arg(long = "video-pool", value_name = "N")]
    video_pool: Option<usize>,

    /// Override the pooled audio decoder count
    #[arg(long = "audio-pool", value_name = "N")]
    audio_pool: Option<usize>,

    /// Skip decoder warm-up at startup
    #[arg(long = "no-warm-up")]
    no_warm_up: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    frames_sent: u32,
    frames_presented: u32,
    completed: bool,
    audio_position_us: u64,
    warm_up_created: usize,
    render: Option<RenderStats>,
    pipeline: PipelineStats,
    elapsed_ms: u128,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load {:?}", path))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if let Some(n) = args.video_pool {
        config.pool.video_capacity = n;
    }
    if let Some(n) = args.audio_pool {
        config.pool.audio_capacity = n;
    }
    if args.no_warm_up {
        config.pool.warm_up = false;
    }

    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting playback-pipeline v{}", env!("CARGO_PKG_VERSION"));

    let summary = run(&args, config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "frames: {}/{} presented, completed: {}",
            summary.frames_presented, summary.frames_sent, summary.completed
        );
        println!("audio position: {}", format_position_us(summary.audio_position_us));
        if let Some(render) = &summary.render {
            println!(
                "render: {} drawn, {} coalesced, {} rejected",
                render.frames_drawn, render.coalesced, render.rejected
            );
        }
        println!(
            "pools: video {} idle, audio {} idle ({} warmed up)",
            summary.pipeline.video_pool.idle, summary.pipeline.audio_pool.idle, summary.warm_up_created
        );
        println!("elapsed: {} ms", summary.elapsed_ms);
    }
    Ok(())
}

fn run(args: &Args, config: Config) -> Result<RunSummary> {
    let started = Instant::now();
    let engine = Arc::new(SimEngine::new());
    let audio_buffer = Duration::from_millis(config.audio.device_buffer_ms);
    let bytes_per_sample = config.audio.bytes_per_sample;
    let frame_wait = config.render.frame_wait();

    let pipeline = Pipeline::builder()
        .with_config(config)
        .with_decoder_factory(Arc::new(SimDecoderFactory::new()))
        .with_frame_sink(engine.clone())
        .with_chunk_provider(engine.clone())
        .with_backup_source(engine.clone())
        .with_audio_device_factory(Arc::new(SimAudioDeviceFactory::realtime(audio_buffer)))
        .build()?;

    let warm_up = pipeline.wait_for_warm_up()?;
    let warm_up_created = warm_up.map_or(0, |report| report.created);

    let player = PlayerId::new("player-1");
    pipeline.add_player(player.clone(), Arc::new(LoggingObserver));
    pipeline.relay().notify_state(&player, PlayerState::Initializing);

    pipeline.attach_render_target(
        player.clone(),
        RenderTarget::Surface {
            surface: Box::new(SimSurface::new(FRAME_WIDTH, FRAME_HEIGHT)),
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        },
    )?;

    let surface: Arc<dyn OutputSurface> = Arc::new(SimOutputSurface::new());
    let decoder = pipeline.create_video_decoder_from_info(
        "video/avc",
        &[FRAME_WIDTH as i32, FRAME_HEIGHT as i32, 0, 0, 0],
        Some(surface),
    )?;
    pipeline.relay().notify_state(&player, PlayerState::Prepared);

    let sample_rate = 48_000;
    let spec = AudioSpec::new(sample_rate, 2, bytes_per_sample)?;
    let audio_bytes = spec.bytes_for(Duration::from_millis(args.audio_ms)) as u64;
    engine.set_audio_budget(&player, audio_bytes);
    pipeline.create_audio_output(player.clone(), spec)?;
    pipeline.audio_action(&player, AudioAction::Play)?;
    pipeline.relay().notify_state(&player, PlayerState::Playing);

    let mut presented = 0u32;
    for n in 0..args.frames {
        let pts = n as i64 * FRAME_INTERVAL_US;
        let flags = if n == 0 { PacketFlags::KEY_FRAME } else { PacketFlags::NONE };
        let payload = [0u8, 0, 1, (n & 0xff) as u8];

        match pipeline.send_packet(&decoder, Some(&payload), pts, flags) {
            DecodeOutcome::Success => {}
            outcome if outcome.is_retryable() => debug!("Frame {} retry: {:?}", n, outcome),
            outcome => warn!("Frame {} dropped: {:?}", n, outcome),
        }

        if present_frame(&pipeline, &decoder, &player, frame_wait, presented + 1) {
            presented += 1;
            if presented == 1 {
                pipeline.relay().notify_event(&player, PlayerEvent::FirstFrameRendered, "");
            }
            pipeline
                .relay()
                .notify_time(&player, pts as f64 / 1_000_000.0);
        }
    }

    pipeline.send_packet(&decoder, None, args.frames as i64 * FRAME_INTERVAL_US, PacketFlags::END_OF_STREAM);
    let deadline = Instant::now() + Duration::from_secs(1);
    while pipeline.is_decoder_completed(&decoder) == Some(false) && Instant::now() < deadline {
        if pipeline.drain_decoder(&decoder) == DecodeOutcome::DecoderError {
            error!("Decoder {} failed while draining", decoder);
            break;
        }
    }
    // Drain rendered frames still latched on the surface
    while present_frame(&pipeline, &decoder, &player, Duration::from_millis(1), presented + 1) {
        presented += 1;
    }
    let completed = pipeline.is_decoder_completed(&decoder).unwrap_or(false);

    let audio_target_us = args.audio_ms * 1_000;
    let audio_deadline = Instant::now() + Duration::from_millis(args.audio_ms) + audio_buffer * 2;
    while pipeline.audio_position_us(&player).unwrap_or(0) < audio_target_us && Instant::now() < audio_deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let audio_position_us = pipeline.audio_position_us(&player).unwrap_or(0);
    pipeline.audio_action(&player, AudioAction::Release)?;

    if completed {
        pipeline.relay().notify_event(&player, PlayerEvent::PlayEnd, "");
        pipeline.relay().notify_state(&player, PlayerState::Completed);
    } else {
        pipeline.relay().report_error(&player, -1);
    }

    let render = pipeline.render_stats(&player);
    pipeline.release_decoder(&decoder);
    pipeline.remove_player(&player);
    let stats = pipeline.stats();
    pipeline.shutdown();

    Ok(RunSummary {
        frames_sent: args.frames,
        frames_presented: presented,
        completed,
        audio_position_us,
        warm_up_created,
        render,
        pipeline: stats,
        elapsed_ms: started.elapsed().as_millis(),
    })
}

/// Wait for one decoded frame and hand its texture to the render thread
fn present_frame(
    pipeline: &Pipeline,
    decoder: &DecoderId,
    player: &PlayerId,
    wait: Duration,
    handle: u32,
) -> bool {
    let signal = FrameSignal::unpack(pipeline.request_video_frame(decoder, wait, FRAME_WIDTH, FRAME_HEIGHT));
    if signal.available {
        pipeline.request_render(player, RenderTexture::new(handle, FRAME_WIDTH, FRAME_HEIGHT));
    }
    signal.available
}

/// Observer that logs what the pipeline reports
struct LoggingObserver;

impl PlayerObserver for LoggingObserver {
    fn notify_time(&self, player_id: &PlayerId, time: f64) {
        debug!("{} time: {:.3}s", player_id, time);
    }

    fn notify_state(&self, player_id: &PlayerId, state: PlayerState) {
        info!("{} state: {:?}", player_id, state);
    }

    fn notify_event(&self, player_id: &PlayerId, event: PlayerEvent, value: &str) {
        match event {
            PlayerEvent::OnError => error!("{} error: {}", player_id, value),
            _ => info!("{} event: {:?} {}", player_id, event, value),
        }
    }
}
