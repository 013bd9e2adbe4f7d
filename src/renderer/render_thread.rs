//! Dedicated render thread with a single-slot, latest-wins mailbox

use crate::engine::BackupTextureSource;
use crate::player::PlayerId;
use crate::renderer::{DrawLayout, GraphicsSurface, RenderStats, RenderTarget, RenderTexture, Rotation, Viewport};
use crate::utils::error::{PipelineError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// State shared between producers and the render thread
struct Mailbox {
    /// Most recent texture; overwritten, never queued
    pending: RenderTexture,
    dirty: bool,
    render_requested: bool,
    rebuild: bool,
    running: bool,
    viewport: Viewport,
    rotation: Rotation,
    stats: RenderStats,
}

struct Shared {
    mailbox: Mutex<Mailbox>,
    wake: Condvar,
    exited: AtomicBool,
}

/// Work taken out of the mailbox for one wake-up
struct RenderJob {
    texture: Option<RenderTexture>,
    rebuild: bool,
    viewport: Viewport,
    rotation: Rotation,
}

/// One render thread bound to one presentation surface
pub struct RenderThread {
    player_id: PlayerId,
    shared: Arc<Shared>,
    backup_source: Option<Arc<dyn BackupTextureSource>>,
    handle: Option<thread::JoinHandle<()>>,
    exit_rx: Receiver<()>,
    shutdown_timeout: Duration,
}

impl RenderThread {
    /// Start a render thread for `target`
    ///
    /// Returns once the graphics context is established. If context
    /// creation fails the thread exits without rendering and the error is
    /// returned here.
    pub fn spawn(
        player_id: PlayerId,
        target: RenderTarget,
        backup_source: Option<Arc<dyn BackupTextureSource>>,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let (mut surface, width, height) = target.into_parts();
        let viewport = match Viewport::new(width, height) {
            Ok(viewport) => viewport,
            Err(e) => {
                warn!("Render thread {}: rejecting target: {}", player_id, e);
                surface.release();
                return Err(e);
            }
        };

        let shared = Arc::new(Shared {
            mailbox: Mutex::new(Mailbox {
                pending: RenderTexture::default(),
                dirty: false,
                render_requested: false,
                rebuild: false,
                running: true,
                viewport,
                rotation: Rotation::Deg0,
                stats: RenderStats::default(),
            }),
            wake: Condvar::new(),
            exited: AtomicBool::new(false),
        });

        let (startup_tx, startup_rx) = bounded::<Result<()>>(1);
        let (exit_tx, exit_rx) = bounded::<()>(1);
        let thread_shared = Arc::clone(&shared);
        let thread_player = player_id.clone();

        let handle = thread::Builder::new()
            .name(format!("render-{}", player_id))
            .spawn(move || {
                if let Err(e) = surface.create_context() {
                    error!("Render thread {}: failed to create context: {}", thread_player, e);
                    surface.release();
                    thread_shared.exited.store(true, Ordering::Release);
                    let _ = startup_tx.send(Err(e));
                    return;
                }
                let _ = startup_tx.send(Ok(()));

                render_loop(&thread_player, &thread_shared, surface.as_mut());

                surface.destroy_context();
                surface.release();
                thread_shared.exited.store(true, Ordering::Release);
                info!("Render thread {} exited", thread_player);
                let _ = exit_tx.send(());
            })?;

        match startup_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(PipelineError::Render(format!(
                    "Render thread {} died during startup",
                    player_id
                )));
            }
        }

        info!("Render thread {} started at {}x{}", player_id, width, height);

        Ok(Self {
            player_id,
            shared,
            backup_source,
            handle: Some(handle),
            exit_rx,
            shutdown_timeout,
        })
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Replace the pending frame and wake the thread
    ///
    /// Invalid textures are logged and ignored. A frame that is still
    /// pending when the next one arrives is dropped.
    pub fn render(&self, texture: RenderTexture) {
        if !texture.is_valid() {
            warn!("Render thread {}: ignoring invalid texture", self.player_id);
            self.shared.mailbox.lock().stats.rejected += 1;
            return;
        }

        {
            let mut mailbox = self.shared.mailbox.lock();
            if !mailbox.running {
                debug!("Render thread {}: render after shutdown ignored", self.player_id);
                return;
            }
            if mailbox.dirty {
                mailbox.stats.coalesced += 1;
            }
            mailbox.pending = texture;
            mailbox.dirty = true;
            mailbox.render_requested = true;
            mailbox.stats.requests += 1;
        }
        self.shared.wake.notify_one();
    }

    /// Rebind the surface and repaint it with the backup texture, if any
    pub fn rebuild_surface(&self) {
        let backup = self
            .backup_source
            .as_ref()
            .and_then(|source| source.backup_texture(&self.player_id))
            .filter(RenderTexture::is_valid);

        if backup.is_none() {
            debug!("Render thread {}: no backup texture for rebuild", self.player_id);
        }

        {
            let mut mailbox = self.shared.mailbox.lock();
            if !mailbox.running {
                return;
            }
            if let Some(texture) = backup {
                mailbox.pending = texture.as_backup();
                mailbox.dirty = true;
            }
            mailbox.rebuild = true;
            mailbox.render_requested = true;
        }
        self.shared.wake.notify_one();
    }

    /// Viewport used by the next draw
    pub fn set_render_size(&self, width: u32, height: u32) -> Result<()> {
        let viewport = Viewport::new(width, height)?;
        self.shared.mailbox.lock().viewport = viewport;
        Ok(())
    }

    /// Orientation used by the next draw; must be a multiple of 90 degrees
    pub fn set_rotation(&self, degrees: i32) -> Result<()> {
        let rotation = Rotation::from_degrees(degrees)?;
        self.shared.mailbox.lock().rotation = rotation;
        Ok(())
    }

    pub fn stats(&self) -> RenderStats {
        self.shared.mailbox.lock().stats
    }

    /// The render loop has exited and the surface is released
    pub fn has_exited(&self) -> bool {
        self.shared.exited.load(Ordering::Acquire)
    }

    /// Stop the loop and wait (bounded) for the surface to be released
    ///
    /// Wakes the thread even when nothing is pending. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.shared.mailbox.lock().running = false;
        self.shared.wake.notify_all();

        match self.exit_rx.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    return Err(PipelineError::Internal(format!(
                        "Render thread {} panicked",
                        self.player_id
                    )));
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Render thread {} did not exit within {:?}, detaching",
                    self.player_id, self.shutdown_timeout
                );
                Err(PipelineError::Render(format!(
                    "Render thread {} shutdown timed out",
                    self.player_id
                )))
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{}", e);
        }
    }
}

fn next_job(shared: &Shared) -> Option<RenderJob> {
    let mut mailbox = shared.mailbox.lock();
    while mailbox.running && !mailbox.render_requested {
        shared.wake.wait(&mut mailbox);
    }
    if !mailbox.running {
        return None;
    }

    mailbox.render_requested = false;
    let texture = if mailbox.dirty {
        mailbox.dirty = false;
        Some(mailbox.pending)
    } else {
        None
    };

    Some(RenderJob {
        texture,
        rebuild: std::mem::take(&mut mailbox.rebuild),
        viewport: mailbox.viewport,
        rotation: mailbox.rotation,
    })
}

fn render_loop(player_id: &PlayerId, shared: &Shared, surface: &mut dyn GraphicsSurface) {
    while let Some(job) = next_job(shared) {
        if job.rebuild {
            match surface.rebuild_surface() {
                Ok(()) => shared.mailbox.lock().stats.rebuilds += 1,
                Err(e) => error!("Render thread {}: surface rebuild failed: {}", player_id, e),
            }
        }

        let Some(texture) = job.texture else {
            continue;
        };

        let layout = DrawLayout::fit(texture.width, texture.height, job.viewport, job.rotation);
        if let Err(e) = surface.draw(&texture, &layout) {
            error!("Render thread {}: draw failed: {}", player_id, e);
            continue;
        }

        let present_handle = if texture.is_backup { 0 } else { texture.handle };
        if let Err(e) = surface.swap_buffers(present_handle) {
            error!("Render thread {}: swap failed: {}", player_id, e);
            continue;
        }

        shared.mailbox.lock().stats.frames_drawn += 1;
    }
}
