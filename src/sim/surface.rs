//! Simulated output and graphics surfaces

use crate::decoder::OutputSurface;
use crate::renderer::{DrawLayout, GraphicsSurface, RenderTexture};
use crate::utils::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoder-side surface: latches the most recently released image
#[derive(Default)]
pub struct SimOutputSurface {
    latest: Mutex<Option<i64>>,
    available: Condvar,
    draws: AtomicUsize,
    fail_draws: AtomicBool,
}

impl SimOutputSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw_count(&self) -> usize {
        self.draws.load(Ordering::Acquire)
    }

    pub fn fail_draws(&self, fail: bool) {
        self.fail_draws.store(fail, Ordering::Release);
    }
}

impl OutputSurface for SimOutputSurface {
    fn post_frame(&self, presentation_time_us: i64) {
        *self.latest.lock() = Some(presentation_time_us);
        self.available.notify_all();
    }

    fn await_frame(&self, timeout: Duration) -> Option<i64> {
        let deadline = Instant::now() + timeout;
        let mut latest = self.latest.lock();
        while latest.is_none() {
            if self.available.wait_until(&mut latest, deadline).timed_out() {
                break;
            }
        }
        latest.take()
    }

    fn draw(&self, _width: u32, _height: u32) -> Result<()> {
        if self.fail_draws.load(Ordering::Acquire) {
            return Err(PipelineError::Render("simulated draw failure".to_string()));
        }
        self.draws.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Calls observed on a `SimSurface`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    ContextCreated,
    Rebuilt,
    Drew(u32),
    Presented(u32),
    ContextDestroyed,
    Released,
}

#[derive(Default)]
struct LogState {
    events: Vec<SurfaceEvent>,
    layouts: Vec<DrawLayout>,
}

/// Shared record of everything a `SimSurface` was asked to do
#[derive(Default)]
pub struct SurfaceLog {
    state: Mutex<LogState>,
    changed: Condvar,
}

impl SurfaceLog {
    fn push(&self, event: SurfaceEvent) {
        self.state.lock().events.push(event);
        self.changed.notify_all();
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.state.lock().events.clone()
    }

    /// Handles passed to `draw`, in order
    pub fn draws(&self) -> Vec<u32> {
        self.filter(|e| match e {
            SurfaceEvent::Drew(h) => Some(*h),
            _ => None,
        })
    }

    /// Handles passed to `swap_buffers`, in order
    pub fn presented(&self) -> Vec<u32> {
        self.filter(|e| match e {
            SurfaceEvent::Presented(h) => Some(*h),
            _ => None,
        })
    }

    pub fn last_layout(&self) -> Option<DrawLayout> {
        self.state.lock().layouts.last().copied()
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().events.contains(&SurfaceEvent::Released)
    }

    fn filter(&self, f: impl Fn(&SurfaceEvent) -> Option<u32>) -> Vec<u32> {
        self.state.lock().events.iter().filter_map(f).collect()
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&LogState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !done(&state) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return done(&state);
            }
        }
        true
    }

    /// Wait until at least `count` frames were presented
    pub fn wait_for_draws(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state
                .events
                .iter()
                .filter(|e| matches!(e, SurfaceEvent::Presented(_)))
                .count()
                >= count
        })
    }

    /// Wait until the texture with `handle` was drawn and presented
    pub fn wait_for_draws_of(&self, handle: u32, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            let drawn = state.events.iter().rposition(|e| *e == SurfaceEvent::Drew(handle));
            drawn.is_some_and(|i| {
                state.events[i..]
                    .iter()
                    .any(|e| matches!(e, SurfaceEvent::Presented(_)))
            })
        })
    }
}

/// Render-side surface that records every call
pub struct SimSurface {
    width: u32,
    height: u32,
    log: Arc<SurfaceLog>,
    fail_context: bool,
    draw_delay: Option<Duration>,
}

impl SimSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            log: Arc::new(SurfaceLog::default()),
            fail_context: false,
            draw_delay: None,
        }
    }

    /// Context creation will fail
    pub fn fail_context(mut self) -> Self {
        self.fail_context = true;
        self
    }

    /// Every draw takes at least `delay`
    pub fn with_draw_delay(mut self, delay: Duration) -> Self {
        self.draw_delay = Some(delay);
        self
    }

    pub fn log(&self) -> Arc<SurfaceLog> {
        Arc::clone(&self.log)
    }
}

impl GraphicsSurface for SimSurface {
    fn create_context(&mut self) -> Result<()> {
        if self.fail_context {
            return Err(PipelineError::Render("simulated context failure".to_string()));
        }
        self.log.push(SurfaceEvent::ContextCreated);
        Ok(())
    }

    fn rebuild_surface(&mut self) -> Result<()> {
        self.log.push(SurfaceEvent::Rebuilt);
        Ok(())
    }

    fn draw(&mut self, texture: &RenderTexture, layout: &DrawLayout) -> Result<()> {
        if let Some(delay) = self.draw_delay {
            std::thread::sleep(delay);
        }
        self.log.state.lock().layouts.push(*layout);
        self.log.push(SurfaceEvent::Drew(texture.handle));
        Ok(())
    }

    fn swap_buffers(&mut self, handle: u32) -> Result<()> {
        self.log.push(SurfaceEvent::Presented(handle));
        Ok(())
    }

    fn destroy_context(&mut self) {
        self.log.push(SurfaceEvent::ContextDestroyed);
    }

    fn release(&mut self) {
        self.log.push(SurfaceEvent::Released);
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
