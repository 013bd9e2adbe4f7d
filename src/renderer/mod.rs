//! Renderer module for the playback pipeline
//!
//! Presentation happens on one dedicated `RenderThread` per surface. The
//! thread owns its graphics context (an injected `GraphicsSurface`) and
//! draws only the most recent pending texture: frames that arrive while it
//! is busy are coalesced, not queued.

use crate::utils::error::Result;

mod layout;
mod render_thread;

pub use layout::{DrawLayout, PixelRect, Rotation, Viewport};
pub use render_thread::RenderThread;

/// A decoded frame's texture as seen by the render thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderTexture {
    /// Backing texture handle; 0 is the invalid sentinel
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    /// Placeholder used to repaint a rebuilt surface
    pub is_backup: bool,
}

impl RenderTexture {
    pub fn new(handle: u32, width: u32, height: u32) -> Self {
        Self {
            handle,
            width,
            height,
            is_backup: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.handle != 0
    }

    /// Copy of this texture flagged as a backup frame
    pub fn as_backup(mut self) -> Self {
        self.is_backup = true;
        self
    }
}

/// Graphics context capability bound to one presentation surface
///
/// Every method is called from the owning render thread only.
pub trait GraphicsSurface: Send {
    /// Establish the graphics context; failure is fatal for the surface
    fn create_context(&mut self) -> Result<()>;

    /// Re-establish the surface binding after a resize or recreate
    fn rebuild_surface(&mut self) -> Result<()>;

    fn draw(&mut self, texture: &RenderTexture, layout: &DrawLayout) -> Result<()>;

    /// Present; `handle` is 0 when presenting a backup frame
    fn swap_buffers(&mut self, handle: u32) -> Result<()>;

    fn destroy_context(&mut self);

    /// Release the underlying surface; called after `destroy_context`
    fn release(&mut self);

    /// Current surface size in pixels
    fn size(&self) -> (u32, u32);
}

/// What a render thread presents into
pub enum RenderTarget {
    /// A raw surface with an explicit initial render size
    Surface {
        surface: Box<dyn GraphicsSurface>,
        width: u32,
        height: u32,
    },

    /// A view that reports its own size
    View(Box<dyn GraphicsSurface>),
}

impl RenderTarget {
    /// Split into the surface and its initial viewport size
    pub(crate) fn into_parts(self) -> (Box<dyn GraphicsSurface>, u32, u32) {
        match self {
            RenderTarget::Surface {
                surface,
                width,
                height,
            } => (surface, width, height),
            RenderTarget::View(surface) => {
                let (width, height) = surface.size();
                (surface, width, height)
            }
        }
    }
}

/// Render statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RenderStats {
    /// Accepted `render` calls
    pub requests: u64,

    /// Frames actually drawn and presented
    pub frames_drawn: u64,

    /// Pending frames replaced before they were drawn
    pub coalesced: u64,

    /// Invalid textures refused by `render`
    pub rejected: u64,

    /// Surface rebuilds performed
    pub rebuilds: u64,
}
