//! Viewport, rotation and aspect-fit layout

use crate::utils::error::{PipelineError, Result};
use serde::Serialize;

/// Output rotation, restricted to quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Accepts any multiple of 90, including negative values
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(PipelineError::invalid_input(format!(
                "Rotation must be a multiple of 90 degrees, got {}",
                degrees
            )));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Rotation::Deg0,
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            _ => Rotation::Deg270,
        })
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn is_transposed(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Destination viewport in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::invalid_input(format!(
                "Render size must be non-zero, got {}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }
}

/// Pixel rectangle inside the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Everything a surface needs to draw one texture
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrawLayout {
    pub viewport: Viewport,
    pub rotation: Rotation,
    /// Centered aspect-fit rectangle
    pub rect: PixelRect,
    /// Quad scale in normalized device coordinates
    pub scale_x: f32,
    pub scale_y: f32,
}

impl DrawLayout {
    /// Fit a `src_width`x`src_height` image inside `viewport` without stretching
    ///
    /// Quarter-turn rotations swap the source dimensions first. Degenerate
    /// sources fill the whole viewport.
    pub fn fit(src_width: u32, src_height: u32, viewport: Viewport, rotation: Rotation) -> Self {
        let (src_w, src_h) = if rotation.is_transposed() {
            (src_height, src_width)
        } else {
            (src_width, src_height)
        };

        let dst_w = viewport.width;
        let dst_h = viewport.height;

        if src_w == 0 || src_h == 0 {
            return Self {
                viewport,
                rotation,
                rect: PixelRect {
                    x: 0,
                    y: 0,
                    width: dst_w,
                    height: dst_h,
                },
                scale_x: 1.0,
                scale_y: 1.0,
            };
        }

        let src_aspect = src_w as f64 / src_h as f64;
        let dst_aspect = dst_w as f64 / dst_h as f64;

        let (width, height) = if dst_aspect > src_aspect {
            // Pillarbox
            let w = ((dst_h as f64 * src_aspect).round() as u32).clamp(1, dst_w);
            (w, dst_h)
        } else {
            // Letterbox
            let h = ((dst_w as f64 / src_aspect).round() as u32).clamp(1, dst_h);
            (dst_w, h)
        };

        Self {
            viewport,
            rotation,
            rect: PixelRect {
                x: (dst_w - width) / 2,
                y: (dst_h - height) / 2,
                width,
                height,
            },
            scale_x: width as f32 / dst_w as f32,
            scale_y: height as f32 / dst_h as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(90).unwrap(), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(450).unwrap(), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Deg270);
        assert!(Rotation::from_degrees(45).is_err());
        assert!(Rotation::from_degrees(91).is_err());
    }

    #[test]
    fn test_viewport_rejects_zero() {
        assert!(Viewport::new(0, 100).is_err());
        assert!(Viewport::new(100, 0).is_err());
        assert!(Viewport::new(1, 1).is_ok());
    }

    #[test]
    fn test_letterbox_wide_source() {
        let viewport = Viewport::new(1000, 1000).unwrap();
        let layout = DrawLayout::fit(2000, 1000, viewport, Rotation::Deg0);
        assert_eq!(layout.rect, PixelRect { x: 0, y: 250, width: 1000, height: 500 });
        assert_eq!(layout.scale_x, 1.0);
    }

    #[test]
    fn test_pillarbox_square_source() {
        let viewport = Viewport::new(1920, 1080).unwrap();
        let layout = DrawLayout::fit(1080, 1080, viewport, Rotation::Deg0);
        assert_eq!(layout.rect, PixelRect { x: 420, y: 0, width: 1080, height: 1080 });
        assert_eq!(layout.scale_y, 1.0);
    }

    #[test]
    fn test_rotation_swaps_source() {
        let viewport = Viewport::new(1080, 1920).unwrap();
        let layout = DrawLayout::fit(1920, 1080, viewport, Rotation::Deg90);
        assert_eq!(layout.rect, PixelRect { x: 0, y: 0, width: 1080, height: 1920 });
    }

    proptest! {
        #[test]
        fn fit_never_exceeds_viewport(
            sw in 1u32..8000, sh in 1u32..8000,
            dw in 1u32..4000, dh in 1u32..4000,
            quarter in 0i32..4,
        ) {
            let rotation = Rotation::from_degrees(quarter * 90).unwrap();
            let layout = DrawLayout::fit(sw, sh, Viewport::new(dw, dh).unwrap(), rotation);
            prop_assert!(layout.rect.x + layout.rect.width <= dw);
            prop_assert!(layout.rect.y + layout.rect.height <= dh);
            // One dimension always fills the viewport
            prop_assert!(layout.rect.width == dw || layout.rect.height == dh);
        }
    }
}
