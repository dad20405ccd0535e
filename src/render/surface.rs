//! Draw hook and software surfaces.
//!
//! The compositor never blits pixels itself. Each frame it emits a sequence of
//! [`DrawCommand`]s to a [`RenderSurface`]: which image, which part of it, where
//! on the canvas, and how opaque.
//!
//! Two surfaces ship with the crate:
//!
//! - [`Canvas`]: an RGBA buffer covering one viewport, blended in software
//! - [`RecordingSurface`]: records commands without drawing, for inspection

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::geom::Rect;
use crate::provider::DecodedImage;
use crate::tile::TileKey;

/// One tile draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawCommand<'a> {
    pub tile: TileKey,
    pub image: &'a DecodedImage,

    /// Region of `image` to draw
    pub source: Rect,

    /// Target rectangle in canvas pixels at the current scale
    pub destination: Rect,

    /// `0.0` (invisible) to `1.0` (opaque)
    pub opacity: f32,
}

/// Host paint hook.
pub trait RenderSurface {
    fn draw_image(&mut self, command: &DrawCommand<'_>);
}

impl<S: RenderSurface + ?Sized> RenderSurface for &mut S {
    fn draw_image(&mut self, command: &DrawCommand<'_>) {
        (**self).draw_image(command)
    }
}

// =============================================================================
// Recording Surface
// =============================================================================

/// A draw command with the image reference dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedDraw {
    pub tile: TileKey,
    pub source: Rect,
    pub destination: Rect,
    pub opacity: f32,
}

/// Surface that only records what it was asked to draw.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    frames: Vec<Vec<RecordedDraw>>,
    current: Vec<RecordedDraw>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current frame and start a new one.
    pub fn end_frame(&mut self) -> &[RecordedDraw] {
        let frame = std::mem::take(&mut self.current);
        self.frames.push(frame);
        self.frames.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// Commands recorded since the last [`end_frame`](Self::end_frame).
    pub fn current(&self) -> &[RecordedDraw] {
        &self.current
    }

    pub fn frames(&self) -> &[Vec<RecordedDraw>] {
        &self.frames
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.current.clear();
    }
}

impl RenderSurface for RecordingSurface {
    fn draw_image(&mut self, command: &DrawCommand<'_>) {
        self.current.push(RecordedDraw {
            tile: command.tile,
            source: command.source,
            destination: command.destination,
            opacity: command.opacity,
        });
    }
}

// =============================================================================
// Canvas
// =============================================================================

/// Software RGBA surface covering one viewport of the scaled canvas.
///
/// Destination rectangles are in scaled canvas pixels; the canvas translates
/// them by its origin, resamples the source to the destination size, clips,
/// and blends with the command's opacity.
pub struct Canvas {
    origin: (i32, i32),
    pixels: RgbaImage,
    background: Rgba<u8>,
    draws: usize,
}

impl Canvas {
    /// A transparent canvas covering `viewport`.
    pub fn new(viewport: Rect) -> Self {
        Self::with_background(viewport, Rgba([0, 0, 0, 0]))
    }

    pub fn with_background(viewport: Rect, background: Rgba<u8>) -> Self {
        let width = viewport.width().max(0) as u32;
        let height = viewport.height().max(0) as u32;
        Self {
            origin: (viewport.left, viewport.top),
            pixels: RgbaImage::from_pixel(width, height, background),
            background,
            draws: 0,
        }
    }

    /// Canvas-space rectangle this surface covers.
    pub fn viewport(&self) -> Rect {
        Rect::from_xywh(
            self.origin.0,
            self.origin.1,
            self.pixels.width() as i32,
            self.pixels.height() as i32,
        )
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }

    /// Number of draw commands blended since creation or the last clear.
    pub fn draw_count(&self) -> usize {
        self.draws
    }

    /// Fill with the background colour. Call before each frame.
    pub fn clear(&mut self) {
        for pixel in self.pixels.pixels_mut() {
            *pixel = self.background;
        }
        self.draws = 0;
    }
}

impl RenderSurface for Canvas {
    fn draw_image(&mut self, command: &DrawCommand<'_>) {
        let opacity = command.opacity.clamp(0.0, 1.0);
        let destination = command.destination;
        if opacity <= 0.0 || destination.is_empty() {
            return;
        }
        let Some(visible) = destination.intersection(&self.viewport()) else {
            return;
        };

        let pixels = command.image.pixels();
        let Some(source) = command.source.intersection(&Rect::new(
            0,
            0,
            pixels.width() as i32,
            pixels.height() as i32,
        )) else {
            return;
        };

        let cropped = imageops::crop_imm(
            pixels,
            source.left as u32,
            source.top as u32,
            source.width() as u32,
            source.height() as u32,
        )
        .to_image();
        let (dest_width, dest_height) = (destination.width() as u32, destination.height() as u32);
        let resampled = if cropped.dimensions() == (dest_width, dest_height) {
            cropped
        } else {
            imageops::resize(&cropped, dest_width, dest_height, FilterType::Triangle)
        };

        for y in visible.top..visible.bottom {
            for x in visible.left..visible.right {
                let src = resampled.get_pixel((x - destination.left) as u32, (y - destination.top) as u32);
                let dst = self
                    .pixels
                    .get_pixel_mut((x - self.origin.0) as u32, (y - self.origin.1) as u32);
                *dst = blend_over(*dst, *src, opacity);
            }
        }
        self.draws += 1;
    }
}

/// Straight-alpha "over" with an extra opacity multiplier on the overlay.
fn blend_over(base: Rgba<u8>, overlay: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let overlay_a = overlay[3] as f32 / 255.0 * opacity;
    if overlay_a <= 0.0 {
        return base;
    }
    let base_a = base[3] as f32 / 255.0;
    let out_a = overlay_a + base_a * (1.0 - overlay_a);

    let channel = |i: usize| {
        let value = (overlay[i] as f32 * overlay_a + base[i] as f32 * base_a * (1.0 - overlay_a))
            / out_a;
        value.round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}
