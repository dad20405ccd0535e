//! Integer pixel geometry.
//!
//! Rectangles are half-open: a rectangle covers `left..right` horizontally and
//! `top..bottom` vertically. Two rectangles that merely share an edge do not
//! intersect.
//!
//! [`Region`] is the dirty-region type used by the compositor: a set of
//! disjoint rectangles that supports subtraction and intersection queries.

use serde::Serialize;

/// Scale an integer dimension, rounding half up.
pub fn scale(base: i32, multiplier: f32) -> i32 {
    (base as f32 * multiplier + 0.5) as i32
}

/// Inverse of [`scale`]: divide an integer dimension, rounding half up.
pub fn unscale(base: i32, multiplier: f32) -> i32 {
    (base as f32 / multiplier + 0.5) as i32
}

// =============================================================================
// Rect
// =============================================================================

/// Axis-aligned integer rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Create a rectangle from its four edges.
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Create a rectangle from an origin and a size.
    pub const fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// True when the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// True when both rectangles share at least one pixel.
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    /// The overlapping part of two rectangles, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        Some(Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        ))
    }

    /// Grow the rectangle by `amount` pixels on every side.
    pub fn padded(&self, amount: i32) -> Rect {
        Rect::new(
            self.left - amount,
            self.top - amount,
            self.right + amount,
            self.bottom + amount,
        )
    }

    /// Multiply every edge by `factor`, truncating toward zero.
    pub fn scaled(&self, factor: f32) -> Rect {
        Rect::new(
            (self.left as f32 * factor) as i32,
            (self.top as f32 * factor) as i32,
            (self.right as f32 * factor) as i32,
            (self.bottom as f32 * factor) as i32,
        )
    }

    /// Move the rectangle by `(dx, dy)`.
    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Clamp the rectangle to `0..width` x `0..height`.
    pub fn clamped_to(&self, width: i32, height: i32) -> Rect {
        Rect::new(
            self.left.max(0),
            self.top.max(0),
            self.right.min(width),
            self.bottom.min(height),
        )
    }

    /// Pieces of `self` not covered by `cut`. At most four rectangles.
    fn subtract(&self, cut: &Rect) -> Vec<Rect> {
        let Some(overlap) = self.intersection(cut) else {
            return vec![*self];
        };

        let mut pieces = Vec::with_capacity(4);
        if self.top < overlap.top {
            pieces.push(Rect::new(self.left, self.top, self.right, overlap.top));
        }
        if overlap.bottom < self.bottom {
            pieces.push(Rect::new(self.left, overlap.bottom, self.right, self.bottom));
        }
        if self.left < overlap.left {
            pieces.push(Rect::new(self.left, overlap.top, overlap.left, overlap.bottom));
        }
        if overlap.right < self.right {
            pieces.push(Rect::new(overlap.right, overlap.top, self.right, overlap.bottom));
        }
        pieces
    }
}

// =============================================================================
// Region
// =============================================================================

/// A set of pixels described by disjoint rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    /// An empty region.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the region with a single rectangle.
    pub fn set(&mut self, rect: Rect) {
        self.rects.clear();
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    /// Remove every pixel covered by `rect`.
    pub fn subtract(&mut self, rect: &Rect) {
        if rect.is_empty() || self.rects.is_empty() {
            return;
        }
        self.rects = self
            .rects
            .iter()
            .flat_map(|piece| piece.subtract(rect))
            .collect();
    }

    /// True when `rect` shares at least one pixel with the region.
    pub fn intersects(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|piece| piece.intersects(rect))
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Total number of pixels in the region.
    pub fn area(&self) -> i64 {
        self.rects
            .iter()
            .map(|r| r.width() as i64 * r.height() as i64)
            .sum()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        let mut region = Region::new();
        region.set(rect);
        region
    }
}

// =============================================================================
// Tests
// =============================================================================
