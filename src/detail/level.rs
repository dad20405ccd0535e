//! A single resolution tier of the image pyramid.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

use crate::error::LevelError;
use crate::geom::Rect;
use crate::tile::Tile;

// =============================================================================
// Viewport State
// =============================================================================

/// What a level needs to know about the selector to compute visibility.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    /// Padded viewport in canvas pixels at the current scale
    pub viewport: Rect,

    /// Current display scale
    pub scale: f32,

    /// Canvas width at the current scale
    pub scaled_width: i32,

    /// Canvas height at the current scale
    pub scaled_height: i32,
}

/// Half-open tile index rectangle: rows `row_start..row_end`, columns
/// `column_start..column_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TileRange {
    pub row_start: i32,
    pub row_end: i32,
    pub column_start: i32,
    pub column_end: i32,
}

impl TileRange {
    pub fn rows(&self) -> i32 {
        (self.row_end - self.row_start).max(0)
    }

    pub fn columns(&self) -> i32 {
        (self.column_end - self.column_start).max(0)
    }

    /// Number of tiles covered.
    pub fn len(&self) -> usize {
        self.rows() as usize * self.columns() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, column: i32, row: i32) -> bool {
        (self.column_start..self.column_end).contains(&column)
            && (self.row_start..self.row_end).contains(&row)
    }
}

// =============================================================================
// Level Key
// =============================================================================

/// Identity of a detail level: its scale and image source.
///
/// The scale is compared bitwise so the key can be hashed.
#[derive(Debug, Clone)]
pub struct LevelKey {
    pub scale: f32,
    pub source: Arc<str>,
}

impl PartialEq for LevelKey {
    fn eq(&self, other: &Self) -> bool {
        self.scale.to_bits() == other.scale.to_bits() && self.source == other.source
    }
}

impl Eq for LevelKey {}

impl Hash for LevelKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scale.to_bits().hash(state);
        self.source.hash(state);
    }
}

impl fmt::Display for LevelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source, self.scale)
    }
}

// =============================================================================
// Detail Level
// =============================================================================

/// One resolution tier, subdivided into fixed-size tiles.
///
/// Visibility is computed in two steps: [`compute_current_state`] derives the
/// tile index rectangle covering the viewport and reports whether it moved,
/// then [`materialize_visible_tiles`] builds one [`Tile`] per index in it.
///
/// [`compute_current_state`]: DetailLevel::compute_current_state
/// [`materialize_visible_tiles`]: DetailLevel::materialize_visible_tiles
#[derive(Debug, Clone)]
pub struct DetailLevel {
    key: LevelKey,
    tile_width: u32,
    tile_height: u32,
    last_range: Option<TileRange>,
    visible: Vec<Tile>,
}

impl DetailLevel {
    /// Create a level. Scale must be finite and positive, tiles non-empty.
    pub fn new(
        scale: f32,
        source: impl Into<Arc<str>>,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, LevelError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(LevelError::InvalidScale { scale });
        }
        if tile_width == 0 || tile_height == 0 {
            return Err(LevelError::InvalidTileSize {
                width: tile_width,
                height: tile_height,
            });
        }

        Ok(Self {
            key: LevelKey {
                scale,
                source: source.into(),
            },
            tile_width,
            tile_height,
            last_range: None,
            visible: Vec::new(),
        })
    }

    pub fn key(&self) -> &LevelKey {
        &self.key
    }

    pub fn scale(&self) -> f32 {
        self.key.scale
    }

    pub fn source(&self) -> &Arc<str> {
        &self.key.source
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Display scale relative to this level's own scale.
    pub fn relative_scale(&self, display_scale: f32) -> f32 {
        display_scale / self.key.scale
    }

    /// Recompute the visible tile index rectangle.
    ///
    /// The viewport is clamped to the scaled canvas, then divided by the tile
    /// size in canvas pixels. Start indices round down and end indices round
    /// up, so partially visible edge tiles are always included.
    ///
    /// Returns `true` when the rectangle differs from the previous call (or
    /// when there was no previous call).
    pub fn compute_current_state(&mut self, state: &ViewportState) -> bool {
        let relative_scale = self.relative_scale(state.scale);
        let offset_width = self.tile_width as f32 * relative_scale;
        let offset_height = self.tile_height as f32 * relative_scale;

        let viewport = state
            .viewport
            .clamped_to(state.scaled_width, state.scaled_height);

        let range = TileRange {
            row_start: (viewport.top as f32 / offset_height).floor() as i32,
            row_end: (viewport.bottom as f32 / offset_height).ceil() as i32,
            column_start: (viewport.left as f32 / offset_width).floor() as i32,
            column_end: (viewport.right as f32 / offset_width).ceil() as i32,
        };

        let changed = self.last_range != Some(range);
        self.last_range = Some(range);
        changed
    }

    /// Rebuild the visible tile set from the last computed range.
    ///
    /// # Panics
    ///
    /// Panics if [`compute_current_state`](Self::compute_current_state) has
    /// not been called since creation or the last [`invalidate`](Self::invalidate).
    #[track_caller]
    pub fn materialize_visible_tiles(&mut self) -> &[Tile] {
        let range = self.require_range();

        self.visible.clear();
        self.visible.reserve(range.len());
        for row in range.row_start..range.row_end {
            for column in range.column_start..range.column_end {
                self.visible.push(Tile::new(
                    column,
                    row,
                    self.tile_width,
                    self.tile_height,
                    self.key.scale,
                    Arc::clone(&self.key.source),
                ));
            }
        }
        &self.visible
    }

    /// Tiles built by the last [`materialize_visible_tiles`](Self::materialize_visible_tiles).
    ///
    /// # Panics
    ///
    /// Panics if no state has been computed.
    #[track_caller]
    pub fn visible_tiles(&self) -> &[Tile] {
        self.require_range();
        &self.visible
    }

    /// Last computed index rectangle, if any.
    pub fn tile_range(&self) -> Option<TileRange> {
        self.last_range
    }

    pub fn has_computed_state(&self) -> bool {
        self.last_range.is_some()
    }

    /// Forget the last range so the next computation reports a change.
    pub fn invalidate(&mut self) {
        self.last_range = None;
    }

    #[track_caller]
    fn require_range(&self) -> TileRange {
        match self.last_range {
            Some(range) => range,
            None => panic!(
                "detail level {} has no computed state; call compute_current_state \
                 before querying visible tiles",
                self.key
            ),
        }
    }
}

impl PartialEq for DetailLevel {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DetailLevel {}

impl PartialOrd for DetailLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by ascending scale, then by source.
impl Ord for DetailLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .scale
            .total_cmp(&other.key.scale)
            .then_with(|| self.key.source.cmp(&other.key.source))
    }
}

// =============================================================================
// Tests
// =============================================================================
