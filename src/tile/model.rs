//! Tile identity, geometry and lifecycle.
//!
//! A [`Tile`] is one cell of one detail level. It moves through a small state
//! machine:
//!
//! ```text
//!              submit()               complete_decode()
//! Unassigned ────────────▶ PendingDecode ──────────────▶ Decoded
//!     ▲                          │                          │
//!     └──────── reset() ─────────┴──────────────────────────┘
//! ```
//!
//! Only the owning thread mutates a tile. Decode workers never touch it: they
//! hand the decoded image back in a message and the owner applies it with
//! [`Tile::complete_decode`], after checking [`Tile::awaits`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::geom::{unscale, Rect};
use crate::provider::DecodedImage;

use super::scheduler::{DecodeScheduler, DecodeTask, TaskId};

/// Default cross-fade duration for a freshly decoded tile.
pub const DEFAULT_TRANSITION_DURATION: Duration = Duration::from_millis(200);

// =============================================================================
// Tile Key
// =============================================================================

/// Identity of a tile: `(column, row, level scale)`.
///
/// The scale is compared bitwise so the key can be hashed.
#[derive(Debug, Clone, Copy)]
pub struct TileKey {
    /// Tile column (0-indexed from left)
    pub column: i32,

    /// Tile row (0-indexed from top)
    pub row: i32,

    /// Scale of the detail level that produced the tile
    pub level_scale: f32,
}

impl TileKey {
    pub fn new(column: i32, row: i32, level_scale: f32) -> Self {
        Self {
            column,
            row,
            level_scale,
        }
    }
}

impl PartialEq for TileKey {
    fn eq(&self, other: &Self) -> bool {
        self.column == other.column
            && self.row == other.row
            && self.level_scale.to_bits() == other.level_scale.to_bits()
    }
}

impl Eq for TileKey {}

impl Hash for TileKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.column.hash(state);
        self.row.hash(state);
        self.level_scale.to_bits().hash(state);
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.column, self.row, self.level_scale)
    }
}

// =============================================================================
// Tile Descriptor
// =============================================================================

/// Everything a decode provider needs to produce pixels for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDescriptor {
    pub key: TileKey,

    /// Requested tile width in level pixels
    pub tile_width: u32,

    /// Requested tile height in level pixels
    pub tile_height: u32,

    /// Opaque per-level image source (e.g. a path pattern)
    pub source: Arc<str>,
}

impl TileDescriptor {
    pub fn column(&self) -> i32 {
        self.key.column
    }

    pub fn row(&self) -> i32 {
        self.key.row
    }
}

// =============================================================================
// Tile State
// =============================================================================

/// Lifecycle state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    /// No decode requested, no image held
    Unassigned,

    /// A decode task is queued or running
    PendingDecode,

    /// The decoded image is held and can be drawn
    Decoded,
}

/// Non-owning link from a tile to its in-flight decode task.
#[derive(Debug, Clone)]
struct TaskLink {
    id: TaskId,
    task: Weak<DecodeTask>,
}

// =============================================================================
// Tile
// =============================================================================

/// One rectangular cell of a detail level.
#[derive(Debug, Clone)]
pub struct Tile {
    key: TileKey,
    source: Arc<str>,

    /// Requested size, used for the decode descriptor
    tile_width: u32,
    tile_height: u32,

    /// Current size; replaced by the decoded image's size
    width: i32,
    height: i32,

    base_rect: Rect,
    intrinsic_rect: Rect,
    relative_rect: Rect,

    state: TileState,
    image: Option<DecodedImage>,
    task: Option<TaskLink>,

    transitions_enabled: bool,
    transition_duration: Duration,
    progress: f32,
    render_timestamp: Option<Instant>,
}

impl Tile {
    /// Create an unassigned tile for `(column, row)` of a level.
    pub fn new(
        column: i32,
        row: i32,
        tile_width: u32,
        tile_height: u32,
        level_scale: f32,
        source: Arc<str>,
    ) -> Self {
        let mut tile = Self {
            key: TileKey::new(column, row, level_scale),
            source,
            tile_width,
            tile_height,
            width: tile_width as i32,
            height: tile_height as i32,
            base_rect: Rect::default(),
            intrinsic_rect: Rect::default(),
            relative_rect: Rect::default(),
            state: TileState::Unassigned,
            image: None,
            task: None,
            transitions_enabled: false,
            transition_duration: DEFAULT_TRANSITION_DURATION,
            progress: 0.0,
            render_timestamp: None,
        };
        tile.update_rects();
        tile
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn column(&self) -> i32 {
        self.key.column
    }

    pub fn row(&self) -> i32 {
        self.key.row
    }

    pub fn level_scale(&self) -> f32 {
        self.key.level_scale
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Decode request for this tile.
    pub fn descriptor(&self) -> TileDescriptor {
        TileDescriptor {
            key: self.key,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            source: Arc::clone(&self.source),
        }
    }

    /// Rectangle in the level's own pixel space.
    pub fn base_rect(&self) -> Rect {
        self.base_rect
    }

    /// Source rectangle within the decoded image.
    pub fn intrinsic_rect(&self) -> Rect {
        self.intrinsic_rect
    }

    /// Rectangle in unscaled canvas space (level pixels divided by level scale).
    pub fn relative_rect(&self) -> Rect {
        self.relative_rect
    }

    /// Rectangle in canvas pixels at the given display scale.
    pub fn scaled_rect(&self, scale: f32) -> Rect {
        self.relative_rect.scaled(scale)
    }

    pub fn image(&self) -> Option<&DecodedImage> {
        self.image.as_ref()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// Id of the in-flight decode task, while pending.
    pub fn task_id(&self) -> Option<TaskId> {
        self.task.as_ref().map(|link| link.id)
    }

    /// Hand the tile to the scheduler. Legal only from `Unassigned`.
    ///
    /// Returns `false` (and does nothing) in any other state, so a tile is
    /// never decoded twice concurrently.
    pub fn submit(&mut self, scheduler: &mut DecodeScheduler) -> bool {
        if self.state != TileState::Unassigned {
            return false;
        }

        self.state = TileState::PendingDecode;
        let task = scheduler.execute(self.descriptor());
        self.task = Some(TaskLink {
            id: task.id(),
            task: Arc::downgrade(&task),
        });
        true
    }

    /// True when this tile is pending on exactly the given task.
    ///
    /// Late completions from a reset or resubmitted tile fail this check and
    /// must be discarded.
    pub fn awaits(&self, task_id: TaskId) -> bool {
        self.state == TileState::PendingDecode && self.task_id() == Some(task_id)
    }

    /// Install a decoded image and move to `Decoded`.
    ///
    /// Geometry is recomputed from the image's real size, which may differ
    /// from the requested tile size (edge tiles). Ignored unless pending.
    pub fn complete_decode(&mut self, image: DecodedImage) -> bool {
        if self.state != TileState::PendingDecode {
            return false;
        }

        self.width = image.width() as i32;
        self.height = image.height() as i32;
        self.image = Some(image);
        self.task = None;
        self.update_rects();
        self.state = TileState::Decoded;
        true
    }

    /// Cancel any in-flight task, release the image and return to `Unassigned`.
    /// Geometry goes back to the requested tile size.
    ///
    /// Idempotent.
    pub fn reset(&mut self) {
        if let Some(link) = self.task.take() {
            if let Some(task) = link.task.upgrade() {
                task.cancel();
            }
        }

        self.render_timestamp = None;
        self.state = TileState::Unassigned;
        self.image = None;

        self.width = self.tile_width as i32;
        self.height = self.tile_height as i32;
        self.update_rects();
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Enable or disable the cross-fade. Enabling restarts progress at 0.
    pub fn set_transitions_enabled(&mut self, enabled: bool) {
        self.transitions_enabled = enabled;
        if enabled {
            self.progress = 0.0;
        }
    }

    pub fn transitions_enabled(&self) -> bool {
        self.transitions_enabled
    }

    pub fn set_transition_duration(&mut self, duration: Duration) {
        self.transition_duration = duration;
    }

    /// Advance the cross-fade to `now`.
    ///
    /// The first call stamps the render time and leaves progress at 0. Later
    /// calls derive progress from elapsed time, saturating at 1; once
    /// saturated, transitions are switched off for good.
    pub fn compute_progress(&mut self, now: Instant) {
        if !self.transitions_enabled {
            return;
        }

        let Some(started) = self.render_timestamp else {
            self.progress = 0.0;
            self.render_timestamp = Some(now);
            return;
        };

        let elapsed = now.saturating_duration_since(started);
        self.progress = if self.transition_duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / self.transition_duration.as_secs_f64()).min(1.0) as f32
        };

        if self.progress >= 1.0 {
            self.progress = 1.0;
            self.render_timestamp = None;
            self.transitions_enabled = false;
        }
    }

    /// Cross-fade progress in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Opacity to draw with: progress while fading, fully opaque otherwise.
    pub fn opacity(&self) -> f32 {
        if self.transitions_enabled {
            self.progress
        } else {
            1.0
        }
    }

    /// True while the tile is still fading in.
    pub fn is_dirty(&self) -> bool {
        self.transitions_enabled && self.progress < 1.0
    }

    fn update_rects(&mut self) {
        let left = self.key.column * self.tile_width as i32;
        let top = self.key.row * self.tile_height as i32;
        let scale = self.key.level_scale;

        self.base_rect = Rect::new(left, top, left + self.width, top + self.height);
        self.intrinsic_rect = Rect::new(0, 0, self.width, self.height);
        self.relative_rect = Rect::new(
            unscale(self.base_rect.left, scale),
            unscale(self.base_rect.top, scale),
            unscale(self.base_rect.right, scale),
            unscale(self.base_rect.bottom, scale),
        );
    }
}

/// Tiles are equal when their keys are equal, regardless of state.
impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Tile {}

impl Hash for Tile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key.column, self.key.row)
    }
}

// =============================================================================
// Tests
// =============================================================================
