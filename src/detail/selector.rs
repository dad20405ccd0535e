//! Active level selection and viewport bookkeeping.

use tracing::debug;

use crate::error::LevelError;
use crate::geom::{self, Rect};

use super::level::{DetailLevel, LevelKey, ViewportState};

/// Notified when the active detail level changes.
pub trait LevelChangeObserver: Send {
    fn on_level_changed(&mut self, level: &DetailLevel);
}

impl<F> LevelChangeObserver for F
where
    F: FnMut(&DetailLevel) + Send,
{
    fn on_level_changed(&mut self, level: &DetailLevel) {
        self(level)
    }
}

/// Owns the registered detail levels and picks the one to render.
///
/// Levels are kept sorted by ascending scale. The active level is the coarsest
/// one that is still at least as fine as the display scale, so tiles are
/// downsampled rather than upsampled.
pub struct LevelSelector {
    levels: Vec<DetailLevel>,
    current: Option<LevelKey>,
    locked: bool,

    scale: f32,
    base_width: i32,
    base_height: i32,
    scaled_width: i32,
    scaled_height: i32,

    viewport: Rect,
    padding: i32,
    computed_viewport: Rect,

    observer: Option<Box<dyn LevelChangeObserver>>,
}

impl Default for LevelSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelSelector {
    pub fn new() -> Self {
        Self {
            levels: Vec::new(),
            current: None,
            locked: false,
            scale: 1.0,
            base_width: 0,
            base_height: 0,
            scaled_width: 0,
            scaled_height: 0,
            viewport: Rect::default(),
            padding: 0,
            computed_viewport: Rect::default(),
            observer: None,
        }
    }

    // =========================================================================
    // Levels
    // =========================================================================

    /// Register a level and re-run selection.
    ///
    /// Returns `Ok(false)` if an equal level (same scale and source) is
    /// already registered; the duplicate is ignored.
    pub fn add_detail_level(
        &mut self,
        scale: f32,
        source: &str,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<bool, LevelError> {
        let level = DetailLevel::new(scale, source, tile_width, tile_height)?;
        if self.levels.contains(&level) {
            return Ok(false);
        }

        debug!(scale, source, tile_width, tile_height, "detail level registered");
        self.levels.push(level);
        self.levels.sort();
        self.update();
        Ok(true)
    }

    /// Drop every registered level.
    ///
    /// The previously active key is kept (it may still be rendering) until a
    /// new level is registered.
    pub fn reset_detail_levels(&mut self) {
        self.levels.clear();
        self.update();
    }

    pub fn levels(&self) -> &[DetailLevel] {
        &self.levels
    }

    pub fn level(&self, key: &LevelKey) -> Option<&DetailLevel> {
        self.levels.iter().find(|level| level.key() == key)
    }

    pub fn level_mut(&mut self, key: &LevelKey) -> Option<&mut DetailLevel> {
        self.levels.iter_mut().find(|level| level.key() == key)
    }

    /// Level that the current scale selects, ignoring the lock.
    ///
    /// Zero levels yield `None`, a single level is always selected. Otherwise
    /// the smallest scale that is `>=` the display scale wins; below every
    /// level the smallest is used, above every level the largest.
    pub fn select_level_for_scale(&self) -> Option<&DetailLevel> {
        match self.levels.len() {
            0 => None,
            1 => self.levels.first(),
            _ => self
                .levels
                .iter()
                .find(|level| level.scale() >= self.scale)
                .or_else(|| self.levels.last()),
        }
    }

    /// Key of the active level.
    pub fn current_level(&self) -> Option<&LevelKey> {
        self.current.as_ref()
    }

    /// Observer called with the new level whenever the active level changes.
    pub fn set_level_change_observer(&mut self, observer: Box<dyn LevelChangeObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_level_change_observer(&mut self) {
        self.observer = None;
    }

    /// Freeze the active level across scale changes.
    pub fn lock_detail_level(&mut self) {
        self.locked = true;
    }

    /// Resume scale-driven selection on the next update.
    pub fn unlock_detail_level(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Force every level to report a change on its next computation.
    pub fn invalidate_all(&mut self) {
        for level in &mut self.levels {
            level.invalidate();
        }
    }

    // =========================================================================
    // Scale and Size
    // =========================================================================

    /// Set the display scale and re-run selection.
    ///
    /// Returns the new active level key if it changed.
    pub fn set_scale(&mut self, scale: f32) -> Option<LevelKey> {
        self.scale = scale;
        self.update()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Set the unscaled canvas size.
    pub fn set_size(&mut self, width: i32, height: i32) -> Option<LevelKey> {
        self.base_width = width;
        self.base_height = height;
        self.update()
    }

    pub fn base_width(&self) -> i32 {
        self.base_width
    }

    pub fn base_height(&self) -> i32 {
        self.base_height
    }

    pub fn scaled_width(&self) -> i32 {
        self.scaled_width
    }

    pub fn scaled_height(&self) -> i32 {
        self.scaled_height
    }

    /// Re-run selection and refresh scaled dimensions.
    ///
    /// Selection is skipped while locked. When the active level changes the
    /// observer is notified and the new key is returned.
    pub fn update(&mut self) -> Option<LevelKey> {
        let mut changed = None;

        if !self.locked {
            if let Some(selected) = self.select_level_for_scale() {
                let key = selected.key().clone();
                if self.current.as_ref() != Some(&key) {
                    changed = Some(key.clone());
                    self.current = Some(key);
                }
            }
        }

        self.scaled_width = geom::scale(self.base_width, self.scale);
        self.scaled_height = geom::scale(self.base_height, self.scale);

        if let Some(key) = &changed {
            debug!(level = %key, scale = self.scale, "active detail level changed");
            if let Some(observer) = self.observer.as_mut() {
                if let Some(level) = self.levels.iter().find(|level| level.key() == key) {
                    observer.on_level_changed(level);
                }
            }
        }
        changed
    }

    // =========================================================================
    // Viewport
    // =========================================================================

    /// Set the raw viewport in canvas pixels at the current scale.
    pub fn update_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
        self.computed_viewport = viewport.padded(self.padding);
    }

    /// Grow the viewport by `pixels` on every side before visibility is
    /// computed, so tiles just off screen are decoded ahead of time.
    pub fn set_viewport_padding(&mut self, pixels: i32) {
        self.padding = pixels;
        self.computed_viewport = self.viewport.padded(pixels);
    }

    pub fn viewport_padding(&self) -> i32 {
        self.padding
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Padded viewport.
    pub fn computed_viewport(&self) -> Rect {
        self.computed_viewport
    }

    /// Padded viewport with every edge multiplied by `factor`.
    pub fn computed_scaled_viewport(&self, factor: f32) -> Rect {
        self.computed_viewport.scaled(factor)
    }

    /// Snapshot handed to [`DetailLevel::compute_current_state`].
    pub fn viewport_state(&self) -> ViewportState {
        ViewportState {
            viewport: self.computed_viewport,
            scale: self.scale,
            scaled_width: self.scaled_width,
            scaled_height: self.scaled_height,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
