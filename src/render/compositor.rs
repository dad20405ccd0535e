//! Render cadence and compositing.
//!
//! The [`Compositor`] is the single owner of all mutable render state: the
//! level selector, the tracked tile sets and the decode pool's receiving end.
//! It is driven from one thread (or one task) by three kinds of calls:
//!
//! - **Input**: [`set_scale`](Compositor::set_scale),
//!   [`update_viewport`](Compositor::update_viewport) and friends. These
//!   request a debounced render.
//! - **Pump**: [`poll`](Compositor::poll) applies decode results posted by
//!   workers and fires the debounced render once its deadline has passed.
//!   [`wait_for_work`](Compositor::wait_for_work) suspends until there is
//!   something to pump.
//! - **Frame**: [`draw`](Compositor::draw) emits draw commands to a
//!   [`RenderSurface`] and reports whether another frame is needed.
//!
//! # Level switches
//!
//! When the active level changes, decoded tiles of the old level are kept as
//! *holdovers* and drawn underneath the new level until it is fully opaque:
//!
//! ```text
//!   viewport ─┬─ minus opaque current tiles ──▶ dirty region
//!             │
//!   holdovers ┴─ intersecting dirty region ───▶ drawn, others dropped
//!   current decoded tiles ────────────────────▶ drawn on top
//! ```
//!
//! After a frame in which nothing was mid-transition, exactly one more frame
//! is requested so the holdovers get purged, then drawing stops.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::detail::{LevelChangeObserver, LevelKey, LevelSelector, TileRange};
use crate::error::LevelError;
use crate::geom::{Rect, Region};
use crate::provider::DecodeProvider;
use crate::tile::{
    DecodeOutcome, DecodeScheduler, PoolConfig, SchedulerEvent, TaskReport, Tile, TileKey,
    TileState, DEFAULT_TRANSITION_DURATION,
};

use super::observer::RenderObserver;
use super::surface::{DrawCommand, RenderSurface};

/// Default debounce between a render request and the visibility pass.
pub const DEFAULT_RENDER_BUFFER: Duration = Duration::from_millis(250);

/// Short debounce for interactive use.
pub const FAST_RENDER_BUFFER: Duration = Duration::from_millis(15);

// =============================================================================
// Configuration
// =============================================================================

/// Runtime settings of a [`Compositor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorConfig {
    /// Debounce between a render request and the visibility pass
    pub render_buffer: Duration,

    /// Cross-fade duration for freshly decoded tiles
    pub transition_duration: Duration,

    /// Whether freshly decoded tiles fade in
    pub transitions_enabled: bool,

    /// Pixels added around the viewport before visibility is computed
    pub viewport_padding: i32,

    /// Decode pool bounds
    pub pool: PoolConfig,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            render_buffer: DEFAULT_RENDER_BUFFER,
            transition_duration: DEFAULT_TRANSITION_DURATION,
            transitions_enabled: true,
            viewport_padding: 0,
            pool: PoolConfig::default(),
        }
    }
}

// =============================================================================
// Compositor
// =============================================================================

/// Drives visibility, decoding and drawing for one tiled image.
pub struct Compositor {
    selector: LevelSelector,
    scheduler: DecodeScheduler,
    events: mpsc::UnboundedReceiver<SchedulerEvent>,
    inbox: VecDeque<SchedulerEvent>,
    observer: Option<Box<dyn RenderObserver>>,

    level_to_render: Option<LevelKey>,
    last_rendered: Option<LevelKey>,

    /// Tiles of the active level, keyed by identity
    tiles_in_viewport: HashMap<TileKey, Tile>,

    /// Decoded tiles of earlier levels still drawn underneath
    previous_tiles: HashMap<TileKey, Tile>,

    /// Per-frame list of current decoded tiles
    decoded_in_frame: Vec<TileKey>,
    dirty_region: Region,

    render_deadline: Option<Instant>,
    render_buffer: Duration,
    transition_duration: Duration,
    transitions_enabled: bool,

    is_rendering: bool,
    /// Decode batch whose completion ends the current render
    current_batch: Option<u64>,
    render_cancelled: bool,
    render_suppressed: bool,
    invalidated_on_clean_once: bool,
    needs_draw: bool,
}

impl Compositor {
    /// Create a compositor and start its decode pool.
    pub fn new(provider: Arc<dyn DecodeProvider>, config: CompositorConfig) -> Self {
        let (scheduler, events) = DecodeScheduler::new(provider, config.pool);
        let mut selector = LevelSelector::new();
        selector.set_viewport_padding(config.viewport_padding);

        Self {
            selector,
            scheduler,
            events,
            inbox: VecDeque::new(),
            observer: None,
            level_to_render: None,
            last_rendered: None,
            tiles_in_viewport: HashMap::new(),
            previous_tiles: HashMap::new(),
            decoded_in_frame: Vec::new(),
            dirty_region: Region::new(),
            render_deadline: None,
            render_buffer: config.render_buffer,
            transition_duration: config.transition_duration,
            transitions_enabled: config.transitions_enabled,
            is_rendering: false,
            current_batch: None,
            render_cancelled: false,
            render_suppressed: false,
            invalidated_on_clean_once: false,
            needs_draw: false,
        }
    }

    // =========================================================================
    // Levels and Viewport
    // =========================================================================

    /// Register a detail level. Returns `Ok(false)` for a duplicate.
    pub fn add_detail_level(
        &mut self,
        scale: f32,
        source: &str,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<bool, LevelError> {
        let added = self
            .selector
            .add_detail_level(scale, source, tile_width, tile_height)?;
        self.sync_active_level();
        Ok(added)
    }

    /// Drop every level and every tile.
    pub fn reset_detail_levels(&mut self) {
        self.clear();
        self.selector.reset_detail_levels();
        self.level_to_render = None;
        self.last_rendered = None;
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.selector.set_scale(scale);
        self.sync_active_level();
        self.needs_draw = true;
        self.request_render();
    }

    pub fn scale(&self) -> f32 {
        self.selector.scale()
    }

    /// Set the unscaled canvas size.
    pub fn set_size(&mut self, width: i32, height: i32) {
        self.selector.set_size(width, height);
        self.sync_active_level();
        self.request_render();
    }

    /// Set the viewport in canvas pixels at the current scale.
    pub fn update_viewport(&mut self, viewport: Rect) {
        self.selector.update_viewport(viewport);
        self.needs_draw = true;
        self.request_render();
    }

    pub fn set_viewport_padding(&mut self, pixels: i32) {
        self.selector.set_viewport_padding(pixels);
        self.request_render();
    }

    /// Keep the active level regardless of scale changes.
    pub fn lock_detail_level(&mut self) {
        self.selector.lock_detail_level();
    }

    pub fn unlock_detail_level(&mut self) {
        self.selector.unlock_detail_level();
    }

    pub fn set_level_change_observer(&mut self, observer: Box<dyn LevelChangeObserver>) {
        self.selector.set_level_change_observer(observer);
    }

    pub fn selector(&self) -> &LevelSelector {
        &self.selector
    }

    /// Level currently being rendered.
    pub fn current_level(&self) -> Option<&LevelKey> {
        self.level_to_render.as_ref()
    }

    /// Level whose last batch completed.
    pub fn last_rendered_level(&self) -> Option<&LevelKey> {
        self.last_rendered.as_ref()
    }

    /// Visible tile index rectangle of the active level, once computed.
    pub fn tile_range(&self) -> Option<TileRange> {
        let key = self.level_to_render.as_ref()?;
        self.selector.level(key)?.tile_range()
    }

    fn sync_active_level(&mut self) {
        if let Some(key) = self.selector.current_level().cloned() {
            self.update_active_level(key);
        }
    }

    /// Switch to `key`, keeping decoded tiles of the old level as holdovers.
    ///
    /// No-op when `key` is already active.
    pub fn update_active_level(&mut self, key: LevelKey) {
        if self.level_to_render.as_ref() == Some(&key) {
            return;
        }

        debug!(
            from = ?self.level_to_render.as_ref().map(ToString::to_string),
            to = %key,
            "switching render level"
        );

        if self.level_to_render.is_some() {
            self.cancel_render();
        }
        self.mark_tiles_as_previous();

        if let Some(level) = self.selector.level_mut(&key) {
            level.invalidate();
        }
        self.level_to_render = Some(key);
        self.invalidated_on_clean_once = false;
        self.needs_draw = true;
        self.request_render();
    }

    fn mark_tiles_as_previous(&mut self) {
        for (key, mut tile) in self.tiles_in_viewport.drain() {
            if tile.state() == TileState::Decoded {
                self.previous_tiles.insert(key, tile);
            } else {
                tile.reset();
            }
        }
        trace!(holdovers = self.previous_tiles.len(), "tiles marked as previous");
    }

    // =========================================================================
    // Render Control
    // =========================================================================

    /// Schedule a visibility pass after the render buffer, unless one is
    /// already pending. Also lifts a previous cancellation.
    pub fn request_render(&mut self) {
        self.render_cancelled = false;
        if self.level_to_render.is_none() {
            return;
        }
        if self.render_deadline.is_none() {
            self.render_deadline = Some(Instant::now() + self.render_buffer);
        }
    }

    /// Stop in-flight work: drain the queue, interrupt running decodes and
    /// return pending tiles to `Unassigned`.
    pub fn cancel_render(&mut self) {
        self.render_cancelled = true;

        let drained = self.scheduler.cancel_all();
        let mut reset = 0;
        for tile in self.tiles_in_viewport.values_mut() {
            if tile.state() == TileState::PendingDecode {
                tile.reset();
                reset += 1;
            }
        }
        debug!(drained = drained.len(), reset, "render cancelled");

        self.is_rendering = false;
        self.current_batch = None;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_render_cancelled();
        }
    }

    /// Keep new visibility passes from starting. In-flight work continues.
    pub fn suppress_render(&mut self) {
        self.render_suppressed = true;
    }

    /// Allow visibility passes again.
    pub fn resume_render(&mut self) {
        self.render_suppressed = false;
    }

    /// Cancel everything and drop every tile, current and held over.
    pub fn clear(&mut self) {
        self.cancel_render();

        for (_, mut tile) in self.previous_tiles.drain() {
            tile.reset();
        }
        for (_, mut tile) in self.tiles_in_viewport.drain() {
            tile.reset();
        }
        if let Some(key) = self.level_to_render.as_ref() {
            if let Some(level) = self.selector.level_mut(key) {
                level.invalidate();
            }
        }
        self.last_rendered = None;
        self.needs_draw = true;
    }

    /// Reset and drop tracked tiles outside the active level's last visible set.
    pub fn cleanup(&mut self) {
        let Some(key) = self.level_to_render.as_ref() else {
            return;
        };
        let Some(level) = self.selector.level(key) else {
            return;
        };
        if !level.has_computed_state() {
            return;
        }

        let visible: HashSet<TileKey> = level.visible_tiles().iter().map(Tile::key).collect();
        self.tiles_in_viewport.retain(|key, tile| {
            if visible.contains(key) {
                true
            } else {
                tile.reset();
                false
            }
        });
    }

    pub fn set_render_observer(&mut self, observer: Box<dyn RenderObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_render_observer(&mut self) {
        self.observer = None;
    }

    pub fn set_render_buffer(&mut self, buffer: Duration) {
        self.render_buffer = buffer;
    }

    pub fn render_buffer(&self) -> Duration {
        self.render_buffer
    }

    /// Applies to tiles decoded from now on.
    pub fn set_transition_duration(&mut self, duration: Duration) {
        self.transition_duration = duration;
    }

    pub fn transition_duration(&self) -> Duration {
        self.transition_duration
    }

    /// Applies to tiles decoded from now on.
    pub fn set_transitions_enabled(&mut self, enabled: bool) {
        self.transitions_enabled = enabled;
    }

    pub fn transitions_enabled(&self) -> bool {
        self.transitions_enabled
    }

    /// True between the start of a decode batch and its completion.
    pub fn is_rendering(&self) -> bool {
        self.is_rendering
    }

    pub fn is_render_cancelled(&self) -> bool {
        self.render_cancelled
    }

    pub fn is_render_suppressed(&self) -> bool {
        self.render_suppressed
    }

    /// No batch running, no render pending and no undelivered events.
    pub fn is_idle(&self) -> bool {
        !self.is_rendering && self.render_deadline.is_none() && self.inbox.is_empty()
    }

    /// When the pending render fires, if one is scheduled.
    pub fn render_deadline(&self) -> Option<Instant> {
        self.render_deadline
    }

    // =========================================================================
    // Event Pump
    // =========================================================================

    /// Apply every decode result posted so far and fire a due render.
    ///
    /// Never blocks. Returns `true` if anything happened.
    pub fn poll(&mut self) -> bool {
        let handled = self.drain_events();
        let fired = self.fire_due_render(Instant::now());
        handled || fired
    }

    /// [`poll`](Self::poll) with an explicit clock reading.
    pub fn poll_at(&mut self, now: Instant) -> bool {
        let handled = self.drain_events();
        let fired = self.fire_due_render(now);
        handled || fired
    }

    /// Suspend until a decode event arrives or the pending render is due.
    ///
    /// Returns immediately if an event is already buffered. Without a pending
    /// render this waits for the next event, so check [`is_idle`](Self::is_idle)
    /// first.
    pub async fn wait_for_work(&mut self) {
        if !self.inbox.is_empty() {
            return;
        }

        let event = match self.render_deadline {
            Some(deadline) => {
                tokio::select! {
                    event = self.events.recv() => event,
                    _ = tokio::time::sleep_until(deadline.into()) => None,
                }
            }
            None => self.events.recv().await,
        };

        if let Some(event) = event {
            self.inbox.push_back(event);
        }
    }

    fn drain_events(&mut self) -> bool {
        let mut handled = false;
        while let Some(event) = self.inbox.pop_front() {
            self.handle_event(event);
            handled = true;
        }
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled = true;
        }
        handled
    }

    fn fire_due_render(&mut self, now: Instant) -> bool {
        match self.render_deadline {
            Some(deadline) if deadline <= now => {
                self.render_deadline = None;
                self.render_tiles();
                true
            }
            _ => false,
        }
    }

    fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Task(report) => self.handle_task_report(report),
            SchedulerEvent::BatchComplete { batch } => {
                if self.current_batch != Some(batch) {
                    trace!(batch, "ignoring completion of superseded batch");
                    return;
                }
                self.on_batch_complete();
            }
        }
    }

    fn handle_task_report(&mut self, report: TaskReport) {
        let TaskReport {
            key,
            task_id,
            outcome,
        } = report;

        let tile = self
            .tiles_in_viewport
            .get_mut(&key)
            .filter(|tile| tile.awaits(task_id));

        match outcome {
            DecodeOutcome::Decoded(image) => {
                let Some(tile) = tile else {
                    trace!(tile = %key, "discarding stale decode");
                    return;
                };
                tile.set_transition_duration(self.transition_duration);
                tile.set_transitions_enabled(self.transitions_enabled);
                tile.complete_decode(image);
                self.invalidated_on_clean_once = false;
                self.needs_draw = true;
            }
            DecodeOutcome::Failed(error) => {
                let Some(tile) = tile else {
                    trace!(tile = %key, error = %error, "discarding stale decode error");
                    return;
                };
                tile.reset();
                warn!(tile = %key, error = %error, "tile decode failed");
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_decode_error(&key, &error);
                }
            }
            DecodeOutcome::Incomplete => {
                if let Some(tile) = tile {
                    tile.reset();
                }
            }
        }
    }

    fn on_batch_complete(&mut self) {
        self.is_rendering = false;
        self.current_batch = None;
        self.cleanup();
        if let Some(observer) = self.observer.as_mut() {
            observer.on_render_complete();
        }
        self.last_rendered = self.level_to_render.clone();
        self.request_render();
    }

    fn render_tiles(&mut self) {
        if !self.render_cancelled && !self.render_suppressed && self.level_to_render.is_some() {
            self.begin_render_task();
        }
    }

    fn begin_render_task(&mut self) {
        let Some(key) = self.level_to_render.clone() else {
            return;
        };
        let state = self.selector.viewport_state();
        let Some(level) = self.selector.level_mut(&key) else {
            return;
        };

        let changed = level.compute_current_state(&state);
        if !changed && self.last_rendered.as_ref() == Some(&key) {
            return;
        }

        let fresh = level.materialize_visible_tiles().to_vec();
        self.cleanup();

        let mut added = 0;
        for tile in fresh {
            if let std::collections::hash_map::Entry::Vacant(slot) =
                self.tiles_in_viewport.entry(tile.key())
            {
                slot.insert(tile);
                added += 1;
            }
        }

        debug!(
            level = %key,
            tracked = self.tiles_in_viewport.len(),
            added,
            "visibility pass"
        );

        if added == 0 {
            return;
        }
        let report = self.scheduler.queue(&mut self.tiles_in_viewport);
        if report.batch_started {
            self.is_rendering = true;
            self.current_batch = Some(report.batch);
            if let Some(observer) = self.observer.as_mut() {
                observer.on_render_start();
            }
        }
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    /// True when the last frame asked for another one, or state changed
    /// since.
    pub fn needs_draw(&self) -> bool {
        self.needs_draw
    }

    /// Draw one frame.
    ///
    /// Returns `true` if another frame should follow.
    pub fn draw<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) -> bool {
        self.draw_at(surface, Instant::now())
    }

    /// [`draw`](Self::draw) with an explicit clock reading for transitions.
    pub fn draw_at<S: RenderSurface + ?Sized>(&mut self, surface: &mut S, now: Instant) -> bool {
        self.needs_draw = false;
        let scale = self.selector.scale();

        if self.previous_tiles.is_empty() {
            self.draw_without_previous(surface, now, scale);
        } else {
            self.draw_with_previous(surface, now, scale);
        }
        self.needs_draw
    }

    fn draw_with_previous<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        now: Instant,
        scale: f32,
    ) {
        let mut should_invalidate = self.establish_dirty_region(now, scale);
        should_invalidate |= self.draw_previous_tiles(surface, now, scale);
        should_invalidate |= self.draw_and_clear_current_decoded(surface, scale);
        self.handle_invalidation(should_invalidate);
    }

    fn draw_without_previous<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        now: Instant,
        scale: f32,
    ) {
        let mut should_invalidate = false;
        for key in sorted_keys(&self.tiles_in_viewport) {
            let Some(tile) = self.tiles_in_viewport.get_mut(&key) else {
                continue;
            };
            if tile.state() != TileState::Decoded {
                continue;
            }
            tile.compute_progress(now);
            draw_tile(surface, tile, scale);
            should_invalidate |= tile.is_dirty();
        }
        self.handle_invalidation(should_invalidate);
    }

    /// Start from the padded viewport in unscaled space and cut out every
    /// opaque current tile. Collects current decoded tiles for this frame.
    fn establish_dirty_region(&mut self, now: Instant, scale: f32) -> bool {
        let inverted = if scale > 0.0 { 1.0 / scale } else { 0.0 };
        self.dirty_region
            .set(self.selector.computed_scaled_viewport(inverted));

        let mut should_invalidate = false;
        for key in sorted_keys(&self.tiles_in_viewport) {
            let Some(tile) = self.tiles_in_viewport.get_mut(&key) else {
                continue;
            };
            if tile.state() != TileState::Decoded {
                continue;
            }
            tile.compute_progress(now);
            self.decoded_in_frame.push(key);

            if tile.is_dirty() {
                should_invalidate = true;
            } else {
                self.dirty_region.subtract(&tile.relative_rect());
            }
        }
        should_invalidate
    }

    /// Draw holdovers still showing through the dirty region; drop the rest.
    fn draw_previous_tiles<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        now: Instant,
        scale: f32,
    ) -> bool {
        let region = &self.dirty_region;
        let mut should_invalidate = false;
        let mut dropped = 0;

        self.previous_tiles.retain(|_, tile| {
            if !region.intersects(&tile.relative_rect()) {
                tile.reset();
                dropped += 1;
                return false;
            }
            tile.compute_progress(now);
            draw_tile(surface, tile, scale);
            should_invalidate |= tile.is_dirty();
            true
        });

        if dropped > 0 {
            trace!(dropped, remaining = self.previous_tiles.len(), "holdovers purged");
        }
        should_invalidate
    }

    fn draw_and_clear_current_decoded<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        scale: f32,
    ) -> bool {
        let mut should_invalidate = false;
        for key in self.decoded_in_frame.drain(..) {
            if let Some(tile) = self.tiles_in_viewport.get(&key) {
                draw_tile(surface, tile, scale);
                should_invalidate |= tile.is_dirty();
            }
        }
        should_invalidate
    }

    /// Request another frame while anything is fading, then exactly one more
    /// once everything is opaque.
    fn handle_invalidation(&mut self, should_invalidate: bool) {
        if should_invalidate {
            self.invalidated_on_clean_once = false;
            self.needs_draw = true;
        } else if !self.invalidated_on_clean_once {
            self.invalidated_on_clean_once = true;
            self.needs_draw = true;
        }
    }

    /// Dirty region computed by the last frame that had holdovers.
    pub fn dirty_region(&self) -> &Region {
        &self.dirty_region
    }

    // =========================================================================
    // Tile Queries
    // =========================================================================

    pub fn tile(&self, key: &TileKey) -> Option<&Tile> {
        self.tiles_in_viewport.get(key)
    }

    /// Tracked tiles of the active level, in row-major order.
    pub fn tiles(&self) -> Vec<&Tile> {
        sorted_keys(&self.tiles_in_viewport)
            .iter()
            .filter_map(|key| self.tiles_in_viewport.get(key))
            .collect()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles_in_viewport.len()
    }

    /// Number of tracked tiles in `state`.
    pub fn count_in_state(&self, state: TileState) -> usize {
        self.tiles_in_viewport
            .values()
            .filter(|tile| tile.state() == state)
            .count()
    }

    pub fn previous_tiles(&self) -> impl Iterator<Item = &Tile> {
        self.previous_tiles.values()
    }

    pub fn previous_tile_count(&self) -> usize {
        self.previous_tiles.len()
    }
}

fn sorted_keys(tiles: &HashMap<TileKey, Tile>) -> Vec<TileKey> {
    let mut keys: Vec<TileKey> = tiles.keys().copied().collect();
    keys.sort_by_key(|key| (key.row, key.column));
    keys
}

fn draw_tile<S: RenderSurface + ?Sized>(surface: &mut S, tile: &Tile, scale: f32) {
    if let Some(image) = tile.image() {
        surface.draw_image(&DrawCommand {
            tile: tile.key(),
            image,
            source: tile.intrinsic_rect(),
            destination: tile.scaled_rect(scale),
            opacity: tile.opacity(),
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
