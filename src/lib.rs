//! # tileview
//!
//! Core of a deep-zoom tiled image renderer.
//!
//! A very large image is stored as a pyramid of detail levels, each cut into
//! fixed-size tiles. As the user pans and zooms, the renderer decides which
//! level to show, which tiles of it are visible, decodes those tiles on a
//! worker pool and composites them with fade-in transitions. Tiles of the
//! previous level are drawn underneath until the new level covers them.
//!
//! ## Features
//!
//! - **Level selection**: picks the smallest level whose scale covers the
//!   display scale, with an optional lock
//! - **Visibility**: maps a padded viewport to a tile index rectangle
//! - **Decode pool**: bounded, growable worker threads with coalescing and
//!   cancellation of stale work
//! - **Compositing**: debounced renders, holdovers, dirty-region tracking and
//!   cross-fades, stopping once nothing changes
//!
//! ## Architecture
//!
//! - [`geom`] - Rectangles, dirty regions and scale rounding
//! - [`detail`] - Detail levels and the level selector
//! - [`tile`] - Tile state machine and the decode scheduler
//! - [`provider`] - Decode providers and the decoded image type
//! - [`render`] - Compositor, render surfaces and observers
//! - [`manifest`] - JSON description of an image pyramid
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tileview::{Canvas, Compositor, CompositorConfig, FileTileProvider, Rect};
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = Arc::new(FileTileProvider::new("/data/pyramid"));
//!     let mut compositor = Compositor::new(provider, CompositorConfig::default());
//!
//!     compositor.set_size(4096, 3072);
//!     compositor
//!         .add_detail_level(0.25, "250/{col}_{row}.png", 256, 256)
//!         .unwrap();
//!     compositor
//!         .add_detail_level(1.0, "1000/{col}_{row}.png", 256, 256)
//!         .unwrap();
//!     compositor.set_scale(0.25);
//!     compositor.update_viewport(Rect::new(0, 0, 1024, 768));
//!
//!     let mut canvas = Canvas::new(Rect::new(0, 0, 1024, 768));
//!     loop {
//!         compositor.poll();
//!         if compositor.needs_draw() {
//!             canvas.clear();
//!             compositor.draw(&mut canvas);
//!         } else if compositor.is_idle() {
//!             break;
//!         } else {
//!             compositor.wait_for_work().await;
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod detail;
pub mod error;
pub mod geom;
pub mod manifest;
pub mod provider;
pub mod render;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, PlanConfig, RenderConfig, ViewportArgs};
pub use detail::{DetailLevel, LevelChangeObserver, LevelKey, LevelSelector, TileRange, ViewportState};
pub use error::{DecodeError, LevelError, ManifestError};
pub use geom::{Rect, Region};
pub use manifest::{LevelSpec, Manifest};
pub use provider::{format_source, CachedProvider, DecodeProvider, DecodedImage, FileTileProvider};
pub use render::{
    Canvas, Compositor, CompositorConfig, DrawCommand, RecordedDraw, RecordingSurface,
    RenderObserver, RenderStats, RenderSurface, DEFAULT_RENDER_BUFFER, FAST_RENDER_BUFFER,
};
pub use tile::{
    DecodeScheduler, PoolConfig, SchedulerEvent, TaskId, Tile, TileDescriptor, TileKey, TileState,
};
