//! Command-line configuration for the `tileview` binary.
//!
//! Two subcommands share a common set of viewport arguments:
//!
//! - `render`: drive the full pipeline headlessly and write the composited
//!   viewport as a PNG
//! - `plan`: print the level the selector picks and its visible tile range,
//!   without decoding anything
//!
//! # Environment Variables
//!
//! Options can also be set via environment variables with the `TILEVIEW_`
//! prefix:
//!
//! - `TILEVIEW_MANIFEST` - Pyramid manifest (JSON)
//! - `TILEVIEW_SCALE` - Display scale (default: 1.0)
//! - `TILEVIEW_PADDING` - Viewport padding in pixels (default: 0)
//! - `TILEVIEW_RENDER_BUFFER_MS` - Render debounce (default: 250)
//! - `TILEVIEW_TRANSITION_MS` - Fade-in duration (default: 200)
//! - `TILEVIEW_MIN_WORKERS` / `TILEVIEW_MAX_WORKERS` - Decode pool bounds
//! - `TILEVIEW_CACHE_TILES` - Decoded tiles kept in memory (default: 256)
//! - `TILEVIEW_TIMEOUT_SECS` - Give up after this long (default: 30)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::geom::Rect;
use crate::provider::DEFAULT_DECODED_CACHE_CAPACITY;
use crate::render::CompositorConfig;
use crate::tile::PoolConfig;

// =============================================================================
// Default Values
// =============================================================================

/// Default display scale.
pub const DEFAULT_SCALE: f32 = 1.0;

/// Default render debounce in milliseconds.
pub const DEFAULT_RENDER_BUFFER_MS: u64 = 250;

/// Default fade-in duration in milliseconds.
pub const DEFAULT_TRANSITION_MS: u64 = 200;

/// Default overall timeout for a headless render, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// CLI Arguments
// =============================================================================

/// tileview - deep-zoom tiled image renderer.
#[derive(Parser, Debug, Clone)]
#[command(name = "tileview")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render a viewport of a tiled image to a PNG file.
    Render(RenderConfig),

    /// Print the detail level and tile range a viewport would use.
    Plan(PlanConfig),
}

/// Arguments describing what part of the image is shown.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct ViewportArgs {
    /// Pyramid manifest (JSON).
    #[arg(long, env = "TILEVIEW_MANIFEST")]
    pub manifest: PathBuf,

    /// Display scale; 1.0 is full resolution.
    #[arg(long, default_value_t = DEFAULT_SCALE, env = "TILEVIEW_SCALE")]
    pub scale: f32,

    /// Viewport left edge in scaled pixels.
    #[arg(long, default_value_t = 0)]
    pub x: i32,

    /// Viewport top edge in scaled pixels.
    #[arg(long, default_value_t = 0)]
    pub y: i32,

    /// Viewport width. Defaults to the scaled image width.
    #[arg(long)]
    pub width: Option<i32>,

    /// Viewport height. Defaults to the scaled image height.
    #[arg(long)]
    pub height: Option<i32>,

    /// Extra pixels around the viewport considered visible.
    #[arg(long, default_value_t = 0, env = "TILEVIEW_PADDING")]
    pub padding: i32,
}

impl ViewportArgs {
    pub fn validate(&self) -> Result<(), String> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(format!("scale must be a positive number, got {}", self.scale));
        }
        if self.width.is_some_and(|w| w <= 0) || self.height.is_some_and(|h| h <= 0) {
            return Err("viewport width and height must be greater than 0".to_string());
        }
        if self.padding < 0 {
            return Err("padding must not be negative".to_string());
        }
        Ok(())
    }

    /// Viewport in scaled pixels for an image of `scaled_width` x `scaled_height`.
    pub fn viewport(&self, scaled_width: i32, scaled_height: i32) -> Rect {
        let width = self.width.unwrap_or(scaled_width - self.x);
        let height = self.height.unwrap_or(scaled_height - self.y);
        Rect::from_xywh(self.x, self.y, width.max(0), height.max(0))
    }
}

// =============================================================================
// Render Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    #[command(flatten)]
    pub view: ViewportArgs,

    /// Output PNG path.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Debounce between a viewport change and the visibility pass.
    #[arg(long, default_value_t = DEFAULT_RENDER_BUFFER_MS, env = "TILEVIEW_RENDER_BUFFER_MS")]
    pub render_buffer_ms: u64,

    /// Fade-in duration for decoded tiles.
    #[arg(long, default_value_t = DEFAULT_TRANSITION_MS, env = "TILEVIEW_TRANSITION_MS")]
    pub transition_ms: u64,

    /// Draw decoded tiles at full opacity immediately.
    #[arg(long, default_value_t = false)]
    pub no_transitions: bool,

    /// Decode threads started up front. Defaults to half the cores.
    #[arg(long, env = "TILEVIEW_MIN_WORKERS")]
    pub min_workers: Option<usize>,

    /// Upper bound on decode threads. Defaults to the core count.
    #[arg(long, env = "TILEVIEW_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Decoded tiles kept in memory.
    #[arg(long, default_value_t = DEFAULT_DECODED_CACHE_CAPACITY, env = "TILEVIEW_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Abort if the render has not settled after this many seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "TILEVIEW_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Print render statistics as JSON on stdout.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl RenderConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.view.validate()?;

        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }
        if self.min_workers == Some(0) || self.max_workers == Some(0) {
            return Err("worker counts must be greater than 0".to_string());
        }
        if let (Some(min), Some(max)) = (self.min_workers, self.max_workers) {
            if min > max {
                return Err(format!(
                    "min_workers ({}) must not exceed max_workers ({})",
                    min, max
                ));
            }
        }

        Ok(())
    }

    /// Decode pool bounds, filling unset values from the core count.
    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::from_available_parallelism();
        let min = self.min_workers.unwrap_or(defaults.min_workers);
        let max = self.max_workers.unwrap_or(defaults.max_workers.max(min));
        PoolConfig::new(min, max)
    }

    pub fn compositor_config(&self) -> CompositorConfig {
        CompositorConfig {
            render_buffer: Duration::from_millis(self.render_buffer_ms),
            transition_duration: Duration::from_millis(self.transition_ms),
            transitions_enabled: !self.no_transitions,
            viewport_padding: self.view.padding,
            pool: self.pool_config(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Plan Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct PlanConfig {
    #[command(flatten)]
    pub view: ViewportArgs,
}

impl PlanConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.view.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
