//! Shared providers and helpers for integration tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use tileview::error::DecodeError;
use tileview::{
    Compositor, CompositorConfig, DecodeProvider, DecodedImage, PoolConfig, TileDescriptor,
};

// =============================================================================
// Mock Provider
// =============================================================================

/// Produces solid tiles, with per-tile failures and an optional gate.
///
/// - Tiles listed with [`failing`](Self::failing) return `DecodeError::Io`.
/// - Tiles listed with [`missing`](Self::missing) return `Ok(None)`.
/// - While closed, sources containing `"gated"` block until
///   [`open`](Self::open) or cancellation.
pub struct MockProvider {
    color: Rgba<u8>,
    failing: HashSet<(i32, i32)>,
    missing: HashSet<(i32, i32)>,
    calls: AtomicUsize,
    open: Mutex<bool>,
    opened: Condvar,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            color: Rgba([40, 120, 200, 255]),
            failing: HashSet::new(),
            missing: HashSet::new(),
            calls: AtomicUsize::new(0),
            open: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = Rgba(color);
        self
    }

    pub fn failing(mut self, column: i32, row: i32) -> Self {
        self.failing.insert((column, row));
        self
    }

    pub fn missing(mut self, column: i32, row: i32) -> Self {
        self.missing.insert((column, row));
        self
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Number of decode calls that reached the provider.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeProvider for MockProvider {
    fn decode(
        &self,
        tile: &TileDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Option<DecodedImage>, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if tile.source.contains("gated") {
            let mut open = self.open.lock();
            while !*open {
                if cancel.is_cancelled() {
                    return Err(DecodeError::Cancelled);
                }
                self.opened.wait_for(&mut open, Duration::from_millis(5));
            }
        }

        let index = (tile.column(), tile.row());
        if self.failing.contains(&index) {
            return Err(DecodeError::Io {
                path: format!("{}", tile.key),
                message: "simulated read failure".to_string(),
            });
        }
        if self.missing.contains(&index) {
            return Ok(None);
        }

        Ok(Some(DecodedImage::new(RgbaImage::from_pixel(
            tile.tile_width,
            tile.tile_height,
            self.color,
        ))))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// No debounce, no fades, small pool.
pub fn test_config() -> CompositorConfig {
    CompositorConfig {
        render_buffer: Duration::ZERO,
        transitions_enabled: false,
        pool: PoolConfig::new(2, 4),
        ..CompositorConfig::default()
    }
}

/// Poll until nothing is pending, failing the test after five seconds.
pub fn settle(compositor: &mut Compositor) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        compositor.poll();
        if compositor.is_idle() {
            return;
        }
        assert!(Instant::now() < deadline, "compositor did not settle");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Write a solid PNG tile, creating parent directories.
pub fn write_tile(path: &Path, width: u32, height: u32, color: [u8; 4]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    RgbaImage::from_pixel(width, height, Rgba(color))
        .save(path)
        .unwrap();
}
