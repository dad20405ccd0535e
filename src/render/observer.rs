//! Render lifecycle callbacks.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::DecodeError;
use crate::tile::TileKey;

/// Receives render lifecycle events from the [`Compositor`](super::Compositor).
///
/// Every method has a no-op default so implementors only override what they
/// care about. All calls happen on the thread that drives the compositor.
pub trait RenderObserver: Send {
    /// A new decode batch was submitted while no batch was running.
    fn on_render_start(&mut self) {}

    /// Every task of the current batch finished.
    fn on_render_complete(&mut self) {}

    /// In-flight work was cancelled.
    fn on_render_cancelled(&mut self) {}

    /// One tile failed to decode. The tile was returned to `Unassigned`.
    fn on_decode_error(&mut self, _tile: &TileKey, _error: &DecodeError) {}
}

/// Shared observers: the compositor holds one handle, the caller another.
impl<O: RenderObserver> RenderObserver for Arc<Mutex<O>> {
    fn on_render_start(&mut self) {
        self.lock().on_render_start()
    }

    fn on_render_complete(&mut self) {
        self.lock().on_render_complete()
    }

    fn on_render_cancelled(&mut self) {
        self.lock().on_render_cancelled()
    }

    fn on_decode_error(&mut self, tile: &TileKey, error: &DecodeError) {
        self.lock().on_decode_error(tile, error)
    }
}

/// Counts lifecycle events. Handy for headless runs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub started: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub decode_errors: Vec<(TileKey, DecodeError)>,
}

impl RenderObserver for RenderStats {
    fn on_render_start(&mut self) {
        self.started += 1;
    }

    fn on_render_complete(&mut self) {
        self.completed += 1;
    }

    fn on_render_cancelled(&mut self) {
        self.cancelled += 1;
    }

    fn on_decode_error(&mut self, tile: &TileKey, error: &DecodeError) {
        self.decode_errors.push((*tile, error.clone()));
    }
}
