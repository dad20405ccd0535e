//! Compositing and drawing.
//!
//! - [`Compositor`]: render cadence, visibility diffing, holdovers and cross-fade
//! - [`RenderSurface`]: the host draw hook, fed with [`DrawCommand`]s
//! - [`Canvas`]: software surface backed by an RGBA buffer
//! - [`RecordingSurface`]: records draw commands for inspection
//! - [`RenderObserver`]: render lifecycle callbacks

mod compositor;
mod observer;
mod surface;

pub use compositor::{Compositor, CompositorConfig, DEFAULT_RENDER_BUFFER, FAST_RENDER_BUFFER};
pub use observer::{RenderObserver, RenderStats};
pub use surface::{Canvas, DrawCommand, RecordedDraw, RecordingSurface, RenderSurface};
