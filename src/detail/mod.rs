//! Detail levels and level selection.
//!
//! The image pyramid is registered as a set of [`DetailLevel`]s, one per
//! resolution tier. The [`LevelSelector`] keeps them sorted, tracks the
//! display scale and viewport, and decides which tier is rendered.
//!
//! ```text
//!   scale, viewport ──▶ LevelSelector ──▶ active DetailLevel
//!                                              │ compute_current_state
//!                                              ▼
//!                                        TileRange ──▶ Tiles
//! ```

mod level;
mod selector;

pub use level::{DetailLevel, LevelKey, TileRange, ViewportState};
pub use selector::{LevelChangeObserver, LevelSelector};
