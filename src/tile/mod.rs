//! Tiles and the decode worker pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Compositor                │
//! │   tracked tiles ─── queue(visible) ──┐  │
//! └──────────────────────────────────────┼──┘
//!          ▲ SchedulerEvent              │
//!          │                             ▼
//! ┌────────┴────────────────────────────────┐
//! │            DecodeScheduler              │
//! │  ┌───────────┐   ┌───────────────────┐  │
//! │  │  pending  │ ▶ │ tile-decode-N ... │  │
//! │  │  queue    │   │ (DecodeProvider)  │  │
//! │  └───────────┘   └───────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Tile`]: one cell of one detail level, with geometry, state and cross-fade
//! - [`TileKey`]: hashable `(column, row, level scale)` identity
//! - [`TileState`]: `Unassigned`, `PendingDecode` or `Decoded`
//! - [`TileDescriptor`]: what a decode provider receives
//! - [`DecodeScheduler`]: bounded worker pool with coalescing and cancellation
//! - [`SchedulerEvent`]: per-task reports and batch completion, posted to the owner

mod model;
mod scheduler;

pub use model::{Tile, TileDescriptor, TileKey, TileState, DEFAULT_TRANSITION_DURATION};
pub use scheduler::{
    DecodeOutcome, DecodeScheduler, DecodeTask, PoolConfig, QueueReport, SchedulerEvent, TaskId,
    TaskReport,
};
