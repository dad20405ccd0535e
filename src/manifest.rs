//! JSON description of an image pyramid on disk.
//!
//! ```json
//! {
//!   "width": 4096,
//!   "height": 3072,
//!   "levels": [
//!     { "scale": 0.25, "pattern": "250/{col}_{row}.png" },
//!     { "scale": 1.0,  "pattern": "1000/{col}_{row}.png", "tile_width": 512, "tile_height": 512 }
//!   ]
//! }
//! ```
//!
//! Patterns are resolved relative to the manifest's directory unless `root`
//! is given.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detail::{DetailLevel, LevelSelector, TileRange};
use crate::error::{LevelError, ManifestError};
use crate::geom::Rect;
use crate::render::Compositor;

/// Tile edge used when a level does not specify one.
pub const DEFAULT_TILE_SIZE: u32 = 256;

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

/// One detail level entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub scale: f32,

    /// Path pattern with `{col}` and `{row}` placeholders
    pub pattern: String,

    #[serde(default = "default_tile_size")]
    pub tile_width: u32,

    #[serde(default = "default_tile_size")]
    pub tile_height: u32,
}

/// A tiled image: full-resolution size plus its detail levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Width at scale 1.0
    pub width: i32,

    /// Height at scale 1.0
    pub height: i32,

    /// Directory tile patterns are relative to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    pub levels: Vec<LevelSpec>,
}

impl Manifest {
    /// Read, parse and validate a manifest file.
    ///
    /// A relative or missing `root` is resolved against the manifest's
    /// directory.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut manifest = Self::from_json(&contents)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.root = Some(match manifest.root.take() {
            Some(root) if root.is_absolute() => root,
            Some(root) => base.join(root),
            None => base.to_path_buf(),
        });
        Ok(manifest)
    }

    /// Parse and validate a manifest from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check every level and the canvas size.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.levels.is_empty() {
            return Err(ManifestError::Empty);
        }
        for level in &self.levels {
            DetailLevel::new(level.scale, level.pattern.as_str(), level.tile_width, level.tile_height)?;
        }
        Ok(())
    }

    /// Directory tile patterns resolve against.
    pub fn root(&self) -> &Path {
        self.root.as_deref().unwrap_or_else(|| Path::new("."))
    }

    /// Register the canvas size and every level with a compositor.
    pub fn apply(&self, compositor: &mut Compositor) -> Result<(), LevelError> {
        compositor.set_size(self.width, self.height);
        for level in &self.levels {
            compositor.add_detail_level(
                level.scale,
                &level.pattern,
                level.tile_width,
                level.tile_height,
            )?;
        }
        Ok(())
    }

    /// A level selector sized to this image with every level registered.
    pub fn selector(&self) -> Result<LevelSelector, LevelError> {
        let mut selector = LevelSelector::new();
        selector.set_size(self.width, self.height);
        for level in &self.levels {
            selector.add_detail_level(
                level.scale,
                &level.pattern,
                level.tile_width,
                level.tile_height,
            )?;
        }
        Ok(selector)
    }

    /// Work out which level and which tiles a viewport needs, without
    /// decoding anything.
    ///
    /// `viewport` is computed from the scaled image size, so callers can
    /// default it to the whole image.
    pub fn plan<F>(&self, scale: f32, padding: i32, viewport: F) -> Result<Option<Plan>, LevelError>
    where
        F: FnOnce(i32, i32) -> Rect,
    {
        let mut selector = self.selector()?;
        selector.set_viewport_padding(padding);
        selector.set_scale(scale);
        let viewport = viewport(selector.scaled_width(), selector.scaled_height());
        selector.update_viewport(viewport);

        let Some(key) = selector.current_level().cloned() else {
            return Ok(None);
        };
        let state = selector.viewport_state();
        let computed_viewport = selector.computed_viewport();
        let Some(level) = selector.level_mut(&key) else {
            return Ok(None);
        };
        level.compute_current_state(&state);
        let Some(range) = level.tile_range() else {
            return Ok(None);
        };

        Ok(Some(Plan {
            scale,
            level_scale: level.scale(),
            source: level.source().to_string(),
            tile_width: level.tile_width(),
            tile_height: level.tile_height(),
            viewport,
            computed_viewport,
            tiles: range.len(),
            range,
        }))
    }
}

/// Result of [`Manifest::plan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    /// Requested display scale
    pub scale: f32,

    /// Scale of the chosen level
    pub level_scale: f32,

    pub source: String,
    pub tile_width: u32,
    pub tile_height: u32,

    /// Viewport as given, in scaled pixels
    pub viewport: Rect,

    /// Viewport after padding and clamping
    pub computed_viewport: Rect,

    pub range: TileRange,

    /// Number of tiles in `range`
    pub tiles: usize,
}
