//! Tile provider backed by image files on disk.
//!
//! Each detail level's source is a path pattern such as
//! `"levels/1000/{col}_{row}.png"`, resolved against a root directory. Files
//! are decoded with the `image` crate, so any format it was built with works.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::ImageReader;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::DecodeError;
use crate::tile::TileDescriptor;

use super::{format_source, DecodeProvider, DecodedImage};

/// Reads and decodes tile images from a directory tree.
///
/// A missing file is not an error: it yields `Ok(None)`, which the scheduler
/// reports as "not found" for that tile only.
#[derive(Debug, Clone)]
pub struct FileTileProvider {
    root: PathBuf,
}

impl FileTileProvider {
    /// Create a provider resolving patterns relative to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding the given tile.
    pub fn path_for(&self, tile: &TileDescriptor) -> PathBuf {
        self.root
            .join(format_source(&tile.source, tile.column(), tile.row()))
    }
}

impl DecodeProvider for FileTileProvider {
    fn decode(
        &self,
        tile: &TileDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Option<DecodedImage>, DecodeError> {
        let path = self.path_for(tile);
        trace!(path = %path.display(), "decoding tile");

        let reader = match ImageReader::open(&path) {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DecodeError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }

        let reader = reader.with_guessed_format().map_err(|e| DecodeError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let image = reader.decode().map_err(|e| DecodeError::Image {
            message: format!("{}: {}", path.display(), e),
        })?;

        Ok(Some(DecodedImage::new(image.to_rgba8())))
    }
}
