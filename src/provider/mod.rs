//! Image-decode providers.
//!
//! The compositor never decodes pixels itself. It hands a [`TileDescriptor`]
//! to a [`DecodeProvider`] on a worker thread and receives a [`DecodedImage`]
//! back. Network fetch, disk caching and codecs all live behind this trait.
//!
//! # Components
//!
//! - [`DecodeProvider`]: the collaborator contract
//! - [`DecodedImage`]: cheap-to-clone handle to decoded RGBA pixels
//! - [`FileTileProvider`]: reads `{col}`/`{row}` path patterns from a directory
//! - [`CachedProvider`]: in-memory LRU of decoded images in front of any provider

mod cache;
mod file;

pub use cache::{CachedProvider, DEFAULT_DECODED_CACHE_CAPACITY};
pub use file::FileTileProvider;

use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use tokio_util::sync::CancellationToken;

use crate::error::DecodeError;
use crate::tile::TileDescriptor;

// =============================================================================
// Decoded Image
// =============================================================================

/// Decoded RGBA pixels for one tile.
///
/// Cloning shares the pixel buffer.
#[derive(Clone)]
pub struct DecodedImage {
    pixels: Arc<RgbaImage>,
}

impl DecodedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Approximate heap size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl From<RgbaImage> for DecodedImage {
    fn from(pixels: RgbaImage) -> Self {
        Self::new(pixels)
    }
}

// =============================================================================
// DecodeProvider Trait
// =============================================================================

/// Turns a tile descriptor into pixels.
///
/// Called from decode worker threads, so implementations must be thread-safe.
/// Long-running implementations should poll `cancel` and return
/// [`DecodeError::Cancelled`] once it fires; the scheduler also checks the
/// token before and after every call.
///
/// Returning `Ok(None)` means "no image for this tile" and is reported as
/// [`DecodeError::NotFound`].
pub trait DecodeProvider: Send + Sync + 'static {
    fn decode(
        &self,
        tile: &TileDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Option<DecodedImage>, DecodeError>;
}

impl<P: DecodeProvider + ?Sized> DecodeProvider for Arc<P> {
    fn decode(
        &self,
        tile: &TileDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Option<DecodedImage>, DecodeError> {
        (**self).decode(tile, cancel)
    }
}

/// Expand `{col}` and `{row}` placeholders in a level source pattern.
pub fn format_source(pattern: &str, column: i32, row: i32) -> String {
    pattern
        .replace("{col}", &column.to_string())
        .replace("{row}", &row.to_string())
}
