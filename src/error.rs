use thiserror::Error;

/// Errors raised while turning a tile descriptor into pixels.
///
/// These are recovered per tile: the affected tile returns to
/// [`TileState::Unassigned`](crate::tile::TileState::Unassigned) and the error
/// is reported to the render observer. Sibling tiles and the worker pool are
/// unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The provider had no image for this tile
    #[error("No image found for tile: {descriptor}")]
    NotFound { descriptor: String },

    /// Reading the source bytes failed
    #[error("I/O error reading {path}: {message}")]
    Io { path: String, message: String },

    /// The source bytes could not be decoded
    #[error("Image decode failed: {message}")]
    Image { message: String },

    /// The provider panicked; caught at the task boundary
    #[error("Decode provider panicked: {message}")]
    Panicked { message: String },

    /// The provider observed the cancellation token and gave up
    #[error("Decode cancelled")]
    Cancelled,
}

/// Errors related to registering detail levels.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LevelError {
    /// Scale must be finite and strictly positive
    #[error("Invalid level scale: {scale} (must be finite and > 0)")]
    InvalidScale { scale: f32 },

    /// Tiles must have a non-zero area
    #[error("Invalid tile size: {width}x{height}")]
    InvalidTileSize { width: u32, height: u32 },
}

/// Errors that can occur when loading a pyramid manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid JSON for the expected schema
    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// A level entry was rejected
    #[error("Invalid level in manifest: {0}")]
    Level(#[from] LevelError),

    /// The manifest declares no levels
    #[error("Manifest declares no detail levels")]
    Empty,
}
