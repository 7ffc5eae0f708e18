//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the four operations a tiling job needs:
//! validate, open, save_thumbnail and save_tile.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests swap in a recording mock to drive failure paths without real
//! codecs.

use super::params::{ThumbnailParams, TileParams};
use image::{DynamicImage, RgbImage};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid source format: {0}")]
    InvalidFormat(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// What the container header says about a source, before any pixel decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Short container name, e.g. `"tiff"`.
    pub format: &'static str,
    /// Dimensions of the first image plane.
    pub dimensions: Dimensions,
    /// Pixel layout of the first image plane, e.g. `"L16"`.
    pub color: String,
}

/// Trait for image processing backends.
///
/// `Sync` so one backend can be shared by the rayon workers that encode tiles.
pub trait ImageBackend: Sync {
    /// Check the container header. Read-only, no pixel decode.
    fn validate(&self, path: &Path) -> Result<SourceInfo, BackendError>;

    /// Decode the full source raster.
    fn open(&self, path: &Path) -> Result<DynamicImage, BackendError>;

    /// Fill-resize `source` to the crop size, center-crop and encode.
    fn save_thumbnail(
        &self,
        source: &DynamicImage,
        params: &ThumbnailParams,
    ) -> Result<Dimensions, BackendError>;

    /// Cut the `params` rectangle out of `raster`, a whole level or one row
    /// band of it, and encode it.
    fn save_tile(&self, raster: &RgbImage, params: &TileParams) -> Result<(), BackendError>;
}
