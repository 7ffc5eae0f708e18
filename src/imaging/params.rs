//! Parameter types for image operations.
//!
//! These structs describe *what* to write, not *how*. They are the interface
//! between [`operations`](super::operations) (which decides which files a job
//! produces) and the [`backend`](super::backend) (which encodes pixels).
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`ThumbnailParams`]: Output path, crop dimensions and quality for a preview.
//! - [`TileParams`]: Output path, source rectangle and quality for one tile.

use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Parameters for a thumbnail operation (fill-resize + center crop).
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailParams {
    pub output: PathBuf,
    /// Final crop dimensions.
    pub crop_width: u32,
    pub crop_height: u32,
    pub quality: Quality,
}

/// Parameters for encoding one tile out of a level raster or band.
#[derive(Debug, Clone, PartialEq)]
pub struct TileParams {
    pub output: PathBuf,
    /// Deep Zoom level, the directory the tile is written under.
    pub level: u32,
    pub col: u32,
    pub row: u32,
    /// Source rectangle inside the raster passed to the backend. For a
    /// streamed band, `y` is relative to the band's first row.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }
}
