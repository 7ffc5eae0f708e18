//! Source format validation.
//!
//! Astronomical sources arrive as TIFF containers (often multi-page, 16-bit or
//! float). Before anything is decoded for tiling, the container is checked:
//! the byte-order header must be a TIFF or BigTIFF signature, the first image
//! file directory must parse, and it must describe a non-empty image plane
//! with a pixel layout the decoder supports.
//!
//! The check reads only the header and directory entries, never strip or tile
//! data, so a corrupt file is rejected cheaply and with a specific message.

use super::backend::{BackendError, Dimensions, SourceInfo};
use image::ImageDecoder;
use image::codecs::tiff::TiffDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Classic and BigTIFF signatures, both byte orders.
const TIFF_SIGNATURES: &[[u8; 4]] = &[
    *b"II*\0", // little-endian
    *b"MM\0*", // big-endian
    *b"II+\0", // BigTIFF little-endian
    *b"MM\0+", // BigTIFF big-endian
];

/// Whether `header` starts with a TIFF signature.
pub fn has_tiff_signature(header: &[u8]) -> bool {
    header.len() >= 4 && TIFF_SIGNATURES.iter().any(|sig| header[..4] == sig[..])
}

/// Check that `path` is a TIFF container.
///
/// Missing or unreadable files surface as [`BackendError::Io`]; everything
/// else wrong with the container is [`BackendError::InvalidFormat`].
pub fn validate_tiff(path: &Path) -> Result<SourceInfo, BackendError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header = [0u8; 4];
    reader.read_exact(&mut header).map_err(|_| {
        BackendError::InvalidFormat(format!("{}: file too short for a TIFF header", path.display()))
    })?;
    if !has_tiff_signature(&header) {
        return Err(BackendError::InvalidFormat(format!(
            "{}: not a TIFF container",
            path.display()
        )));
    }
    reader.seek(SeekFrom::Start(0))?;

    let decoder = TiffDecoder::new(reader).map_err(|e| {
        BackendError::InvalidFormat(format!("{}: unreadable TIFF directory: {e}", path.display()))
    })?;

    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 {
        return Err(BackendError::InvalidFormat(format!(
            "{}: no readable image plane",
            path.display()
        )));
    }

    Ok(SourceInfo {
        format: "tiff",
        dimensions: Dimensions { width, height },
        color: format!("{:?}", decoder.color_type()),
    })
}
