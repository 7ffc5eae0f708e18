//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Validate (TIFF) | [`validate_tiff`](super::validate::validate_tiff) header check |
//! | Decode (TIFF, PNG, JPEG) | `image::ImageReader`, allocation limits lifted |
//! | Thumbnail | `resize_exact` with `Lanczos3` + centered `crop_imm` |
//! | Tile cut | `image::imageops::crop_imm` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |

use super::backend::{BackendError, Dimensions, ImageBackend, SourceInfo};
use super::calculations::calculate_fill_dimensions;
use super::params::{Quality, ThumbnailParams, TileParams};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, RgbImage};
use std::io::BufWriter;
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk.
///
/// Survey mosaics routinely exceed the decoder's default allocation cap, so
/// limits are lifted; the validator has already vetted the container.
pub fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    let mut reader = ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?;
    reader.no_limits();
    reader.decode().map_err(|e| {
        BackendError::Decode(format!("Failed to decode {}: {}", path.display(), e))
    })
}

/// Encode an RGB buffer as baseline JPEG.
fn save_jpeg(img: &RgbImage, path: &Path, quality: Quality) -> Result<(), BackendError> {
    let file = std::fs::File::create(path).map_err(BackendError::Io)?;
    let writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(writer, quality.value() as u8)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| {
            BackendError::ProcessingFailed(format!(
                "JPEG encode failed for {}: {}",
                path.display(),
                e
            ))
        })
}

impl ImageBackend for RustBackend {
    fn validate(&self, path: &Path) -> Result<SourceInfo, BackendError> {
        super::validate::validate_tiff(path)
    }

    fn open(&self, path: &Path) -> Result<DynamicImage, BackendError> {
        load_image(path)
    }

    fn save_thumbnail(
        &self,
        source: &DynamicImage,
        params: &ThumbnailParams,
    ) -> Result<Dimensions, BackendError> {
        let (crop_w, crop_h) = (params.crop_width, params.crop_height);
        let (fill_w, fill_h) =
            calculate_fill_dimensions((source.width(), source.height()), (crop_w, crop_h));

        let filled = if (fill_w, fill_h) == (source.width(), source.height()) {
            source.clone()
        } else {
            source.resize_exact(fill_w, fill_h, FilterType::Lanczos3)
        };

        // Center crop the overflow on the longer side
        let x = (fill_w - crop_w) / 2;
        let y = (fill_h - crop_h) / 2;
        let cropped = filled.crop_imm(x, y, crop_w, crop_h).into_rgb8();

        save_jpeg(&cropped, &params.output, params.quality)?;
        Ok(Dimensions {
            width: cropped.width(),
            height: cropped.height(),
        })
    }

    fn save_tile(&self, raster: &RgbImage, params: &TileParams) -> Result<(), BackendError> {
        let tile =
            image::imageops::crop_imm(raster, params.x, params.y, params.width, params.height)
                .to_image();
        save_jpeg(&tile, &params.output, params.quality)
    }
}
