//! Scoped normalized intermediate.
//!
//! Astronomical sources decode into wide pixel layouts (16-bit, float,
//! multi-channel) that are expensive to hold while a pyramid renders. The
//! decoded raster is normalized to 8-bit RGB one strip at a time and spilled
//! to a BigTIFF in the temp root, then dropped. The renderer reads the native
//! level back as row bands, one strip per band, so only a band of
//! full-resolution pixels is resident while tiling.
//!
//! The file is owned by an [`Intermediate`] guard and removed when the guard
//! drops, so every exit path (success, early return, `?`, unwinding panic)
//! cleans it up.

use super::backend::BackendError;
use super::bands::BandSource;
use crate::job::JobId;
use image::{DynamicImage, RgbImage};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, colortype};
use tracing::debug;

pub struct Intermediate {
    file: NamedTempFile,
    width: u32,
    height: u32,
    reader: Option<Decoder<BufReader<File>>>,
}

fn tiff_error(path: &Path, e: tiff::TiffError) -> BackendError {
    BackendError::ProcessingFailed(format!("intermediate {}: {e}", path.display()))
}

impl Intermediate {
    /// Normalize `raster` to RGB8 and write it into `dir`, `strip_rows` rows
    /// per strip.
    ///
    /// Consumes the raster so the wide decode is freed before tiling starts.
    pub fn write(
        raster: DynamicImage,
        dir: &Path,
        job_id: JobId,
        strip_rows: u32,
    ) -> Result<Self, BackendError> {
        let (width, height) = (raster.width(), raster.height());
        let strip_rows = strip_rows.max(1);

        let file = tempfile::Builder::new()
            .prefix(&format!(".job_{job_id}-intermediate-"))
            .suffix(".tif")
            .tempfile_in(dir)?;
        let path = file.path().to_path_buf();

        {
            let mut writer = BufWriter::new(file.as_file());
            let mut encoder = TiffEncoder::new_big(&mut writer).map_err(|e| tiff_error(&path, e))?;
            let mut plane = encoder
                .new_image::<colortype::RGB8>(width, height)
                .map_err(|e| tiff_error(&path, e))?;
            plane
                .rows_per_strip(strip_rows)
                .map_err(|e| tiff_error(&path, e))?;

            let mut y = 0;
            while y < height {
                let rows = strip_rows.min(height - y);
                let strip = raster.crop_imm(0, y, width, rows).into_rgb8();
                plane
                    .write_strip(strip.as_raw())
                    .map_err(|e| tiff_error(&path, e))?;
                y += rows;
            }
            plane.finish().map_err(|e| tiff_error(&path, e))?;
            drop(encoder);
            writer.flush()?;
        }
        drop(raster);

        debug!(path = %path.display(), width, height, strip_rows, "wrote intermediate");
        Ok(Self {
            file,
            width,
            height,
            reader: None,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn decoder(&mut self) -> Result<&mut Decoder<BufReader<File>>, BackendError> {
        if self.reader.is_none() {
            let file = self.file.reopen()?;
            let decoder = Decoder::new(BufReader::new(file))
                .map_err(|e| tiff_error(self.file.path(), e))?
                .with_limits(Limits::unlimited());
            self.reader = Some(decoder);
        }
        self.reader
            .as_mut()
            .ok_or_else(|| BackendError::ProcessingFailed("intermediate reader missing".into()))
    }
}

impl fmt::Debug for Intermediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intermediate")
            .field("path", &self.path())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl BandSource for Intermediate {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decodes only the strips that cover `y..y + rows`.
    fn read_band(&mut self, y: u32, rows: u32) -> Result<RgbImage, BackendError> {
        let (width, height) = (self.width, self.height);
        let path = self.path().to_path_buf();
        let row_bytes = width as usize * 3;
        let end = (y + rows).min(height);

        let decoder = self.decoder()?;
        let (_, strip_rows) = decoder.chunk_dimensions();
        let strip_rows = strip_rows.max(1);

        let mut pixels = Vec::with_capacity(row_bytes * (end - y) as usize);
        let mut strip = y / strip_rows;
        while strip * strip_rows < end {
            let strip_y = strip * strip_rows;
            let data = match decoder.read_chunk(strip).map_err(|e| tiff_error(&path, e))? {
                DecodingResult::U8(data) => data,
                _ => {
                    return Err(BackendError::ProcessingFailed(format!(
                        "intermediate {} is not 8-bit",
                        path.display()
                    )));
                }
            };
            let from = (y.max(strip_y) - strip_y) as usize * row_bytes;
            let to = (end.min(strip_y + strip_rows) - strip_y) as usize * row_bytes;
            let chunk = data.get(from..to).ok_or_else(|| {
                BackendError::ProcessingFailed(format!(
                    "intermediate {} strip {strip} is short",
                    path.display()
                ))
            })?;
            pixels.extend_from_slice(chunk);
            strip += 1;
        }

        RgbImage::from_raw(width, end - y, pixels).ok_or_else(|| {
            BackendError::ProcessingFailed(format!("intermediate {} band size mismatch", path.display()))
        })
    }
}

/// The RGB8 native level tiling reads from.
#[derive(Debug)]
pub enum NativeLevel {
    InMemory(RgbImage),
    /// Spilled to disk; the file lives as long as this value.
    Spilled(Intermediate),
}

impl NativeLevel {
    pub fn intermediate(&self) -> Option<&Intermediate> {
        match self {
            NativeLevel::Spilled(intermediate) => Some(intermediate),
            NativeLevel::InMemory(_) => None,
        }
    }
}

impl BandSource for NativeLevel {
    fn dimensions(&self) -> (u32, u32) {
        match self {
            NativeLevel::InMemory(raster) => raster.dimensions(),
            NativeLevel::Spilled(intermediate) => BandSource::dimensions(intermediate),
        }
    }

    fn read_band(&mut self, y: u32, rows: u32) -> Result<RgbImage, BackendError> {
        match self {
            NativeLevel::InMemory(raster) => raster.read_band(y, rows),
            NativeLevel::Spilled(intermediate) => intermediate.read_band(y, rows),
        }
    }
}

/// Produce the native level tiling works from.
///
/// With a `spill_dir`, the raster goes through an [`Intermediate`] written in
/// strips of `band_rows`; without one it is converted in memory.
pub fn normalize(
    raster: DynamicImage,
    spill_dir: Option<&Path>,
    job_id: JobId,
    band_rows: u32,
) -> Result<NativeLevel, BackendError> {
    match spill_dir {
        Some(dir) => Ok(NativeLevel::Spilled(Intermediate::write(
            raster, dir, job_id, band_rows,
        )?)),
        None => Ok(NativeLevel::InMemory(raster.into_rgb8())),
    }
}
