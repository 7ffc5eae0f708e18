//! Row bands of the native level and 2× box reduction.
//!
//! The native level is never required in memory as a whole: the renderer
//! reads it as horizontal bands through [`BandSource`], cuts each band's
//! tiles, and reduces the band into the half-size level. Every level below
//! native is built by [`halve`], a 2×2 mean, so bands reduce independently
//! with no seams between them.

use super::backend::BackendError;
use image::{Rgb, RgbImage};
use rayon::prelude::*;

/// A native-resolution raster that can be read top to bottom in row bands.
pub trait BandSource {
    fn dimensions(&self) -> (u32, u32);

    /// Rows `y..y + rows` as RGB8, `rows` clipped by the caller to the height.
    fn read_band(&mut self, y: u32, rows: u32) -> Result<RgbImage, BackendError>;
}

impl BandSource for RgbImage {
    fn dimensions(&self) -> (u32, u32) {
        RgbImage::dimensions(self)
    }

    fn read_band(&mut self, y: u32, rows: u32) -> Result<RgbImage, BackendError> {
        let width = self.width();
        Ok(image::imageops::crop_imm(self, 0, y, width, rows).to_image())
    }
}

/// Band height for a tile size: whole tile rows, and even so bands halve
/// without sharing a source row.
pub fn band_height(tile_size: u32) -> u32 {
    let tile_size = tile_size.max(1);
    if tile_size % 2 == 0 {
        tile_size
    } else {
        tile_size * 2
    }
}

/// Halve `raster` with a 2×2 box mean.
///
/// Odd sizes round up; the last column or row averages the pixels it has.
pub fn halve(raster: &RgbImage) -> RgbImage {
    let (width, height) = raster.dimensions();
    let (half_w, half_h) = (width.div_ceil(2), height.div_ceil(2));
    let mut output = RgbImage::new(half_w, half_h);

    output
        .par_chunks_mut(half_w as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            let y0 = y as u32 * 2;
            let y1 = (y0 + 2).min(height);
            for x in 0..half_w {
                let x0 = x * 2;
                let x1 = (x0 + 2).min(width);
                let mut sum = [0u32; 3];
                let mut count = 0;
                for sy in y0..y1 {
                    for sx in x0..x1 {
                        let Rgb(p) = raster.get_pixel(sx, sy);
                        for (s, v) in sum.iter_mut().zip(p) {
                            *s += u32::from(*v);
                        }
                        count += 1;
                    }
                }
                let offset = x as usize * 3;
                for (out, s) in row[offset..offset + 3].iter_mut().zip(sum) {
                    *out = ((s + count / 2) / count) as u8;
                }
            }
        });

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_height_is_even_multiple_of_tile() {
        assert_eq!(band_height(256), 256);
        assert_eq!(band_height(7), 14);
        assert_eq!(band_height(1), 2);
    }

    #[test]
    fn halve_rounds_odd_sizes_up() {
        assert_eq!(halve(&RgbImage::new(600, 300)).dimensions(), (300, 150));
        assert_eq!(halve(&RgbImage::new(125, 75)).dimensions(), (63, 38));
        assert_eq!(halve(&RgbImage::new(1, 1)).dimensions(), (1, 1));
    }

    #[test]
    fn halve_averages_blocks() {
        let mut source = RgbImage::new(3, 2);
        for (x, y, p) in source.enumerate_pixels_mut() {
            *p = if (x + y) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            };
        }
        source.put_pixel(2, 0, Rgb([10, 20, 30]));
        source.put_pixel(2, 1, Rgb([30, 40, 50]));

        let half = halve(&source);
        assert_eq!(*half.get_pixel(0, 0), Rgb([128, 128, 128]));
        // Edge column averages its two pixels only.
        assert_eq!(*half.get_pixel(1, 0), Rgb([20, 30, 40]));
    }

    #[test]
    fn halving_bands_matches_halving_whole() {
        let whole = RgbImage::from_fn(37, 29, |x, y| {
            Rgb([(x * 7) as u8, (y * 5) as u8, (x ^ y) as u8])
        });
        let expected = halve(&whole);

        let mut source = whole.clone();
        let mut stitched = RgbImage::new(19, 15);
        let rows = band_height(5);
        let mut y = 0;
        while y < 29 {
            let band = source.read_band(y, rows.min(29 - y)).unwrap();
            image::imageops::replace(&mut stitched, &halve(&band), 0, i64::from(y / 2));
            y += rows;
        }

        assert_eq!(stitched, expected);
    }
}
