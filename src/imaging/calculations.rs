//! Pure calculation functions for pyramid planning and image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Derived pyramid parameters for one source image.
///
/// Level `0` is the most zoomed-out (the whole image fits in about one tile),
/// level `max_zoom_level` is native resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidPlan {
    pub source_width: u32,
    pub source_height: u32,
    pub tile_size: u32,
    pub max_zoom_level: u32,
}

/// Compute the pyramid for a source of `width × height` pixels.
///
/// `max_zoom_level = ceil(log2(max(width, height) / tile_size))`, clamped to 0
/// when the longest side already fits in a single tile. Evaluated with integer
/// shifts so exact powers of two never round up by a float error.
///
/// # Examples
/// ```
/// # use astro_tiler::imaging::plan_pyramid;
/// assert_eq!(plan_pyramid(256, 256, 256).max_zoom_level, 0);
/// assert_eq!(plan_pyramid(512, 256, 256).max_zoom_level, 1);
/// assert_eq!(plan_pyramid(10000, 8000, 256).max_zoom_level, 6);
/// ```
pub fn plan_pyramid(width: u32, height: u32, tile_size: u32) -> PyramidPlan {
    let max_dimension = u64::from(width.max(height));
    let tile = u64::from(tile_size.max(1));

    let mut max_zoom_level = 0;
    while tile << max_zoom_level < max_dimension {
        max_zoom_level += 1;
    }

    PyramidPlan {
        source_width: width,
        source_height: height,
        tile_size,
        max_zoom_level,
    }
}

impl PyramidPlan {
    /// Number of levels, `max_zoom_level + 1`.
    pub fn level_count(&self) -> u32 {
        self.max_zoom_level + 1
    }

    /// Pixel size of `level`: native size halved `max_zoom_level - level` times,
    /// rounded up.
    pub fn level_dimensions(&self, level: u32) -> (u32, u32) {
        let shift = self.max_zoom_level.saturating_sub(level);
        (
            halve_n_times(self.source_width, shift),
            halve_n_times(self.source_height, shift),
        )
    }

    /// Tile columns and rows at `level`.
    pub fn grid(&self, level: u32) -> (u32, u32) {
        let (w, h) = self.level_dimensions(level);
        tile_grid((w, h), self.tile_size)
    }

    /// Total number of tiles written: every level's grid plus one tile per
    /// overview level.
    pub fn total_tiles(&self) -> u64 {
        let levels: u64 = (0..=self.max_zoom_level)
            .map(|level| {
                let (cols, rows) = self.grid(level);
                u64::from(cols) * u64::from(rows)
            })
            .sum();
        levels + u64::from(self.overview_levels())
    }

    /// Deep Zoom levels below level 0, each a single tile, down to the 1×1
    /// level. Viewers request these when zoomed fully out.
    pub fn overview_levels(&self) -> u32 {
        self.deep_zoom_level(0)
    }

    /// Index of `level` in Deep Zoom numbering, where level 0 is 1×1 pixel.
    ///
    /// The Deep Zoom level with the same scale as zoom level `z` is
    /// `z + (deep_zoom_max_level - max_zoom_level)`.
    pub fn deep_zoom_level(&self, level: u32) -> u32 {
        let top = deep_zoom_max_level(self.source_width.max(self.source_height));
        level + top.saturating_sub(self.max_zoom_level)
    }
}

/// `ceil(value / 2^n)`, never below 1.
pub fn halve_n_times(value: u32, n: u32) -> u32 {
    if n >= 32 {
        return 1;
    }
    let divisor = 1u64 << n;
    (u64::from(value).div_ceil(divisor)).max(1) as u32
}

/// `ceil(log2(max_dimension))`: the native level of a standard Deep Zoom pyramid.
pub fn deep_zoom_max_level(max_dimension: u32) -> u32 {
    let mut level = 0;
    while (1u64 << level) < u64::from(max_dimension) {
        level += 1;
    }
    level
}

/// Columns and rows needed to cover `dimensions` with `tile_size` tiles.
pub fn tile_grid(dimensions: (u32, u32), tile_size: u32) -> (u32, u32) {
    let (w, h) = dimensions;
    (w.div_ceil(tile_size), h.div_ceil(tile_size))
}

/// Pixel rectangle `(x, y, width, height)` of tile `(col, row)`.
///
/// Edge tiles are clipped to the level bounds rather than padded.
pub fn tile_rect(dimensions: (u32, u32), tile_size: u32, col: u32, row: u32) -> (u32, u32, u32, u32) {
    let (w, h) = dimensions;
    let x = col * tile_size;
    let y = row * tile_size;
    (x, y, tile_size.min(w - x), tile_size.min(h - y))
}

/// Final thumbnail size for a source inside a square bounding box.
///
/// Each side is capped at the bound; sources already inside the box keep their
/// size (no upscaling).
pub fn calculate_thumbnail_crop(source: (u32, u32), bound: u32) -> (u32, u32) {
    (source.0.min(bound), source.1.min(bound))
}

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `target` - Target area dimensions (width, height)
///
/// # Returns
/// * `(width, height)` - Fill dimensions (at least one matches target)
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = (h as f64 * src_aspect).round() as u32;
        (w.max(tgt_w), h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = (w as f64 / src_aspect).round() as u32;
        (w, h.max(tgt_h))
    }
}
