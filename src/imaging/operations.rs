//! High-level image operations.
//!
//! These functions combine calculations with backend execution.
//! They take configuration, compute parameters, and call the backend.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::bands::{BandSource, band_height, halve};
use super::calculations::{PyramidPlan, calculate_thumbnail_crop, tile_grid, tile_rect};
use super::descriptor::Descriptor;
use super::params::{Quality, ThumbnailParams, TileParams};
use crate::job::JobId;
use crate::naming;
use image::RgbImage;
use image::imageops;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Configuration for thumbnail generation.
#[derive(Debug, Clone)]
pub struct ThumbnailConfig {
    /// Side of the square bounding box.
    pub bound: u32,
    pub quality: Quality,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            bound: 512,
            quality: Quality::new(85),
        }
    }
}

/// Configuration for tile encoding. The tile size lives on the [`PyramidPlan`].
#[derive(Debug, Clone, Default)]
pub struct TileConfig {
    pub quality: Quality,
}

/// Plan a thumbnail operation without executing it.
pub fn plan_thumbnail(
    source: (u32, u32),
    output_path: &Path,
    config: &ThumbnailConfig,
) -> ThumbnailParams {
    let (crop_width, crop_height) = calculate_thumbnail_crop(source, config.bound);
    ThumbnailParams {
        output: output_path.to_path_buf(),
        crop_width,
        crop_height,
        quality: config.quality,
    }
}

/// Write the job's preview into `thumbnails_root`, replacing any previous one.
///
/// Returns the output path and the encoded dimensions.
pub fn generate_thumbnail(
    backend: &impl ImageBackend,
    source: &image::DynamicImage,
    job_id: JobId,
    thumbnails_root: &Path,
    config: &ThumbnailConfig,
) -> Result<(PathBuf, Dimensions)> {
    std::fs::create_dir_all(thumbnails_root)?;
    let output = thumbnails_root.join(naming::thumbnail_filename(job_id));
    let params = plan_thumbnail((source.width(), source.height()), &output, config);
    let dims = backend.save_thumbnail(source, &params)?;
    Ok((output, dims))
}

/// One rendered pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSummary {
    pub level: u32,
    /// Directory name of the level under `image_{id}_files/`.
    pub deep_zoom_level: u32,
    pub width: u32,
    pub height: u32,
    pub columns: u32,
    pub rows: u32,
}

impl LevelSummary {
    pub fn tile_count(&self) -> u64 {
        u64::from(self.columns) * u64::from(self.rows)
    }
}

/// A completed pyramid in its final location.
#[derive(Debug, Clone)]
pub struct TilePyramid {
    /// `tiles/image_{id}/`
    pub root: PathBuf,
    /// `tiles/image_{id}/image_{id}.dzi`
    pub descriptor: PathBuf,
    /// Levels in render order, native first.
    pub levels: Vec<LevelSummary>,
    /// Single-tile Deep Zoom levels written below level 0.
    pub overview_levels: u32,
}

impl TilePyramid {
    pub fn total_tiles(&self) -> u64 {
        self.levels.iter().map(LevelSummary::tile_count).sum::<u64>()
            + u64::from(self.overview_levels)
    }
}

/// Render the full pyramid for `native` and move it into place.
///
/// The native level is read in bands of whole tile rows; each band is cut
/// into tiles and reduced into the half-size level, so at most one band of
/// native pixels is resident. Every lower level is the 2×2 mean of the one
/// above, down to `0` and then on through the single-tile Deep Zoom levels to
/// 1×1. Tiles within a band or level are encoded in parallel.
///
/// Everything is written into a staging directory beside the final one; the
/// descriptor is written last, then staging replaces `tiles/image_{id}/`. On
/// any error the staging directory is removed and an existing pyramid for the
/// id is left untouched.
///
/// `on_level` is called after each zoom level's tiles are all written.
pub fn render_pyramid(
    backend: &impl ImageBackend,
    native: &mut impl BandSource,
    plan: &PyramidPlan,
    job_id: JobId,
    tiles_root: &Path,
    config: &TileConfig,
    mut on_level: impl FnMut(&LevelSummary),
) -> Result<TilePyramid> {
    std::fs::create_dir_all(tiles_root)?;
    let staging = tempfile::Builder::new()
        .prefix(&naming::staging_prefix(job_id))
        .tempdir_in(tiles_root)?;
    let files_dir = staging.path().join(naming::tiles_dirname(job_id));

    let mut levels = Vec::with_capacity(plan.level_count() as usize);
    let top = plan.max_zoom_level;
    let native_dz = plan.deep_zoom_level(top);

    let (summary, mut below) = render_native_level(backend, native, plan, &files_dir, config)?;
    debug!(job_id = %job_id, level = top, columns = summary.columns, rows = summary.rows, "native level rendered");
    on_level(&summary);
    levels.push(summary);

    let mut overview_levels = 0;
    for deep_zoom_level in (0..native_dz).rev() {
        let Some(raster) = below.take() else {
            break;
        };
        let target = LevelTarget::create(&files_dir, deep_zoom_level, raster.dimensions(), plan, config)?;
        render_band(backend, &target, &raster, 0)?;

        match deep_zoom_level.checked_sub(plan.overview_levels()) {
            Some(level) => {
                let (columns, rows) = target.grid();
                let summary = LevelSummary {
                    level,
                    deep_zoom_level,
                    width: target.width,
                    height: target.height,
                    columns,
                    rows,
                };
                debug!(job_id = %job_id, level, columns, rows, "level rendered");
                on_level(&summary);
                levels.push(summary);
            }
            None => overview_levels += 1,
        }
        if deep_zoom_level > 0 {
            below = Some(halve(&raster));
        }
    }

    let descriptor_name = naming::descriptor_filename(job_id);
    Descriptor::new(plan.tile_size, plan.source_width, plan.source_height)
        .write(&staging.path().join(&descriptor_name))?;

    let root = tiles_root.join(naming::pyramid_basename(job_id));
    if root.exists() {
        std::fs::remove_dir_all(&root)?;
    }
    std::fs::rename(staging.path(), &root)?;
    // The guard's own removal now finds nothing to delete.
    drop(staging);
    info!(job_id = %job_id, path = %root.display(), levels = levels.len(), overview_levels, "pyramid in place");

    Ok(TilePyramid {
        descriptor: root.join(descriptor_name),
        root,
        levels,
        overview_levels,
    })
}

/// Stream the native level band by band.
///
/// Returns its summary and the half-size level, or `None` when the native
/// level is already the 1×1 Deep Zoom level.
fn render_native_level(
    backend: &impl ImageBackend,
    native: &mut impl BandSource,
    plan: &PyramidPlan,
    files_dir: &Path,
    config: &TileConfig,
) -> Result<(LevelSummary, Option<RgbImage>)> {
    let (width, height) = native.dimensions();
    let level = plan.max_zoom_level;
    let deep_zoom_level = plan.deep_zoom_level(level);
    let target = LevelTarget::create(files_dir, deep_zoom_level, (width, height), plan, config)?;

    let mut below =
        (deep_zoom_level > 0).then(|| RgbImage::new(width.div_ceil(2), height.div_ceil(2)));
    let band_rows = band_height(plan.tile_size);
    let mut y = 0;
    while y < height {
        let rows = band_rows.min(height - y);
        let band = native.read_band(y, rows)?;
        render_band(backend, &target, &band, y)?;
        if let Some(below) = below.as_mut() {
            imageops::replace(below, &halve(&band), 0, i64::from(y / 2));
        }
        y += rows;
    }

    let (columns, rows) = target.grid();
    let summary = LevelSummary {
        level,
        deep_zoom_level,
        width,
        height,
        columns,
        rows,
    };
    Ok((summary, below))
}

/// One level's output directory and geometry.
struct LevelTarget {
    dir: PathBuf,
    deep_zoom_level: u32,
    width: u32,
    height: u32,
    tile_size: u32,
    quality: Quality,
}

impl LevelTarget {
    fn create(
        files_dir: &Path,
        deep_zoom_level: u32,
        (width, height): (u32, u32),
        plan: &PyramidPlan,
        config: &TileConfig,
    ) -> Result<Self> {
        let dir = files_dir.join(deep_zoom_level.to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            deep_zoom_level,
            width,
            height,
            tile_size: plan.tile_size,
            quality: config.quality,
        })
    }

    fn grid(&self) -> (u32, u32) {
        tile_grid((self.width, self.height), self.tile_size)
    }
}

/// Cut the tiles whose rows lie in `band` into the target directory.
///
/// `band` holds the level's rows from `band_y` on, a whole number of tile
/// rows except at the bottom edge.
fn render_band(
    backend: &impl ImageBackend,
    target: &LevelTarget,
    band: &RgbImage,
    band_y: u32,
) -> Result<()> {
    let (columns, rows) = target.grid();
    let first_row = band_y / target.tile_size;
    let last_row = (band_y + band.height()).div_ceil(target.tile_size).min(rows);

    let tiles: Vec<TileParams> = (first_row..last_row)
        .flat_map(|row| (0..columns).map(move |col| (col, row)))
        .map(|(col, row)| {
            let (x, y, w, h) =
                tile_rect((target.width, target.height), target.tile_size, col, row);
            TileParams {
                output: target.dir.join(naming::tile_filename(col, row)),
                level: target.deep_zoom_level,
                col,
                row,
                x,
                y: y - band_y,
                width: w,
                height: h,
                quality: target.quality,
            }
        })
        .collect();

    tiles
        .par_iter()
        .try_for_each(|params| backend.save_tile(band, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{FailAt, MockBackend, RecordedOp};
    use crate::imaging::calculations::plan_pyramid;
    use image::DynamicImage;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn render(
        backend: &MockBackend,
        width: u32,
        height: u32,
        tiles_root: &Path,
    ) -> Result<TilePyramid> {
        let mut native = RgbImage::new(width, height);
        let plan = plan_pyramid(width, height, 256);
        render_pyramid(
            backend,
            &mut native,
            &plan,
            JobId(5),
            tiles_root,
            &TileConfig::default(),
            |_| {},
        )
    }

    // =========================================================================
    // Thumbnail
    // =========================================================================

    #[test]
    fn plan_thumbnail_caps_to_bound() {
        let params = plan_thumbnail((4000, 1000), Path::new("/t.jpg"), &ThumbnailConfig::default());
        assert_eq!((params.crop_width, params.crop_height), (512, 512));
        assert_eq!(params.quality.value(), 85);
    }

    #[test]
    fn generate_thumbnail_writes_keyed_path() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(600, 300);
        let source = DynamicImage::new_rgb8(600, 300);
        let thumbs = tmp.path().join("thumbnails");

        let (path, dims) =
            generate_thumbnail(&backend, &source, JobId(7), &thumbs, &ThumbnailConfig::default())
                .unwrap();

        assert_eq!(path, thumbs.join("job_7_thumb.jpg"));
        assert!(path.exists());
        assert_eq!(dims, Dimensions { width: 512, height: 300 });
        assert!(matches!(
            &backend.get_operations()[0],
            RecordedOp::Thumbnail { crop_width: 512, crop_height: 300, quality: 85, .. }
        ));
    }

    #[test]
    fn generate_thumbnail_overwrites_previous() {
        let tmp = TempDir::new().unwrap();
        let thumbs = tmp.path().to_path_buf();
        std::fs::write(thumbs.join("job_7_thumb.jpg"), b"stale").unwrap();

        let backend = MockBackend::new(100, 100);
        let (path, _) = generate_thumbnail(
            &backend,
            &DynamicImage::new_rgb8(100, 100),
            JobId(7),
            &thumbs,
            &ThumbnailConfig::default(),
        )
        .unwrap();

        assert_eq!(std::fs::read(path).unwrap(), b"");
    }

    // =========================================================================
    // Pyramid
    // =========================================================================

    #[test]
    fn render_layout_and_descriptor() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(600, 300);
        let pyramid = render(&backend, 600, 300, tmp.path()).unwrap();

        // max_zoom_level 2; deep zoom top level ceil(log2(600)) = 10, and
        // every Deep Zoom level down to 0 exists.
        assert_eq!(pyramid.root, tmp.path().join("image_5"));
        assert_eq!(entries(&pyramid.root), vec!["image_5.dzi", "image_5_files"]);
        let mut expected: Vec<String> = (0..=10).map(|l| l.to_string()).collect();
        expected.sort();
        assert_eq!(entries(&pyramid.root.join("image_5_files")), expected);
        assert_eq!(
            entries(&pyramid.root.join("image_5_files/10")),
            vec!["0_0.jpeg", "0_1.jpeg", "1_0.jpeg", "1_1.jpeg", "2_0.jpeg", "2_1.jpeg"]
        );

        let descriptor = Descriptor::read(&pyramid.descriptor).unwrap();
        assert_eq!(descriptor, Descriptor::new(256, 600, 300));
    }

    #[test]
    fn render_levels_native_first_with_clipped_edges() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(600, 300);
        let pyramid = render(&backend, 600, 300, tmp.path()).unwrap();

        let dims: Vec<_> = pyramid.levels.iter().map(|l| (l.level, l.width, l.height)).collect();
        assert_eq!(dims, vec![(2, 600, 300), (1, 300, 150), (0, 150, 75)]);
        assert_eq!(pyramid.overview_levels, 8);
        assert_eq!(pyramid.total_tiles(), 6 + 2 + 1 + 8);

        let edge = backend
            .tile_ops()
            .into_iter()
            .find(|op| matches!(op, RecordedOp::Tile { level: 10, col: 2, row: 1, .. }))
            .unwrap();
        assert!(matches!(edge, RecordedOp::Tile { width: 88, height: 44, .. }));
    }

    #[test]
    fn native_grid_4096x2048_is_16x8() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(4096, 2048);
        let pyramid = render(&backend, 4096, 2048, tmp.path()).unwrap();

        let native = pyramid.levels[0];
        assert_eq!((native.level, native.columns, native.rows), (4, 16, 8));
        let native_tiles = backend
            .tile_ops()
            .into_iter()
            .filter(|op| matches!(op, RecordedOp::Tile { level: 12, .. }))
            .count();
        assert_eq!(native_tiles, 128);
    }

    #[test]
    fn single_tile_source_has_one_level() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(100, 40);
        let pyramid = render(&backend, 100, 40, tmp.path()).unwrap();

        assert_eq!(pyramid.levels.len(), 1);
        // Deep Zoom 7 (native) plus 6..=0
        assert_eq!(pyramid.overview_levels, 7);
        assert_eq!(backend.tile_ops().len(), 8);
    }

    #[test]
    fn on_level_sees_every_level() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(1024, 1024);
        let mut native = RgbImage::new(1024, 1024);
        let plan = plan_pyramid(1024, 1024, 256);
        let mut seen = Vec::new();

        render_pyramid(
            &backend,
            &mut native,
            &plan,
            JobId(1),
            tmp.path(),
            &TileConfig::default(),
            |summary| seen.push(summary.level),
        )
        .unwrap();

        assert_eq!(seen, vec![2, 1, 0]);
    }

    #[test]
    fn tile_failure_leaves_no_pyramid_and_no_staging() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(600, 300).failing_at(FailAt::Tile(9, 0, 0));

        let result = render(&backend, 600, 300, tmp.path());

        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
        assert!(entries(tmp.path()).is_empty());
    }

    #[test]
    fn failed_rerun_keeps_previous_pyramid() {
        let tmp = TempDir::new().unwrap();
        render(&MockBackend::new(600, 300), 600, 300, tmp.path()).unwrap();

        let failing = MockBackend::new(600, 300).failing_at(FailAt::Tile(0, 0, 0));
        assert!(render(&failing, 600, 300, tmp.path()).is_err());
        let failing = MockBackend::new(600, 300).failing_at(FailAt::Tile(10, 2, 1));
        assert!(render(&failing, 600, 300, tmp.path()).is_err());

        assert_eq!(entries(tmp.path()), vec!["image_5"]);
        assert!(tmp.path().join("image_5/image_5.dzi").exists());
    }

    #[test]
    fn rerun_replaces_pyramid_with_same_grid() {
        let tmp = TempDir::new().unwrap();
        let first = render(&MockBackend::new(600, 300), 600, 300, tmp.path()).unwrap();
        std::fs::write(first.root.join("stray.txt"), b"x").unwrap();

        let second = render(&MockBackend::new(600, 300), 600, 300, tmp.path()).unwrap();

        assert_eq!(first.levels, second.levels);
        assert!(!second.root.join("stray.txt").exists());
        assert_eq!(entries(tmp.path()), vec!["image_5"]);
    }

    /// Records every band read from an in-memory native level.
    struct RecordingSource {
        raster: RgbImage,
        reads: Vec<(u32, u32)>,
    }

    impl BandSource for RecordingSource {
        fn dimensions(&self) -> (u32, u32) {
            self.raster.dimensions()
        }

        fn read_band(&mut self, y: u32, rows: u32) -> Result<RgbImage> {
            self.reads.push((y, rows));
            self.raster.read_band(y, rows)
        }
    }

    #[test]
    fn native_level_is_read_in_tile_row_bands() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(600, 700);
        let plan = plan_pyramid(600, 700, 256);
        let mut source = RecordingSource {
            raster: RgbImage::new(600, 700),
            reads: Vec::new(),
        };

        let pyramid = render_pyramid(
            &backend,
            &mut source,
            &plan,
            JobId(2),
            tmp.path(),
            &TileConfig::default(),
            |_| {},
        )
        .unwrap();

        assert_eq!(source.reads, vec![(0, 256), (256, 256), (512, 188)]);
        // The mock rejects rectangles outside the raster it is handed, so
        // every native tile was cut relative to its band.
        let native = pyramid.levels[0];
        assert_eq!((native.columns, native.rows), (3, 3));
        let bottom = backend
            .tile_ops()
            .into_iter()
            .find(|op| matches!(op, RecordedOp::Tile { level: 10, col: 2, row: 2, .. }))
            .unwrap();
        assert!(matches!(bottom, RecordedOp::Tile { width: 88, height: 188, .. }));
    }

    #[test]
    fn odd_tile_size_bands_cover_two_tile_rows() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new(7, 7);
        let plan = plan_pyramid(7, 7, 3);
        let mut source = RecordingSource {
            raster: RgbImage::new(7, 7),
            reads: Vec::new(),
        };

        let pyramid = render_pyramid(
            &backend,
            &mut source,
            &plan,
            JobId(1),
            tmp.path(),
            &TileConfig::default(),
            |_| {},
        )
        .unwrap();

        assert_eq!(source.reads, vec![(0, 6), (6, 1)]);
        let levels: Vec<_> = pyramid
            .levels
            .iter()
            .map(|l| (l.deep_zoom_level, l.width, l.columns, l.rows))
            .collect();
        // ceil(log2(7)) = 3; levels 7x7, 4x4, 2x2, then the 1x1 overview
        assert_eq!(levels, vec![(3, 7, 3, 3), (2, 4, 2, 2), (1, 2, 1, 1)]);
        assert_eq!(pyramid.overview_levels, 1);
        assert_eq!(backend.tile_ops().len(), 9 + 4 + 1 + 1);
    }
}
