//! Centralized output naming for job artifacts.
//!
//! Every file a job writes is keyed by its [`JobId`], so concurrent jobs own
//! disjoint paths and a rerun of the same job lands on the same names:
//!
//! ```text
//! thumbnails/job_7_thumb.jpg
//! tiles/image_7/image_7.dzi
//! tiles/image_7/image_7_files/<level>/<col>_<row>.jpeg
//! ```

use crate::job::JobId;

/// Tile image extension; also the `Format` attribute of the descriptor.
pub const TILE_FORMAT: &str = "jpeg";

/// Descriptor file extension.
pub const DESCRIPTOR_EXTENSION: &str = "dzi";

/// `job_7_thumb.jpg`
pub fn thumbnail_filename(id: JobId) -> String {
    format!("job_{id}_thumb.jpg")
}

/// `image_7`: name of the pyramid directory and stem of the descriptor.
pub fn pyramid_basename(id: JobId) -> String {
    format!("image_{id}")
}

/// `image_7.dzi`
pub fn descriptor_filename(id: JobId) -> String {
    format!("{}.{DESCRIPTOR_EXTENSION}", pyramid_basename(id))
}

/// `image_7_files`: parent of the per-level tile folders.
pub fn tiles_dirname(id: JobId) -> String {
    format!("{}_files", pyramid_basename(id))
}

/// `3_1.jpeg`
pub fn tile_filename(col: u32, row: u32) -> String {
    format!("{col}_{row}.{TILE_FORMAT}")
}

/// Prefix of a staging directory for `id` inside the tiles root.
pub fn staging_prefix(id: JobId) -> String {
    format!(".{}.staging-", pyramid_basename(id))
}
