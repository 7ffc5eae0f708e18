//! Pipeline configuration module.
//!
//! Replaces process-wide settings lookups with an explicit [`PipelineConfig`]
//! that is built once and handed to the orchestrator. Stock defaults are
//! overridden by an optional `config.toml` in the media root (or any file
//! passed with `--config`).
//!
//! ## Storage Layout
//!
//! Every directory is resolved relative to `media_root`:
//!
//! ```text
//! media/
//! ├── config.toml                      # Optional overrides
//! ├── images/                          # Submitted source rasters
//! ├── jobs/job_7.json                  # Job records
//! ├── thumbnails/job_7_thumb.jpg       # Gallery previews
//! └── tiles/image_7/
//!     ├── image_7.dzi                  # Descriptor (completion marker)
//!     └── image_7_files/<level>/<col>_<row>.jpeg
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! media_root = "media"
//! tiles_dir = "tiles"
//! thumbnails_dir = "thumbnails"
//! jobs_dir = "jobs"
//! images_dir = "images"
//! # temp_dir = "/var/tmp"   # Normalized intermediates (omit = system temp)
//!
//! [tiles]
//! size = 256                  # Tile edge in pixels
//! quality = 90                # JPEG quality (1-100)
//! normalize_intermediate = true
//!
//! [thumbnails]
//! size = 512                  # Bounding box edge in pixels
//! quality = 85                # JPEG quality (1-100)
//!
//! [processing]
//! max_processes = 4           # Tile encoding workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("stock defaults: {0}")]
    Defaults(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Pipeline configuration loaded from `config.toml`.
///
/// All fields have defaults. Config files need only specify the values they
/// want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root of all pipeline storage.
    pub media_root: PathBuf,
    /// Tile pyramids, relative to `media_root`.
    pub tiles_dir: String,
    /// Thumbnails, relative to `media_root`.
    pub thumbnails_dir: String,
    /// Job records, relative to `media_root`.
    pub jobs_dir: String,
    /// Submitted source images, relative to `media_root`.
    pub images_dir: String,
    /// Where normalized intermediates are materialized. System temp when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    /// Tile pyramid settings.
    pub tiles: TilesConfig,
    /// Thumbnail settings.
    pub thumbnails: ThumbnailsConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("media"),
            tiles_dir: "tiles".to_string(),
            thumbnails_dir: "thumbnails".to_string(),
            jobs_dir: "jobs".to_string(),
            images_dir: "images".to_string(),
            temp_dir: None,
            tiles: TilesConfig::default(),
            thumbnails: ThumbnailsConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tiles.size == 0 {
            return Err(ConfigError::Validation("tiles.size must be non-zero".into()));
        }
        if self.thumbnails.size == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.size must be non-zero".into(),
            ));
        }
        if !(1..=100).contains(&self.tiles.quality) {
            return Err(ConfigError::Validation("tiles.quality must be 1-100".into()));
        }
        if !(1..=100).contains(&self.thumbnails.quality) {
            return Err(ConfigError::Validation(
                "thumbnails.quality must be 1-100".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn tiles_root(&self) -> PathBuf {
        self.media_root.join(&self.tiles_dir)
    }

    pub fn thumbnails_root(&self) -> PathBuf {
        self.media_root.join(&self.thumbnails_dir)
    }

    pub fn jobs_root(&self) -> PathBuf {
        self.media_root.join(&self.jobs_dir)
    }

    pub fn images_root(&self) -> PathBuf {
        self.media_root.join(&self.images_dir)
    }

    /// Directory for scoped intermediates.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Tile pyramid settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TilesConfig {
    /// Edge length of a full tile in pixels.
    pub size: u32,
    /// JPEG encoding quality for tiles.
    pub quality: u32,
    /// Materialize a normalized 8-bit copy of the source before tiling.
    pub normalize_intermediate: bool,
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self {
            size: 256,
            quality: 90,
            normalize_intermediate: true,
        }
    }
}

/// Thumbnail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    /// Edge of the square bounding box.
    pub size: u32,
    /// JPEG encoding quality for thumbnails.
    pub quality: u32,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            size: 512,
            quality: 85,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel tile encoding workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

impl ProcessingConfig {
    /// Rayon workers for tile encoding: `max_processes` capped at the core
    /// count, or one per core when unset.
    pub fn tile_workers(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_processes.map_or(cores, |n| n.min(cores))
    }
}

// =============================================================================
// Loading: stock defaults, then the media root's config.toml on top
// =============================================================================

/// The stock settings as a TOML table, the layer a config file overrides.
fn defaults_table() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(PipelineConfig::default())?)
}

/// Lay `overrides` over `defaults`.
///
/// Sections merge key by key, so a file that only sets `tiles.quality` keeps
/// the stock `tiles.size`. Any other value in `overrides` replaces the default.
fn apply_overrides(defaults: toml::Value, overrides: toml::Value) -> toml::Value {
    match (defaults, overrides) {
        (toml::Value::Table(mut section), toml::Value::Table(changes)) => {
            for (key, value) in changes {
                let merged = match section.remove(&key) {
                    Some(default) => apply_overrides(default, value),
                    None => value,
                };
                section.insert(key, merged);
            }
            toml::Value::Table(section)
        }
        (_, value) => value,
    }
}

/// Read a config file. A missing file means no overrides.
fn read_overrides(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(toml::from_str(&content)?))
}

/// Load config for a media root.
///
/// Reads `explicit` when given, otherwise `<media_root>/config.toml`. The
/// media root passed here always wins over a `media_root` key in the file.
pub fn load_config(
    media_root: &Path,
    explicit: Option<&Path>,
) -> Result<PipelineConfig, ConfigError> {
    let config_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => media_root.join("config.toml"),
    };
    let merged = match read_overrides(&config_path)? {
        Some(overrides) => apply_overrides(defaults_table()?, overrides),
        None => defaults_table()?,
    };
    let mut config: PipelineConfig = merged.try_into()?;
    config.media_root = media_root.to_path_buf();
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# astro-tiler configuration
# =========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.
#
# Place this file at <media_root>/config.toml or pass it with --config.

# Storage directories, relative to the media root (--media-root).
tiles_dir = "tiles"
thumbnails_dir = "thumbnails"
jobs_dir = "jobs"
images_dir = "images"

# Where the normalized intermediate is written during tiling.
# Omit to use the system temp directory.
# temp_dir = "/var/tmp"

# ---------------------------------------------------------------------------
# Tile pyramid
# ---------------------------------------------------------------------------
[tiles]
# Edge of a full tile in pixels. Edge tiles are smaller, never padded.
size = 256

# JPEG quality for tiles (1 = worst, 100 = best).
quality = 90

# Decode the source once into a normalized 8-bit intermediate before tiling.
# Recommended for compressed or striped TIFFs with poor random access.
normalize_intermediate = true

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
# Bounding box edge. Larger sources are scaled and center-cropped to fit.
size = 512

# JPEG quality for thumbnails (1 = worst, 100 = best).
quality = 85

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel tile encoding workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
