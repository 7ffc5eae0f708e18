//! Image processing in pure Rust, statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Validate** | `image::codecs::tiff::TiffDecoder` header + IFD check |
//! | **Decode** | `image::ImageReader`, no allocation limits |
//! | **Thumbnail** | fill-resize with Lanczos3 + center crop → JPEG |
//! | **Intermediate** | `tiff` BigTIFF, one strip per row band |
//! | **Pyramid** | native level in row bands, 2×2 mean halving to 1×1, `rayon` tile encode → JPEG |
//! | **Descriptor** | Deep Zoom `.dzi` XML |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for pyramid and dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
pub mod bands;
mod calculations;
pub mod descriptor;
pub mod intermediate;
pub mod operations;
mod params;
pub mod rust_backend;
pub mod validate;

pub use backend::{BackendError, Dimensions, ImageBackend, SourceInfo};
pub use bands::BandSource;
pub use calculations::{PyramidPlan, plan_pyramid};
pub use descriptor::Descriptor;
pub use intermediate::{Intermediate, NativeLevel};
pub use operations::{
    LevelSummary, ThumbnailConfig, TileConfig, TilePyramid, generate_thumbnail, render_pyramid,
};
pub use params::{Quality, ThumbnailParams, TileParams};
pub use rust_backend::RustBackend;
