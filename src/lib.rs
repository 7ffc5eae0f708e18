//! # Astro Tiler
//!
//! Batch pipeline that turns large astronomical images into Deep Zoom tile
//! pyramids plus a gallery thumbnail, so a web viewer can pan and zoom without
//! loading the full-resolution source.
//!
//! # Architecture: One Job, One Direction
//!
//! A job is addressed by an integer identifier. Whatever creates the job
//! record dispatches it through a [`queue::JobQueue`] once the record is
//! durably stored; the worker then runs the pipeline:
//!
//! ```text
//! source.tif ─► validate ─► decode ─► thumbnail
//!                                 └─► plan ─► normalize ─► pyramid + descriptor
//!                                                        └─► job record (status)
//! ```
//!
//! Status is the only channel back to the rest of the system. It moves
//! PENDING → PROCESSING → COMPLETED | FAILED and never reverses.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`process`] | Job orchestrator: sequencing, failure classification, progress events |
//! | [`imaging`] | Validation, pyramid planning, thumbnail and tile rendering |
//! | [`job`] | Job identifiers, records and the status state machine |
//! | [`store`] | Job record persistence (one JSON file per job) |
//! | [`queue`] | Dispatch: detached subprocess or in-process worker |
//! | [`config`] | `config.toml` loading, validation and storage layout |
//! | [`naming`] | File and directory names of every job artifact |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## The Descriptor Is the Completion Marker
//!
//! A pyramid is ready exactly when `image_{id}.dzi` exists. Tiles are written
//! into a staging directory, the descriptor is written last, and the whole
//! directory is renamed into place. A failed render leaves neither tiles nor a
//! descriptor behind, and never disturbs an earlier successful pyramid.
//!
//! ## Deep Zoom Level Numbering
//!
//! Zoom level 0 is the coarsest level of this pyramid (the image fits in one
//! tile). On disk each level is stored under its standard Deep Zoom number,
//! `level + ceil(log2(max_dimension)) - max_zoom_level`, so stock Deep Zoom
//! viewers address the levels at the right scale with only the `.dzi` file.
//! The Deep Zoom levels below zoom level 0, down to a single pixel, are
//! written too, one tile each, so viewers that fetch them find files.
//!
//! ## Band Streaming
//!
//! The native level is read in row bands one tile row tall, from the spilled
//! BigTIFF intermediate when one is used. Each band is tiled and then
//! box-halved into the next level, so full-resolution pixels are resident one
//! band at a time.
//!
//! ## Scoped Transients
//!
//! The normalized intermediate and the staging directory are owned by RAII
//! guards from `tempfile`. They are removed on success, on error and when a
//! panic unwinds to the orchestrator.

pub mod config;
pub mod imaging;
pub mod job;
pub mod naming;
pub mod output;
pub mod process;
pub mod queue;
pub mod store;
