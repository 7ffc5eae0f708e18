//! Job orchestration.
//!
//! Runs one tiling job from its record to a terminal status. This is the
//! entrypoint a dispatched worker calls with nothing but a [`JobId`].
//!
//! ## Sequence
//!
//! ```text
//! load record ─► PROCESSING (persisted) ─► validate ─► open ─► thumbnail
//!            ─► plan ─► normalize ─► render pyramid ─► COMPLETED (persisted)
//! ```
//!
//! Any failure after PROCESSING is persisted ends the job as FAILED. The
//! failure is classified as a [`FailureKind`]:
//!
//! | Step | Kind |
//! |---|---|
//! | validate | `InvalidFormat` |
//! | open | `SourceUnreadable` |
//! | thumbnail, normalize, render, panics | `RenderFailure` |
//!
//! A record that does not exist, or that is not PENDING, is rejected before
//! anything is written.
//!
//! ## Transient files
//!
//! The normalized intermediate and the pyramid staging directory are both
//! scope guards. They are removed on every exit path, including panics caught
//! at the outermost scope.
//!
//! ## Progress
//!
//! When constructed with an event sender, the orchestrator reports each step
//! as a [`ProcessEvent`]. The CLI formats these with
//! [`output::format_process_event`](crate::output::format_process_event).

use crate::config::PipelineConfig;
use crate::imaging::bands::band_height;
use crate::imaging::intermediate;
use crate::imaging::{
    ImageBackend, LevelSummary, PyramidPlan, Quality, SourceInfo, ThumbnailConfig, TileConfig,
    TilePyramid, generate_thumbnail, plan_pyramid, render_pyramid,
};
use crate::job::{Completion, JobId, JobRecord, JobStatus, TransitionError};
use crate::naming;
use crate::store::{JobStore, StoreError};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why a job ended FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The source failed container validation.
    InvalidFormat,
    /// The source passed validation but could not be opened or decoded.
    SourceUnreadable,
    /// Thumbnail or pyramid generation failed, or a step panicked.
    RenderFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::InvalidFormat => "invalid format",
            FailureKind::SourceUnreadable => "source unreadable",
            FailureKind::RenderFailure => "render failure",
        })
    }
}

/// A classified, terminal job failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    fn new(kind: FailureKind, err: impl fmt::Display) -> Self {
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Job failed: {0}")]
    Job(#[from] JobFailure),
}

impl ProcessError {
    /// Whether the job identifier did not resolve to a record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessError::Store(StoreError::NotFound(_)))
    }
}

/// How a dispatched job ended. Both variants have been persisted.
#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        record: JobRecord,
        pyramid: TilePyramid,
    },
    Failed {
        record: JobRecord,
        failure: JobFailure,
    },
}

impl JobOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            JobOutcome::Completed { record, .. } | JobOutcome::Failed { record, .. } => record,
        }
    }

    /// Turn a FAILED outcome into `Err(ProcessError::Job)`.
    pub fn into_result(self) -> Result<(JobRecord, TilePyramid), ProcessError> {
        match self {
            JobOutcome::Completed { record, pyramid } => Ok((record, pyramid)),
            JobOutcome::Failed { failure, .. } => Err(failure.into()),
        }
    }
}

/// Progress events, in emission order.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started {
        job_id: JobId,
        name: String,
        source_path: String,
    },
    Validated {
        info: SourceInfo,
    },
    ThumbnailWritten {
        path: String,
        width: u32,
        height: u32,
    },
    Planned {
        plan: PyramidPlan,
        total_tiles: u64,
    },
    LevelRendered {
        summary: LevelSummary,
        max_zoom_level: u32,
    },
    Completed {
        job_id: JobId,
        max_zoom_level: u32,
        total_tiles: u64,
    },
    Failed {
        job_id: JobId,
        failure: JobFailure,
    },
}

/// Artifacts of a successful pipeline run, not yet persisted.
struct Rendered {
    thumbnail_path: String,
    plan: PyramidPlan,
    pyramid: TilePyramid,
}

/// Sequences one job through the pipeline.
pub struct Orchestrator<B, S> {
    config: PipelineConfig,
    backend: B,
    store: S,
    events: Option<Sender<ProcessEvent>>,
}

impl<B: ImageBackend, S: JobStore> Orchestrator<B, S> {
    pub fn new(config: PipelineConfig, backend: B, store: S) -> Self {
        Self {
            config,
            backend,
            store,
            events: None,
        }
    }

    /// Report progress on `events`.
    pub fn with_events(mut self, events: Sender<ProcessEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            tx.send(event).ok();
        }
    }

    /// Run job `job_id` once, to COMPLETED or FAILED.
    ///
    /// `Err` means nothing about the job's outcome was persisted: the record
    /// is missing, is not PENDING, or the store failed.
    pub fn run(&self, job_id: JobId) -> Result<JobOutcome, ProcessError> {
        let mut record = self.store.load(job_id)?;
        if record.status() != JobStatus::Pending {
            warn!(job_id = %job_id, status = %record.status(), "job is not pending; not dispatching");
        }
        record.set_status(JobStatus::Processing)?;
        self.store.save(&record)?;
        info!(job_id = %job_id, source = %record.source_path, "job processing");
        self.emit(ProcessEvent::Started {
            job_id,
            name: record.name.clone(),
            source_path: record.source_path.clone(),
        });

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&record)))
            .unwrap_or_else(|payload| {
                Err(JobFailure::new(
                    FailureKind::RenderFailure,
                    format!("panic: {}", panic_message(payload.as_ref())),
                ))
            });

        match result {
            Ok(rendered) => {
                record.complete(Completion {
                    max_zoom_level: rendered.plan.max_zoom_level,
                    width: rendered.plan.source_width,
                    height: rendered.plan.source_height,
                    thumbnail_path: rendered.thumbnail_path,
                })?;
                self.store.save(&record)?;
                info!(
                    job_id = %job_id,
                    max_zoom_level = rendered.plan.max_zoom_level,
                    width = rendered.plan.source_width,
                    height = rendered.plan.source_height,
                    "job completed"
                );
                self.emit(ProcessEvent::Completed {
                    job_id,
                    max_zoom_level: rendered.plan.max_zoom_level,
                    total_tiles: rendered.pyramid.total_tiles(),
                });
                Ok(JobOutcome::Completed {
                    record,
                    pyramid: rendered.pyramid,
                })
            }
            Err(failure) => {
                error!(job_id = %job_id, kind = %failure.kind, error = %failure.message, "job failed");
                record.fail()?;
                self.store.save(&record)?;
                self.emit(ProcessEvent::Failed {
                    job_id,
                    failure: failure.clone(),
                });
                Ok(JobOutcome::Failed { record, failure })
            }
        }
    }

    /// Steps between PROCESSING and the terminal status.
    fn execute(&self, record: &JobRecord) -> Result<Rendered, JobFailure> {
        use FailureKind::*;
        let job_id = record.id;
        let source = self.config.media_root.join(&record.source_path);

        let info = self
            .backend
            .validate(&source)
            .map_err(|e| JobFailure::new(InvalidFormat, e))?;
        debug!(job_id = %job_id, format = info.format, color = %info.color, "source validated");
        self.emit(ProcessEvent::Validated { info });

        let raster = self
            .backend
            .open(&source)
            .map_err(|e| JobFailure::new(SourceUnreadable, e))?;

        let thumbnail_config = ThumbnailConfig {
            bound: self.config.thumbnails.size,
            quality: Quality::new(self.config.thumbnails.quality),
        };
        let (_, thumb) = generate_thumbnail(
            &self.backend,
            &raster,
            job_id,
            &self.config.thumbnails_root(),
            &thumbnail_config,
        )
        .map_err(|e| JobFailure::new(RenderFailure, e))?;
        let thumbnail_path = format!(
            "{}/{}",
            self.config.thumbnails_dir,
            naming::thumbnail_filename(job_id)
        );
        self.emit(ProcessEvent::ThumbnailWritten {
            path: thumbnail_path.clone(),
            width: thumb.width,
            height: thumb.height,
        });

        let plan = plan_pyramid(raster.width(), raster.height(), self.config.tiles.size);
        info!(job_id = %job_id, max_zoom_level = plan.max_zoom_level, tiles = plan.total_tiles(), "pyramid planned");
        self.emit(ProcessEvent::Planned {
            plan,
            total_tiles: plan.total_tiles(),
        });

        let spill_dir = if self.config.tiles.normalize_intermediate {
            let dir = self.config.temp_root();
            std::fs::create_dir_all(&dir).map_err(|e| JobFailure::new(RenderFailure, e))?;
            Some(dir)
        } else {
            None
        };
        // `native` holds the intermediate file, if any, until this function returns.
        let mut native = intermediate::normalize(
            raster,
            spill_dir.as_deref(),
            job_id,
            band_height(plan.tile_size),
        )
        .map_err(|e| JobFailure::new(RenderFailure, e))?;

        let tile_config = TileConfig {
            quality: Quality::new(self.config.tiles.quality),
        };
        let pyramid = render_pyramid(
            &self.backend,
            &mut native,
            &plan,
            job_id,
            &self.config.tiles_root(),
            &tile_config,
            |summary| {
                self.emit(ProcessEvent::LevelRendered {
                    summary: *summary,
                    max_zoom_level: plan.max_zoom_level,
                })
            },
        )
        .map_err(|e| JobFailure::new(RenderFailure, e))?;

        Ok(Rendered {
            thumbnail_path,
            plan,
            pyramid,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
