//! Job records and the status state machine.
//!
//! A [`JobRecord`] is the only state shared between the pipeline and the rest
//! of the system. Its status moves in one direction:
//!
//! ```text
//! PENDING ──► PROCESSING ──┬──► COMPLETED
//!                          └──► FAILED
//! ```
//!
//! [`JobRecord::set_status`] is the single writer for the status field and
//! rejects every other transition. Completion fields (`max_zoom_level`,
//! `width`, `height`, `thumbnail_path`) are written together with the
//! COMPLETED status by [`JobRecord::complete`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal status transition for job {job_id}: {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Fields written on successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub max_zoom_level: u32,
    pub width: u32,
    pub height: u32,
    /// Relative to the media root, e.g. `thumbnails/job_7_thumb.jpg`.
    pub thumbnail_path: String,
}

/// Persisted state of one tiling job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Display name, informational only.
    #[serde(default)]
    pub name: String,
    /// Source raster, relative to the media root.
    pub source_path: String,
    status: JobStatus,
    #[serde(default)]
    pub max_zoom_level: Option<u32>,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl JobRecord {
    /// A fresh PENDING record.
    pub fn new(id: JobId, name: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            source_path: source_path.into(),
            status: JobStatus::Pending,
            max_zoom_level: None,
            thumbnail_path: None,
            width: None,
            height: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move to `next`, rejecting anything outside the state machine.
    pub fn set_status(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Transition to COMPLETED and record the pyramid results in one step.
    pub fn complete(&mut self, completion: Completion) -> Result<(), TransitionError> {
        self.set_status(JobStatus::Completed)?;
        self.max_zoom_level = Some(completion.max_zoom_level);
        self.width = Some(completion.width);
        self.height = Some(completion.height);
        self.thumbnail_path = Some(completion.thumbnail_path);
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), TransitionError> {
        self.set_status(JobStatus::Failed)
    }
}
