//! Job record persistence.
//!
//! The pipeline reads and writes job records through the [`JobStore`] trait.
//! [`JsonJobStore`] keeps one JSON document per job under the jobs directory:
//!
//! ```text
//! media/jobs/
//! ├── job_1.json
//! └── job_2.json
//! ```
//!
//! Every save goes to a sibling temp file first and is renamed into place, so
//! a reader polling the status never observes a half-written record.

use crate::job::{JobId, JobRecord};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Job record not found: {0}")]
    NotFound(JobId),
}

/// Read/write access to job records.
pub trait JobStore: Sync {
    fn load(&self, id: JobId) -> Result<JobRecord, StoreError>;

    /// Persist the whole record as a single update.
    fn save(&self, record: &JobRecord) -> Result<(), StoreError>;
}

/// File-backed store: `<root>/job_{id}.json`.
pub struct JsonJobStore {
    root: PathBuf,
}

impl JsonJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: JobId) -> PathBuf {
        self.root.join(format!("job_{id}.json"))
    }

    /// Allocate the next identifier and durably persist a PENDING record.
    ///
    /// The identifier is claimed by linking the record into place without
    /// replacing an existing file; a concurrent `create` that got there first
    /// pushes this one on to the next free id. Dispatch must only happen
    /// after this returns.
    pub fn create(
        &self,
        name: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Result<JobRecord, StoreError> {
        let (name, source_path) = (name.into(), source_path.into());
        let mut next = self.ids()?.into_iter().max().map_or(1, |JobId(n)| n + 1);
        loop {
            let record = JobRecord::new(JobId(next), name.clone(), source_path.clone());
            let tmp = self.write_temp(&record)?;
            match tmp.persist_noclobber(self.record_path(record.id)) {
                Ok(_) => return Ok(record),
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(job_id = %record.id, "id taken, trying next");
                    next += 1;
                }
                Err(e) => return Err(e.error.into()),
            }
        }
    }

    /// Serialize `record` into a synced temp file beside the records.
    fn write_temp(&self, record: &JobRecord) -> Result<NamedTempFile, StoreError> {
        std::fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(record)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }

    /// All identifiers with a record on disk, unordered.
    pub fn ids(&self) -> Result<Vec<JobId>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            if let Some(id) = parse_record_filename(&name.to_string_lossy()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// `job_12.json` → `Some(JobId(12))`.
fn parse_record_filename(name: &str) -> Option<JobId> {
    name.strip_prefix("job_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl JobStore for JsonJobStore {
    fn load(&self, id: JobId) -> Result<JobRecord, StoreError> {
        let path = self.record_path(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.write_temp(record)?
            .persist(self.record_path(record.id))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}
