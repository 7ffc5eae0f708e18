//! Job dispatch.
//!
//! Whatever creates a job record hands its identifier to a [`JobQueue`] once
//! the record is durably stored. The queue decides where the job runs:
//!
//! - [`SubprocessQueue`] launches `astro-tiler tile <id>` as a detached child
//!   process and returns immediately.
//! - [`ChannelQueue`] sends the id to an in-process [`run_worker`] thread.
//!
//! Dispatch is fire-and-forget. Progress is observed by polling the record.

use crate::imaging::ImageBackend;
use crate::job::JobId;
use crate::process::{JobOutcome, Orchestrator};
use crate::store::JobStore;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{Receiver, Sender};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to spawn worker for job {job_id}: {source}")]
    Spawn {
        job_id: JobId,
        source: std::io::Error,
    },
    #[error("Worker channel closed; job {0} not dispatched")]
    Disconnected(JobId),
}

pub trait JobQueue {
    /// Hand `job_id` to a worker. Returns once the hand-off is done, not when
    /// the job finishes.
    fn enqueue(&self, job_id: JobId) -> Result<(), QueueError>;
}

/// Runs each job in its own `tile` subprocess.
#[derive(Debug, Clone)]
pub struct SubprocessQueue {
    program: PathBuf,
    /// Arguments placed before `tile <id>`, e.g. `--media-root`.
    args: Vec<String>,
}

impl SubprocessQueue {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-invoke the running executable.
    pub fn current_exe(args: Vec<String>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }

    pub fn command(&self, job_id: JobId) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("tile")
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        command
    }
}

impl JobQueue for SubprocessQueue {
    fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        let child = self
            .command(job_id)
            .spawn()
            .map_err(|source| QueueError::Spawn { job_id, source })?;
        info!(job_id = %job_id, pid = child.id(), "dispatched worker process");
        // Not waited on; the child outlives this handle.
        Ok(())
    }
}

/// In-process dispatch over an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: Sender<JobId>,
}

impl ChannelQueue {
    /// A queue and the receiver to hand to [`run_worker`].
    pub fn channel() -> (Self, Receiver<JobId>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (Self { tx }, rx)
    }
}

impl JobQueue for ChannelQueue {
    fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        self.tx
            .send(job_id)
            .map_err(|_| QueueError::Disconnected(job_id))
    }
}

/// Run queued jobs one after another until every sender is dropped.
///
/// Dispatch errors (missing record, job not pending) are logged and skipped.
/// Returns the number of jobs that reached a terminal status.
pub fn run_worker<B: ImageBackend, S: JobStore>(
    orchestrator: &Orchestrator<B, S>,
    jobs: Receiver<JobId>,
) -> usize {
    let mut finished = 0;
    for job_id in jobs {
        match orchestrator.run(job_id) {
            Ok(JobOutcome::Completed { .. }) => finished += 1,
            Ok(JobOutcome::Failed { failure, .. }) => {
                warn!(job_id = %job_id, error = %failure, "worker job failed");
                finished += 1;
            }
            Err(e) => error!(job_id = %job_id, error = %e, "worker could not run job"),
        }
    }
    finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::imaging::backend::tests::{FailAt, MockBackend};
    use crate::job::{JobRecord, JobStatus};
    use crate::store::tests::MemoryStore;

    #[test]
    fn subprocess_command_line() {
        let queue = SubprocessQueue::new(
            "/usr/bin/astro-tiler",
            vec!["--media-root".into(), "/srv/media".into()],
        );
        let command = queue.command(JobId(12));

        assert_eq!(command.get_program(), "/usr/bin/astro-tiler");
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["--media-root", "/srv/media", "tile", "12"]);
    }

    #[test]
    fn subprocess_spawn_failure_is_reported() {
        let queue = SubprocessQueue::new("/nonexistent/astro-tiler", Vec::new());
        assert!(matches!(
            queue.enqueue(JobId(1)),
            Err(QueueError::Spawn { job_id: JobId(1), .. })
        ));
    }

    #[test]
    fn channel_enqueue_after_worker_gone_is_disconnected() {
        let (queue, rx) = ChannelQueue::channel();
        drop(rx);
        assert!(matches!(
            queue.enqueue(JobId(3)),
            Err(QueueError::Disconnected(JobId(3)))
        ));
    }

    #[test]
    fn worker_runs_every_queued_job() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig {
            media_root: tmp.path().to_path_buf(),
            temp_dir: Some(tmp.path().join("scratch")),
            ..PipelineConfig::default()
        };
        let store = MemoryStore::default();
        for id in 1..=3 {
            store
                .records
                .lock()
                .unwrap()
                .insert(JobId(id), JobRecord::new(JobId(id), "", "x.tif"));
        }
        let orchestrator = Orchestrator::new(config, MockBackend::new(64, 64), store);

        let (queue, rx) = ChannelQueue::channel();
        queue.enqueue(JobId(1)).unwrap();
        queue.enqueue(JobId(2)).unwrap();
        queue.enqueue(JobId(99)).unwrap();
        queue.enqueue(JobId(3)).unwrap();
        drop(queue);

        assert_eq!(run_worker(&orchestrator, rx), 3);
        for id in 1..=3 {
            assert_eq!(
                orchestrator.store().get(JobId(id)).status(),
                JobStatus::Completed
            );
        }
    }

    #[test]
    fn worker_counts_failed_jobs_as_finished() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig {
            media_root: tmp.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let store = MemoryStore::with_record(JobRecord::new(JobId(1), "", "x.tif"));
        let backend = MockBackend::new(64, 64).failing_at(FailAt::Validate);
        let orchestrator = Orchestrator::new(config, backend, store);

        let (queue, rx) = ChannelQueue::channel();
        queue.enqueue(JobId(1)).unwrap();
        drop(queue);

        assert_eq!(run_worker(&orchestrator, rx), 1);
        assert_eq!(
            orchestrator.store().get(JobId(1)).status(),
            JobStatus::Failed
        );
    }
}
