//! Queue-level error types.

use std::path::PathBuf;

use thiserror::Error;

use super::state::{JobId, JobState};

/// Failure of a checkpoint file operation.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` when the underlying file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
        }
    }
}

/// Errors returned by [`JobQueue`](super::JobQueue) operations and by the
/// worker's own bookkeeping.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The requested state change is not an edge of the job state machine.
    #[error("illegal job transition {from} -> {to}")]
    IllegalTransition { from: JobState, to: JobState },

    /// The job is not (or no longer) part of this queue.
    #[error("unknown job {0}")]
    UnknownJob(JobId),

    /// The job is already waiting in the queue.
    #[error("job {0} is already queued")]
    AlreadyQueued(JobId),

    /// The job is being processed and cannot be reset.
    #[error("job {0} is being processed")]
    Busy(JobId),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
