//! Notifications from the worker to the observer.
//!
//! Events travel over an unbounded `tokio::sync::mpsc` channel so the worker
//! never waits on the observer.  The observer drains it with `try_recv` on
//! its own tick.  Events for one job arrive in the order they were emitted;
//! there is no ordering across jobs.

use serde::Serialize;
use tokio::sync::mpsc;

use super::progress::BatchProgress;
use super::state::{JobId, JobState};

/// One notification from the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// A chunk was persisted to the job's checkpoint.
    Progress {
        job: JobId,
        fraction: f32,
        chunk: String,
    },

    /// The job changed state, or its detail message changed.
    StateChanged {
        job: JobId,
        state: JobState,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Aggregate completion.  `total == 0` means there is nothing to show.
    BatchProgress { done: usize, total: usize },

    /// The job left the queue; no further events will mention it.
    JobRemoved { job: JobId },
}

impl QueueEvent {
    /// The job this event is about, if any.
    pub fn job(&self) -> Option<JobId> {
        match self {
            QueueEvent::Progress { job, .. }
            | QueueEvent::StateChanged { job, .. }
            | QueueEvent::JobRemoved { job } => Some(*job),
            QueueEvent::BatchProgress { .. } => None,
        }
    }
}

impl From<BatchProgress> for QueueEvent {
    fn from(p: BatchProgress) -> Self {
        QueueEvent::BatchProgress {
            done: p.done,
            total: p.total,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<QueueEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<QueueEvent>;

/// Send without caring whether anyone is still listening.
pub(crate) fn emit(tx: &EventSender, event: QueueEvent) {
    if tx.send(event).is_err() {
        log::trace!("queue: event dropped, observer gone");
    }
}
