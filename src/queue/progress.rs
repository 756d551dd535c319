//! Batch-level completion derived from the live job set.

use std::sync::Arc;

use serde::Serialize;

use super::state::{Job, JobState};

/// `done / total` over every job currently in the queue.
///
/// Recomputed from the job set on demand; never stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchProgress {
    pub done: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn from_jobs(jobs: &[Arc<Job>]) -> Self {
        Self {
            done: jobs.iter().filter(|j| j.state() == JobState::Done).count(),
            total: jobs.len(),
        }
    }

    /// Completion in `[0, 1]`, or `None` when there are no jobs and the
    /// aggregate should be hidden.
    ///
    /// ```
    /// use transcript_queue::queue::BatchProgress;
    ///
    /// assert_eq!(BatchProgress { done: 0, total: 0 }.fraction(), None);
    /// assert_eq!(BatchProgress { done: 1, total: 4 }.fraction(), Some(0.25));
    /// ```
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some((self.done as f64 / self.total as f64).clamp(0.0, 1.0))
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.done >= self.total
    }
}
