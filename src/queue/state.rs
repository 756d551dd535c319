//! Job record and its state machine.
//!
//! [`JobState`] enumerates the lifecycle of one transcription job.  The only
//! legal edges are:
//!
//! ```text
//! Idle ──submit──▶ Waiting ──dequeue──▶ Processing ──complete──▶ Done
//!   ▲                 │                     │ │
//!   └────cancel───────┘                     │ └──fail──▶ Error
//!                     │                     │
//!                     │ (flag set before    ├──cancel──▶ Stopping ──▶ Stopped | Done | Error
//!                     │  dequeue)           │
//!                     └──────▶ Stopped ◀────┘ (cancel observed)
//!
//! Done | Error | Stopped ──submit──▶ Waiting
//! ```
//!
//! A [`Job`] is shared as `Arc<Job>` between the caller and the worker.  Its
//! mutable fields live behind one mutex; the cancellation flag is a separate
//! atomic so the engine thread can poll it without locking.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::error::QueueError;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub(crate) u64);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Added but not submitted.
    #[default]
    Idle,
    /// Submitted and waiting for the worker.
    Waiting,
    /// The worker is running the engine on this job.
    Processing,
    /// Cancel requested while processing; the worker has not acknowledged it.
    Stopping,
    /// Completed; the checkpoint holds the full transcript.
    Done,
    /// Failed; see [`Job::error_message`].
    Error,
    /// Cancelled.
    Stopped,
}

impl JobState {
    /// Whether `self -> to` is an edge of the state machine.
    ///
    /// ```
    /// use transcript_queue::queue::JobState;
    ///
    /// assert!(JobState::Idle.can_transition_to(JobState::Waiting));
    /// assert!(JobState::Done.can_transition_to(JobState::Waiting));
    /// assert!(!JobState::Idle.can_transition_to(JobState::Processing));
    /// ```
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Idle, Waiting)
                | (Waiting, Idle)
                | (Waiting, Processing)
                | (Waiting, Stopped)
                | (Processing, Done)
                | (Processing, Error)
                | (Processing, Stopped)
                | (Processing, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Done)
                | (Stopping, Error)
                | (Done, Waiting)
                | (Error, Waiting)
                | (Stopped, Waiting)
        )
    }

    /// `Done`, `Error` or `Stopped`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Error | JobState::Stopped)
    }

    /// `true` while the worker holds the job.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Processing | JobState::Stopping)
    }

    /// States from which [`JobQueue::start_all_pending`](super::JobQueue::start_all_pending)
    /// resubmits a job.
    pub fn is_pending(self) -> bool {
        matches!(self, JobState::Idle | JobState::Stopped | JobState::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Waiting => "waiting",
            JobState::Processing => "processing",
            JobState::Stopping => "stopping",
            JobState::Done => "done",
            JobState::Error => "error",
            JobState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Stopwatch
// ---------------------------------------------------------------------------

/// Wall-clock time spent processing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    started_at: Option<Instant>,
    accumulated: Duration,
}

impl Stopwatch {
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(t) = self.started_at.take() {
            self.accumulated += t.elapsed();
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct JobRuntime {
    state: JobState,
    progress: f32,
    error: Option<String>,
    text: String,
    stopwatch: Stopwatch,
}

impl JobRuntime {
    fn apply(&mut self, to: JobState) -> Result<JobState, QueueError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(QueueError::IllegalTransition { from, to });
        }
        self.state = to;
        match to {
            JobState::Processing => {
                self.stopwatch.reset();
                self.stopwatch.start();
            }
            s if s.is_terminal() => self.stopwatch.stop(),
            _ => {}
        }
        Ok(from)
    }
}

/// One transcription job.
///
/// Readers may call any getter at any time; each takes the job lock briefly.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    source_path: PathBuf,
    display_name: String,
    duration_secs: f64,
    cancel_requested: AtomicBool,
    runtime: Mutex<JobRuntime>,
}

impl Job {
    pub(crate) fn new(source_path: PathBuf, duration_secs: f64) -> Self {
        let display_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.display().to_string());
        Self {
            id: JobId::next(),
            source_path,
            display_name,
            duration_secs,
            cancel_requested: AtomicBool::new(false),
            runtime: Mutex::new(JobRuntime::default()),
        }
    }

    fn runtime(&self) -> MutexGuard<'_, JobRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// File name of the source, used for display and checkpoint naming.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Probed media duration; `0.0` when unknown.
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn state(&self) -> JobState {
        self.runtime().state
    }

    /// Progress of the current or last attempt, 0.0 – 1.0.
    pub fn progress(&self) -> f32 {
        self.runtime().progress
    }

    /// Set only while the job is in [`JobState::Error`].
    pub fn error_message(&self) -> Option<String> {
        self.runtime().error.clone()
    }

    /// Cached transcript text.  The checkpoint file is authoritative.
    pub fn text(&self) -> String {
        self.runtime().text.clone()
    }

    /// Time spent processing in the current or last attempt.
    pub fn elapsed(&self) -> Duration {
        self.runtime().stopwatch.elapsed()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Apply `self.state -> to`, rejecting anything outside the state machine.
    pub(crate) fn transition(&self, to: JobState) -> Result<JobState, QueueError> {
        self.runtime().apply(to)
    }

    /// Move into a terminal state, recording the error message for
    /// [`JobState::Error`] and discarding cached text unless done.  Readers
    /// never see the new state without its message.
    pub(crate) fn finish(&self, to: JobState, detail: Option<&str>) -> Result<(), QueueError> {
        let mut rt = self.runtime();
        rt.apply(to)?;
        match to {
            JobState::Done => rt.progress = 1.0,
            JobState::Error => {
                rt.error = Some(detail.unwrap_or("unknown error").to_owned());
                rt.text.clear();
            }
            _ => rt.text.clear(),
        }
        Ok(())
    }

    /// Reset for a fresh attempt and move to [`JobState::Waiting`].
    pub(crate) fn prepare_attempt(&self) -> Result<(), QueueError> {
        let mut rt = self.runtime();
        let from = rt.state;
        if !from.can_transition_to(JobState::Waiting) {
            return Err(QueueError::IllegalTransition {
                from,
                to: JobState::Waiting,
            });
        }
        self.cancel_requested.store(false, Ordering::SeqCst);
        rt.state = JobState::Waiting;
        rt.progress = 0.0;
        rt.error = None;
        rt.text.clear();
        rt.stopwatch.reset();
        Ok(())
    }

    /// Record one persisted chunk.  Returns the stored progress, which never
    /// decreases within an attempt.
    pub(crate) fn record_chunk(&self, fraction: f32, chunk: &str) -> f32 {
        let mut rt = self.runtime();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            rt.progress
        };
        rt.progress = rt.progress.max(fraction);
        rt.text.push_str(chunk);
        rt.progress
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.display_name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
