//! [`JobQueue`]: the submission surface used by a front end.
//!
//! Every method is synchronous and cheap except [`JobQueue::add`] (probes
//! the media duration) and [`JobQueue::shutdown`].  They may be called from
//! any thread while the worker runs; all bookkeeping happens under the queue
//! lock and each state change is announced on the event channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::probe_duration;
use crate::config::{AppConfig, OutputConfig};
use crate::stt::LazyEngine;

use super::checkpoint::CheckpointStore;
use super::error::QueueError;
use super::events::{EventReceiver, QueueEvent};
use super::progress::BatchProgress;
use super::runner::{run_worker, QueueInner, Shared};
use super::state::{Job, JobId, JobState};

/// How [`JobQueue::remove`] disposed of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The job is gone.
    Immediate,
    /// The job is being processed.  It was asked to stop and will be removed
    /// by the worker once it reaches a terminal state.
    Deferred,
}

/// Result of [`JobQueue::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs that were waiting or processing and received a cancel request.
    pub cancelled: usize,
    /// Whether the scratch directory no longer exists.
    pub scratch_removed: bool,
}

/// Handle on the job queue and its single worker.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use transcript_queue::config::AppConfig;
/// use transcript_queue::queue::{CheckpointStore, JobQueue};
/// use transcript_queue::stt::{LazyEngine, TranscribeParams, WhisperLoader};
///
/// # async fn example() -> Result<(), transcript_queue::queue::QueueError> {
/// let config = AppConfig::default();
/// let store = CheckpointStore::new("/tmp/transcript-queue/recovery");
/// let engine = LazyEngine::new(WhisperLoader::new(
///     "models/ggml-medium.bin",
///     TranscribeParams::default(),
/// ));
///
/// let (queue, mut events) = JobQueue::start(&config, store, engine)?;
/// let job = queue.add("lecture.mp3");
/// queue.submit(&job)?;
///
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JobQueue {
    shared: Arc<Shared>,
    output: OutputConfig,
}

impl JobQueue {
    /// Purge stale checkpoints and spawn the worker on the current tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// [`QueueError::Checkpoint`] when the scratch directory cannot be
    /// created or cleaned.
    pub fn start(
        config: &AppConfig,
        store: CheckpointStore,
        engine: LazyEngine,
    ) -> Result<(Self, EventReceiver), QueueError> {
        store.purge_all()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(store, config.queue.clone(), tx));
        tokio::spawn(run_worker(Arc::clone(&shared), Arc::new(engine)));

        let queue = Self {
            shared,
            output: config.output.clone(),
        };
        Ok((queue, rx))
    }

    // -----------------------------------------------------------------------
    // Job set
    // -----------------------------------------------------------------------

    /// Register an idle job for `path`.  Adding the same file twice creates
    /// two independent jobs.
    pub fn add(&self, path: impl Into<PathBuf>) -> Arc<Job> {
        let path = path.into();
        let duration = probe_duration(&path);
        let job = Arc::new(Job::new(path, duration));

        let mut inner = self.shared.lock();
        inner.jobs.push(Arc::clone(&job));
        log::info!("queue: added {job}");
        self.shared.emit_state(&job, None);
        self.shared.emit_batch(&inner);
        job
    }

    /// Snapshot of every live job in the order they were added.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.shared.lock().jobs.clone()
    }

    pub fn job(&self, id: JobId) -> Option<Arc<Job>> {
        self.shared.lock().jobs.iter().find(|j| j.id() == id).cloned()
    }

    /// The job the worker is running, if any.
    pub fn current(&self) -> Option<Arc<Job>> {
        self.shared.lock().current.clone()
    }

    pub fn batch_progress(&self) -> BatchProgress {
        BatchProgress::from_jobs(&self.shared.lock().jobs)
    }

    /// Sum of the probed durations of every live job, for display only.
    pub fn total_duration_secs(&self) -> f64 {
        self.shared.lock().jobs.iter().map(|j| j.duration_secs()).sum()
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.shared.store
    }

    // -----------------------------------------------------------------------
    // Submission / cancellation
    // -----------------------------------------------------------------------

    /// Queue `job` for a fresh attempt.
    ///
    /// Clears the cancel flag, progress, error and the previous attempt's
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// - [`QueueError::UnknownJob`] — not in this queue, or being removed.
    /// - [`QueueError::AlreadyQueued`] — already waiting.
    /// - [`QueueError::Busy`] — processing or stopping.
    pub fn submit(&self, job: &Arc<Job>) -> Result<(), QueueError> {
        let mut inner = self.shared.lock();
        self.check_live(&inner, job)?;

        match job.state() {
            JobState::Waiting => return Err(QueueError::AlreadyQueued(job.id())),
            s if s.is_active() => return Err(QueueError::Busy(job.id())),
            _ => {}
        }
        self.shared.store.delete(job)?;
        job.prepare_attempt()?;
        inner.pending.push_back(Arc::clone(job));
        log::info!("queue: submitted {job} ({} pending)", inner.pending.len());
        self.shared.emit_state(job, None);
        self.shared.emit_batch(&inner);
        drop(inner);

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Ask `job` to stop.
    ///
    /// A waiting job leaves the queue and goes back to idle without ever
    /// reaching the engine.  A processing job moves to stopping; the worker
    /// finishes it as stopped once the engine notices.  Anything else is left
    /// alone.
    pub fn request_cancel(&self, job: &Arc<Job>) -> Result<(), QueueError> {
        let mut inner = self.shared.lock();
        self.check_live(&inner, job)?;
        self.cancel_locked(&mut inner, job)
    }

    fn cancel_locked(&self, inner: &mut QueueInner, job: &Arc<Job>) -> Result<(), QueueError> {
        match job.state() {
            JobState::Waiting => {
                job.request_cancel();
                inner.pending.retain(|j| j.id() != job.id());
                job.transition(JobState::Idle)?;
                log::info!("queue: {job} cancelled while waiting");
                self.shared.emit_state(job, None);
            }
            JobState::Processing => {
                job.request_cancel();
                job.transition(JobState::Stopping)?;
                log::info!("queue: stopping {job}");
                self.shared.emit_state(job, None);
            }
            _ => {}
        }
        Ok(())
    }

    /// Remove `job` from the queue.
    ///
    /// A job that is processing or stopping is asked to stop and removed by
    /// the worker once it is terminal; callers must treat it as present
    /// until a [`QueueEvent::JobRemoved`] arrives.
    pub fn remove(&self, job: &Arc<Job>) -> Result<Removal, QueueError> {
        let mut inner = self.shared.lock();
        if inner.deferred_removals.contains(&job.id()) {
            return Ok(Removal::Deferred);
        }
        if !inner.contains(job.id()) {
            return Err(QueueError::UnknownJob(job.id()));
        }

        if job.state().is_active() {
            self.cancel_locked(&mut inner, job)?;
            inner.deferred_removals.insert(job.id());
            log::info!("queue: removal of {job} deferred until it stops");
            return Ok(Removal::Deferred);
        }

        job.request_cancel();
        self.shared.remove_now(&mut inner, job);
        Ok(Removal::Immediate)
    }

    /// Submit every idle, stopped or failed job.  Returns how many were
    /// queued; each job is handled independently.
    pub fn start_all_pending(&self) -> usize {
        let mut queued = 0;
        for job in self.jobs() {
            if !job.state().is_pending() {
                continue;
            }
            match self.submit(&job) {
                Ok(()) => queued += 1,
                Err(e) => log::warn!("queue: cannot submit {job}: {e}"),
            }
        }
        queued
    }

    /// Cancel every waiting or processing job.  Returns how many were asked
    /// to stop.
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for job in self.jobs() {
            if !matches!(job.state(), JobState::Waiting | JobState::Processing) {
                continue;
            }
            match self.request_cancel(&job) {
                Ok(()) => stopped += 1,
                Err(e) => log::warn!("queue: cannot stop {job}: {e}"),
            }
        }
        stopped
    }

    fn check_live(&self, inner: &QueueInner, job: &Job) -> Result<(), QueueError> {
        if inner.contains(job.id()) && !inner.deferred_removals.contains(&job.id()) {
            Ok(())
        } else {
            Err(QueueError::UnknownJob(job.id()))
        }
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Full text of the job's checkpoint.
    pub fn read_transcript(&self, job: &Job) -> Result<String, QueueError> {
        Ok(self.shared.store.read(job)?)
    }

    /// `<file stem><suffix>.txt`, e.g. `lecture_transcript.txt`.
    pub fn default_transcript_name(&self, job: &Job) -> String {
        format!("{}{}.txt", file_stem(job), self.output.transcript_suffix)
    }

    /// Copy the job's checkpoint to `dest`.
    pub fn save_transcript(&self, job: &Job, dest: &Path) -> Result<(), QueueError> {
        self.shared.store.export(job, dest)?;
        log::info!("queue: saved {job} to {}", dest.display());
        Ok(())
    }

    /// Copy every finished transcript into `folder` as `<file stem>.txt`.
    ///
    /// Jobs whose checkpoint is missing are skipped.  Returns the number of
    /// files written.
    pub fn save_all_finished(&self, folder: &Path) -> Result<usize, QueueError> {
        let mut saved = 0;
        for job in self.jobs() {
            if job.state() != JobState::Done || !self.shared.store.exists(&job) {
                continue;
            }
            let dest = folder.join(format!("{}.txt", file_stem(&job)));
            match self.shared.store.export(&job, &dest) {
                Ok(_) => saved += 1,
                Err(e) => log::warn!("queue: cannot save {job}: {e}"),
            }
        }
        log::info!("queue: saved {saved} transcript(s) to {}", folder.display());
        Ok(saved)
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Cancel everything, give the worker the configured grace window, then
    /// remove the scratch directory.
    ///
    /// Does not wait for the worker to exit; the caller is expected to end
    /// the process right after.
    pub async fn shutdown(self) -> ShutdownReport {
        let mut cancelled = 0;
        {
            let inner = self.shared.lock();
            for job in inner.jobs.iter() {
                match job.state() {
                    JobState::Waiting => {
                        // Left in the FIFO; the worker retires it as stopped.
                        job.request_cancel();
                        cancelled += 1;
                    }
                    JobState::Processing => {
                        job.request_cancel();
                        if job.transition(JobState::Stopping).is_ok() {
                            self.shared.emit_state(job, None);
                        }
                        cancelled += 1;
                    }
                    JobState::Stopping => cancelled += 1,
                    _ => {}
                }
            }
        }
        self.shared.wake.notify_one();
        log::info!("queue: shutting down, {cancelled} job(s) cancelled");

        tokio::time::sleep(self.shared.config.shutdown_grace()).await;

        let store = self.shared.store.clone();
        let retries = self.shared.config.cleanup_retries;
        let delay = self.shared.config.cleanup_retry_delay();
        let scratch_removed =
            tokio::task::spawn_blocking(move || store.remove_dir_with_retries(retries, delay))
                .await
                .unwrap_or(false);

        ShutdownReport {
            cancelled,
            scratch_removed,
        }
    }
}

fn file_stem(job: &Job) -> String {
    job.source_path()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.display_name().to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
