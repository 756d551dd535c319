//! The single serial worker.
//!
//! # Job flow
//!
//! ```text
//! pending.pop_front()                                  [queue lock]
//!   ├─ cancel flag already set → Stopped (no engine call, no checkpoint)
//!   └─ Waiting → Processing, current = job
//!
//! CheckpointStore::open (truncate)
//! spawn_blocking(LazyEngine::get_or_load → engine.transcribe(path, sink))
//!   sink.on_progress: cancel? → Break
//!                     append + sync → Job::record_chunk → Progress event
//!
//! outcome                                              [queue lock]
//!   ├─ Cancelled, or Completed after cancel → delete checkpoint, Stopped
//!   ├─ EngineError / panic / checkpoint I/O  → delete checkpoint, Error
//!   └─ Completed                             → keep checkpoint, Done
//!   then: deferred removal (once) → BatchProgress
//! ```
//!
//! Lock order is always queue lock, then job lock.  Every state change of a
//! job is made and announced while holding the queue lock, so events for one
//! job reach the observer in the order the changes happened.
//!
//! The worker only stops when the runtime does.  A fault in its own
//! bookkeeping is logged and followed by a fixed back-off.

use std::collections::{HashSet, VecDeque};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::config::QueueConfig;
use crate::stt::{EngineError, EngineOutcome, LazyEngine, ProgressSink};

use super::checkpoint::{CheckpointStore, CheckpointWriter};
use super::error::{CheckpointError, QueueError};
use super::events::{emit, EventSender, QueueEvent};
use super::progress::BatchProgress;
use super::state::{Job, JobId, JobState};

/// Detail attached to the processing state while the engine loads.
pub const LOADING_MODEL_DETAIL: &str = "Loading model (one-time setup)";

// ---------------------------------------------------------------------------
// Shared queue state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct QueueInner {
    /// FIFO of jobs in `Waiting`.  A job appears here at most once.
    pub(crate) pending: VecDeque<Arc<Job>>,
    /// The job the worker is running, if any.
    pub(crate) current: Option<Arc<Job>>,
    /// Every live job, in the order it was added.
    pub(crate) jobs: Vec<Arc<Job>>,
    /// Jobs removed while active; the worker drops them once terminal.
    pub(crate) deferred_removals: HashSet<JobId>,
}

impl QueueInner {
    pub(crate) fn contains(&self, id: JobId) -> bool {
        self.jobs.iter().any(|j| j.id() == id)
    }
}

/// State shared by the [`JobQueue`](super::JobQueue) handle and the worker.
#[derive(Debug)]
pub(crate) struct Shared {
    inner: Mutex<QueueInner>,
    pub(crate) wake: Notify,
    pub(crate) events: EventSender,
    pub(crate) store: CheckpointStore,
    pub(crate) config: QueueConfig,
}

impl Shared {
    pub(crate) fn new(store: CheckpointStore, config: QueueConfig, events: EventSender) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            wake: Notify::new(),
            events,
            store,
            config,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        emit(&self.events, event);
    }

    pub(crate) fn emit_state(&self, job: &Job, detail: Option<String>) {
        self.emit(QueueEvent::StateChanged {
            job: job.id(),
            state: job.state(),
            detail,
        });
    }

    pub(crate) fn emit_batch(&self, inner: &QueueInner) {
        self.emit(BatchProgress::from_jobs(&inner.jobs).into());
    }

    /// Drop `job` from the live set and delete its checkpoint.
    pub(crate) fn remove_now(&self, inner: &mut QueueInner, job: &Job) {
        let id = job.id();
        inner.pending.retain(|j| j.id() != id);
        inner.jobs.retain(|j| j.id() != id);
        if let Err(e) = self.store.delete(job) {
            log::warn!("queue: {e}");
        }
        log::info!("queue: removed {job}");
        self.emit(QueueEvent::JobRemoved { job: id });
        self.emit_batch(inner);
    }

    /// Commit a terminal state and run whatever depends on it.
    fn finish(
        &self,
        inner: &mut QueueInner,
        job: &Job,
        state: JobState,
        detail: Option<String>,
    ) -> Result<(), QueueError> {
        job.finish(state, detail.as_deref())?;
        self.emit_state(job, detail);

        if inner.deferred_removals.remove(&job.id()) {
            self.remove_now(inner, job);
        } else {
            self.emit_batch(inner);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

/// Run jobs one at a time, forever.
pub(crate) async fn run_worker(shared: Arc<Shared>, engine: Arc<LazyEngine>) {
    log::info!("worker: started");
    loop {
        match step(&shared, &engine).await {
            Ok(true) => {}
            Ok(false) => shared.wake.notified().await,
            Err(e) => {
                log::error!("worker: internal fault: {e}");
                tokio::time::sleep(shared.config.fault_backoff()).await;
            }
        }
    }
}

/// Process the next pending job.  `Ok(false)` when the queue is empty.
async fn step(shared: &Arc<Shared>, engine: &Arc<LazyEngine>) -> Result<bool, QueueError> {
    let job = {
        let mut inner = shared.lock();
        let Some(job) = inner.pending.pop_front() else {
            return Ok(false);
        };

        if job.is_cancel_requested() {
            log::info!("worker: {job} cancelled before start");
            shared.finish(&mut inner, &job, JobState::Stopped, None)?;
            return Ok(true);
        }

        job.transition(JobState::Processing)?;
        inner.current = Some(Arc::clone(&job));
        shared.emit_state(&job, None);
        job
    };

    log::info!("worker: processing {job}");
    let terminal = run_job(shared, engine, &job).await;

    let mut inner = shared.lock();
    inner.current = None;
    match terminal.state {
        JobState::Done => log::info!("worker: {job} done in {:.1?}", job.elapsed()),
        JobState::Stopped => log::info!("worker: {job} stopped"),
        _ => log::warn!(
            "worker: {job} failed: {}",
            terminal.detail.as_deref().unwrap_or_default()
        ),
    }
    shared.finish(&mut inner, &job, terminal.state, terminal.detail)?;
    Ok(true)
}

struct Terminal {
    state: JobState,
    detail: Option<String>,
}

impl Terminal {
    fn done() -> Self {
        Self {
            state: JobState::Done,
            detail: None,
        }
    }

    fn stopped() -> Self {
        Self {
            state: JobState::Stopped,
            detail: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            state: JobState::Error,
            detail: Some(message.into()),
        }
    }
}

/// Drive the engine for one job and decide its terminal state.  Deletes the
/// checkpoint for every outcome except success.
async fn run_job(shared: &Arc<Shared>, engine: &Arc<LazyEngine>, job: &Arc<Job>) -> Terminal {
    let terminal = if job.is_cancel_requested() {
        Terminal::stopped()
    } else {
        match shared.store.open(job) {
            Ok(writer) => invoke_engine(shared, engine, job, writer).await,
            Err(e) => Terminal::failed(e.to_string()),
        }
    };

    if terminal.state != JobState::Done {
        if let Err(e) = shared.store.delete(job) {
            log::warn!("worker: {e}");
        }
    }
    terminal
}

async fn invoke_engine(
    shared: &Arc<Shared>,
    engine: &Arc<LazyEngine>,
    job: &Arc<Job>,
    writer: CheckpointWriter,
) -> Terminal {
    if !engine.is_loaded() {
        let inner = shared.lock();
        if job.state() == JobState::Processing {
            shared.emit_state(job, Some(LOADING_MODEL_DETAIL.to_owned()));
        }
        drop(inner);
    }

    let lazy = Arc::clone(engine);
    let source = job.source_path().to_path_buf();
    let mut sink = CheckpointSink {
        job: Arc::clone(job),
        writer,
        events: shared.events.clone(),
        fault: None,
    };
    let result = tokio::task::spawn_blocking(move || -> Result<_, EngineError> {
        let engine = lazy.get_or_load()?;
        let outcome = engine.transcribe(&source, &mut sink)?;
        Ok((outcome, sink.fault))
    })
    .await;

    match result {
        Ok(Ok((_, Some(fault)))) => Terminal::failed(fault.to_string()),
        Ok(Ok((EngineOutcome::Cancelled, None))) => Terminal::stopped(),
        Ok(Ok((EngineOutcome::Completed, None))) if job.is_cancel_requested() => {
            Terminal::stopped()
        }
        Ok(Ok((EngineOutcome::Completed, None))) => Terminal::done(),
        Ok(Err(e)) => Terminal::failed(e.to_string()),
        Err(e) => Terminal::failed(format!("engine task panicked: {e}")),
    }
}

// ---------------------------------------------------------------------------
// CheckpointSink
// ---------------------------------------------------------------------------

/// Progress sink that persists each chunk before announcing it.
struct CheckpointSink {
    job: Arc<Job>,
    writer: CheckpointWriter,
    events: EventSender,
    fault: Option<CheckpointError>,
}

impl ProgressSink for CheckpointSink {
    fn on_progress(&mut self, fraction: f32, chunk: &str) -> ControlFlow<()> {
        if self.is_cancelled() {
            return ControlFlow::Break(());
        }
        if let Err(e) = self.writer.append(chunk) {
            log::warn!("worker: {e}");
            self.fault = Some(e);
            return ControlFlow::Break(());
        }

        let fraction = self.job.record_chunk(fraction, chunk);
        emit(
            &self.events,
            QueueEvent::Progress {
                job: self.job.id(),
                fraction,
                chunk: chunk.to_owned(),
            },
        );
        ControlFlow::Continue(())
    }

    fn is_cancelled(&self) -> bool {
        self.fault.is_some() || self.job.is_cancel_requested()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
