//! Engine adapter contract and the lazily constructed engine singleton.
//!
//! # Overview
//!
//! [`TranscriptionEngine`] is the boundary between the job queue and the
//! opaque speech-to-text algorithm.  It is object-safe and `Send + Sync` so
//! it can be held behind an `Arc<dyn TranscriptionEngine>` and driven from a
//! blocking worker thread.
//!
//! Cancellation is cooperative.  The engine polls
//! [`ProgressSink::is_cancelled`] at least once per chunk it produces, and
//! stops as soon as it sees `true` or [`ProgressSink::on_progress`] returns
//! [`ControlFlow::Break`].  Either way it returns
//! `Ok(EngineOutcome::Cancelled)`: cancellation is an outcome, not an error.
//!
//! [`LazyEngine`] owns the engine for the lifetime of the process: it is
//! built through an [`EngineLoader`] on first use and never torn down.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unrecoverable engine failures.  Each one fails only the current job.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The GGML model file was not found at the given path.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The engine could not be initialised.
    #[error("Engine initialisation failed: {0}")]
    ContextInit(String),

    /// The media file could not be turned into audio samples.
    #[error("Cannot read audio: {0}")]
    Decode(String),

    /// An error occurred during inference.
    #[error("Transcription error: {0}")]
    Transcription(String),
}

impl From<crate::audio::AudioError> for EngineError {
    fn from(e: crate::audio::AudioError) -> Self {
        EngineError::Decode(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// EngineOutcome / ProgressSink
// ---------------------------------------------------------------------------

/// How a transcription call ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Every chunk was delivered.
    Completed,
    /// The engine stopped early because cancellation was observed.
    Cancelled,
}

/// Receiver of engine output, supplied by the caller of
/// [`TranscriptionEngine::transcribe`].
pub trait ProgressSink {
    /// Deliver one chunk of text together with the overall progress
    /// (0.0 – 1.0).  `Break` asks the engine to stop immediately.
    fn on_progress(&mut self, fraction: f32, chunk: &str) -> ControlFlow<()>;

    /// `true` once the caller wants the engine to stop.
    fn is_cancelled(&self) -> bool;
}

// ---------------------------------------------------------------------------
// TranscriptionEngine trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for transcription engines.
///
/// # Contract
///
/// - Calls [`ProgressSink::is_cancelled`] at least once per emitted chunk.
/// - Returns `Ok(EngineOutcome::Cancelled)` promptly after observing
///   cancellation or a `Break` from [`ProgressSink::on_progress`].
/// - Chunks are emitted in transcript order; fractions never decrease.
pub trait TranscriptionEngine: Send + Sync {
    fn transcribe(
        &self,
        source: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<EngineOutcome, EngineError>;
}

// Compile-time assertion: Box<dyn TranscriptionEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn TranscriptionEngine>) {}
};

// ---------------------------------------------------------------------------
// EngineLoader / LazyEngine
// ---------------------------------------------------------------------------

/// Builds the engine the first time a job needs it.
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn TranscriptionEngine>, EngineError>;
}

impl<F> EngineLoader for F
where
    F: Fn() -> Result<Arc<dyn TranscriptionEngine>, EngineError> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn TranscriptionEngine>, EngineError> {
        self()
    }
}

/// The engine singleton owned by the queue worker.
///
/// Constructed on first use and kept until the process exits.  A failed load
/// is not cached, so the next job retries it.
pub struct LazyEngine {
    loader: Box<dyn EngineLoader>,
    engine: Mutex<Option<Arc<dyn TranscriptionEngine>>>,
}

impl LazyEngine {
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            engine: Mutex::new(None),
        }
    }

    /// Wrap an already-built engine.
    pub fn ready(engine: Arc<dyn TranscriptionEngine>) -> Self {
        let slot = Arc::clone(&engine);
        Self {
            loader: Box::new(move || Ok::<_, EngineError>(Arc::clone(&slot))),
            engine: Mutex::new(Some(engine)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Return the engine, loading it if this is the first call.
    pub fn get_or_load(&self) -> Result<Arc<dyn TranscriptionEngine>, EngineError> {
        let mut slot = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }

        log::info!("stt: loading engine (one-time setup)");
        let engine = self.loader.load()?;
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }
}

impl std::fmt::Debug for LazyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEngine")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
