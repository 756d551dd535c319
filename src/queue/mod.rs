//! Serial transcription job queue.
//!
//! # Architecture
//!
//! ```text
//! front end (any thread)                      worker (one tokio task)
//! ──────────────────────                      ───────────────────────
//! JobQueue::add / submit ──▶ pending FIFO ──▶ pop → Processing
//! JobQueue::request_cancel ─▶ cancel flag ──▶ ProgressSink::is_cancelled
//!                                              │
//!                                              ├─ spawn_blocking(engine.transcribe)
//!                                              │     chunk → CheckpointStore (sync)
//!                                              │           → QueueEvent::Progress
//!                                              └─ Done | Error | Stopped
//!                                                    → deferred removal
//!                                                    → QueueEvent::BatchProgress
//! observer tick ◀── EventReceiver::try_recv ◀── unbounded mpsc
//! ```
//!
//! Exactly one job is processed at a time.  Jobs run in submission order.
//! Cancellation is cooperative: a waiting job is pulled from the FIFO at
//! once, a processing job stops the next time the engine polls the flag.

pub mod checkpoint;
pub mod error;
pub mod events;
pub mod manager;
pub mod progress;
pub mod runner;
pub mod state;

#[cfg(test)]
mod scenarios;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use checkpoint::{CheckpointStore, CheckpointWriter};
pub use error::{CheckpointError, QueueError};
pub use events::{EventReceiver, EventSender, QueueEvent};
pub use manager::{JobQueue, Removal, ShutdownReport};
pub use progress::BatchProgress;
pub use runner::LOADING_MODEL_DETAIL;
pub use state::{Job, JobId, JobState, Stopwatch};
