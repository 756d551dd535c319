//! Serial transcription job queue with cooperative cancellation, per-job
//! crash-recovery checkpoints and batch progress reporting.
//!
//! - [`audio`]: media decoding, resampling and duration probing.
//! - [`config`]: settings and platform paths.
//! - [`queue`]: jobs, the worker, checkpoints and events.
//! - [`stt`]: the engine boundary and the Whisper engine.

pub mod audio;
pub mod config;
pub mod queue;
pub mod stt;
