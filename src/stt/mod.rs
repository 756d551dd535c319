//! Speech-to-text engine boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │             TranscriptionEngine (trait)                  │
//! │                                                          │
//! │   ┌──────────────┐   first use   ┌──────────────────┐    │
//! │   │  LazyEngine  │──────────────▶│  EngineLoader    │    │
//! │   │ - cached Arc │               │ (WhisperLoader)  │    │
//! │   └──────┬───────┘               └──────────────────┘    │
//! │          │                                               │
//! │          ▼                                               │
//! │   ┌────────────────────────────┐   ┌────────────────┐    │
//! │   │ transcribe(path, sink)     │──▶│ ProgressSink   │    │
//! │   │ decode → windows → batcher │   │ chunk / cancel │    │
//! │   └────────────────────────────┘   └────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use transcript_queue::stt::{LazyEngine, TranscribeParams, WhisperLoader};
//!
//! let loader = WhisperLoader::new("models/ggml-medium.bin", TranscribeParams::default());
//! let lazy = LazyEngine::new(loader);
//!
//! // Nothing is loaded until the first job asks for the engine.
//! assert!(!lazy.is_loaded());
//! ```

pub mod engine;
pub mod transcribe;
pub mod whisper;

#[cfg(test)]
pub mod testing;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use engine::{
    EngineError, EngineLoader, EngineOutcome, LazyEngine, ProgressSink, TranscriptionEngine,
};
pub use transcribe::{Chunk, ChunkBatcher, SamplingStrategy, Segment, TranscribeParams};
pub use whisper::{WhisperEngine, WhisperLoader};
