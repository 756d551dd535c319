//! Audio input for the transcription engine.
//!
//! # Pipeline
//!
//! ```text
//! media file → decode_file (symphonia, stereo_to_mono per packet)
//!            → resample_to_16k (rubato) → VadDetector::remove_silence
//!            → 16 kHz mono f32 → WhisperEngine
//! ```
//!
//! [`probe_duration`] is the cheap metadata-only path used when a job is added
//! to the queue; it never fails and reports `0.0` for anything unreadable.

pub mod decode;
pub mod duration;
pub mod resample;
pub mod vad;

pub use decode::{decode_file, AudioError, DecodedAudio};
pub use duration::{format_duration, probe_duration};
pub use resample::{
    resample_to_16k, resample_to_16k_cancellable, stereo_to_mono, WHISPER_SAMPLE_RATE,
};
pub use vad::VadDetector;
