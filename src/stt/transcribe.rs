//! Transcription parameters and segment-to-chunk batching.
//!
//! [`TranscribeParams`] carries the settings for one Whisper run over a media
//! file.  [`ChunkBatcher`] turns the stream of time-aligned segments into the
//! coarser progress chunks the queue persists: segment texts are buffered and
//! released once progress has advanced by at least `progress_step`.

use crate::audio::VadDetector;
use crate::config::{QueueConfig, SttConfig};

// ---------------------------------------------------------------------------
// SamplingStrategy
// ---------------------------------------------------------------------------

/// Mirrors `whisper_rs::SamplingStrategy` but is owned and `Clone`.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingStrategy {
    /// Greedy (single-pass) decoding.
    Greedy {
        /// Number of candidate tokens evaluated per step.  1 is fastest.
        best_of: i32,
    },
    /// Beam-search decoding.
    BeamSearch {
        /// Number of beams to maintain in parallel.
        beam_size: i32,
        /// Beam-search patience factor (≥1.0 = standard beam search).
        patience: f32,
    },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Greedy { best_of: 1 }
    }
}

impl SamplingStrategy {
    /// Greedy for `beam_size <= 1`, beam search otherwise.
    pub fn from_beam_size(beam_size: i32) -> Self {
        if beam_size <= 1 {
            Self::Greedy { best_of: 1 }
        } else {
            Self::BeamSearch {
                beam_size,
                patience: 1.0,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TranscribeParams
// ---------------------------------------------------------------------------

/// All parameters for transcribing one media file.
///
/// ```
/// use transcript_queue::stt::TranscribeParams;
///
/// let params = TranscribeParams {
///     language: "en".into(),
///     ..TranscribeParams::default()
/// };
/// assert_eq!(params.window_secs, 30);
/// ```
#[derive(Debug, Clone)]
pub struct TranscribeParams {
    /// ISO-639-1 language code, or `"auto"`.
    pub language: String,

    /// Prompt fed to every window; empty disables it.
    pub initial_prompt: String,

    /// Decoding strategy.
    pub strategy: SamplingStrategy,

    /// Number of CPU threads handed to Whisper.
    pub n_threads: i32,

    /// Seconds of audio per Whisper call.
    pub window_secs: u32,

    /// Minimum progress advance before buffered text is released.
    pub progress_step: f32,

    /// Silence filter applied before windowing; `None` keeps every sample.
    pub vad: Option<VadDetector>,
}

impl Default for TranscribeParams {
    fn default() -> Self {
        Self::from_config(&SttConfig::default(), &QueueConfig::default())
    }
}

impl TranscribeParams {
    pub fn from_config(stt: &SttConfig, queue: &QueueConfig) -> Self {
        Self {
            language: stt.language.clone(),
            initial_prompt: stt.initial_prompt.clone(),
            strategy: SamplingStrategy::from_beam_size(stt.beam_size),
            n_threads: stt.n_threads.unwrap_or_else(optimal_threads),
            window_secs: stt.window_secs.max(1),
            progress_step: queue.progress_step.clamp(0.0, 1.0),
            vad: stt.vad_filter.then(|| {
                VadDetector::new(stt.vad_threshold).with_min_silence_ms(stt.vad_min_silence_ms)
            }),
        }
    }
}

/// Returns the number of CPU threads to use for inference, capped at 8.
pub(crate) fn optimal_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8) as i32)
        .unwrap_or(4)
}

// ---------------------------------------------------------------------------
// Segment / Chunk
// ---------------------------------------------------------------------------

/// A single time-aligned text span produced by Whisper.
#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// A batch of segment text released to the progress sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Overall progress through the file, 0.0 – 1.0.
    pub fraction: f32,
    /// Text to append to the transcript verbatim.
    pub text: String,
}

// ---------------------------------------------------------------------------
// ChunkBatcher
// ---------------------------------------------------------------------------

/// Progress at which buffered text is always released, whatever the step.
const NEAR_END: f32 = 0.99;

/// Buffers segment text and releases it in progress-sized chunks.
///
/// Segment texts are trimmed and joined with single spaces.  Every chunk
/// after the first non-empty one starts with a space, so concatenating the
/// released chunks in order yields the readable transcript.
#[derive(Debug)]
pub struct ChunkBatcher {
    step: f32,
    buffer: Vec<String>,
    last_milestone: f32,
    wrote_text: bool,
}

impl ChunkBatcher {
    pub fn new(step: f32) -> Self {
        Self {
            step,
            buffer: Vec::new(),
            last_milestone: 0.0,
            wrote_text: false,
        }
    }

    /// Record a segment ending at `fraction`; returns a chunk when enough
    /// progress has accumulated.
    pub fn push(&mut self, fraction: f32, text: &str) -> Option<Chunk> {
        let fraction = fraction.clamp(0.0, 1.0);
        let text = text.trim();
        if !text.is_empty() {
            self.buffer.push(text.to_owned());
        }

        let advanced = fraction - self.last_milestone >= self.step;
        let crossed_end = fraction >= NEAR_END && self.last_milestone < NEAR_END;
        if advanced || crossed_end {
            Some(self.release(fraction))
        } else {
            None
        }
    }

    /// Release whatever is still buffered at 100 %.
    pub fn finish(&mut self) -> Option<Chunk> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.release(1.0))
        }
    }

    fn release(&mut self, fraction: f32) -> Chunk {
        let joined = self.buffer.join(" ");
        self.buffer.clear();
        self.last_milestone = fraction;

        let text = if joined.is_empty() || !self.wrote_text {
            joined
        } else {
            format!(" {joined}")
        };
        self.wrote_text |= !text.is_empty();

        Chunk { fraction, text }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
