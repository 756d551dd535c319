//! Production engine backed by `whisper_rs`.
//!
//! [`WhisperEngine`] wraps a `WhisperContext` loaded once from a GGML model
//! file.  A media file is decoded to 16 kHz mono, long pauses are removed,
//! and the rest is fed to Whisper in windows of
//! [`TranscribeParams::window_secs`].  Cancellation is polled per decoded
//! packet and resampler chunk, then before each window and after each
//! segment, so latency is bounded by one window of inference rather than by
//! the length of the recording.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use whisper_rs::{FullParams, WhisperContext, WhisperContextParameters};

use crate::audio::{decode_file, AudioError, WHISPER_SAMPLE_RATE};
use crate::stt::engine::{
    EngineError, EngineLoader, EngineOutcome, ProgressSink, TranscriptionEngine,
};
use crate::stt::transcribe::{ChunkBatcher, SamplingStrategy, Segment, TranscribeParams};

const MIN_WINDOW_SAMPLES: usize = WHISPER_SAMPLE_RATE as usize;

/// Samples per Whisper timestamp unit (10 ms).
const SAMPLES_PER_CENTISECOND: u64 = WHISPER_SAMPLE_RATE as u64 / 100;

// ---------------------------------------------------------------------------
// WhisperEngine
// ---------------------------------------------------------------------------

pub struct WhisperEngine {
    ctx: WhisperContext,
    params: TranscribeParams,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// SAFETY: WhisperContext is Send+Sync as declared by whisper-rs; the model
// weights are read-only after loading and every call creates its own state.
unsafe impl Send for WhisperEngine {}
unsafe impl Sync for WhisperEngine {}

impl WhisperEngine {
    /// Load a GGML model from `model_path`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ModelNotFound`] — `model_path` does not exist.
    /// - [`EngineError::ContextInit`]  — whisper-rs failed to load the file.
    pub fn load(model_path: impl AsRef<Path>, params: TranscribeParams) -> Result<Self, EngineError> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(EngineError::ModelNotFound(path.display().to_string()));
        }

        let path_str = path.to_str().ok_or_else(|| {
            EngineError::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                path.display()
            ))
        })?;

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| EngineError::ContextInit(e.to_string()))?;

        log::info!("stt: whisper model loaded from {}", path.display());
        Ok(Self { ctx, params })
    }

    fn full_params(&self) -> FullParams<'_, '_> {
        use whisper_rs::SamplingStrategy as WS;
        let ws = match self.params.strategy {
            SamplingStrategy::Greedy { best_of } => WS::Greedy { best_of },
            SamplingStrategy::BeamSearch { beam_size, patience } => {
                WS::BeamSearch { beam_size, patience }
            }
        };

        let mut fp = FullParams::new(ws);
        let lang = if self.params.language == "auto" {
            None
        } else {
            Some(self.params.language.as_str())
        };
        fp.set_language(lang);
        fp.set_n_threads(self.params.n_threads);
        if !self.params.initial_prompt.is_empty() {
            fp.set_initial_prompt(&self.params.initial_prompt);
        }
        // Each window is decoded independently, as with
        // condition-on-previous-text disabled.
        fp.set_no_context(true);
        fp.set_print_progress(false);
        fp.set_print_realtime(false);
        fp.set_print_special(false);
        fp.set_print_timestamps(false);
        fp
    }
}

impl TranscriptionEngine for WhisperEngine {
    fn transcribe(
        &self,
        source: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<EngineOutcome, EngineError> {
        let decoded = {
            let cancelled = || sink.is_cancelled();
            decode_file(source, &cancelled).and_then(|a| a.into_whisper_input(&cancelled))
        };
        let audio = match decoded {
            Ok(audio) => audio,
            Err(AudioError::Cancelled) => return Ok(EngineOutcome::Cancelled),
            Err(e) => return Err(e.into()),
        };
        let decoded_len = audio.len();
        let audio = match &self.params.vad {
            Some(vad) => vad.remove_silence(&audio),
            None => audio,
        };
        let total = audio.len();
        log::debug!(
            "stt: {} decoded, {:.1}s of audio, {:.1}s after silence removal",
            source.display(),
            decoded_len as f64 / WHISPER_SAMPLE_RATE as f64,
            total as f64 / WHISPER_SAMPLE_RATE as f64
        );

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| EngineError::ContextInit(e.to_string()))?;

        let window_len = self.params.window_secs as usize * WHISPER_SAMPLE_RATE as usize;
        let mut batcher = ChunkBatcher::new(self.params.progress_step);

        let mut start = 0;
        while start < total {
            if sink.is_cancelled() {
                return Ok(EngineOutcome::Cancelled);
            }
            let end = (start + window_len).min(total);
            let window = pad_window(&audio[start..end]);

            state
                .full(self.full_params(), &window)
                .map_err(|e| EngineError::Transcription(e.to_string()))?;
            let n_segments = state
                .full_n_segments()
                .map_err(|e| EngineError::Transcription(e.to_string()))?;

            let offset_ms = start as u64 * 1_000 / WHISPER_SAMPLE_RATE as u64;
            let mut segments = Vec::with_capacity(n_segments.max(0) as usize);
            for i in 0..n_segments {
                let text = state
                    .full_get_segment_text(i)
                    .map_err(|e| EngineError::Transcription(format!("segment {i}: {e}")))?;
                // Timestamps are in centiseconds.
                let t0 = state.full_get_segment_t0(i).unwrap_or(0).max(0) as u64;
                let t1 = state.full_get_segment_t1(i).unwrap_or(0).max(0) as u64;
                segments.push(Segment {
                    text,
                    start_ms: offset_ms + t0 * 10,
                    end_ms: offset_ms + t1 * 10,
                });
            }

            for segment in segments {
                if sink.is_cancelled() {
                    return Ok(EngineOutcome::Cancelled);
                }
                let end_sample =
                    (segment.end_ms / 10 * SAMPLES_PER_CENTISECOND).min(end as u64);
                let fraction = end_sample as f32 / total as f32;

                if let Some(chunk) = batcher.push(fraction, &segment.text) {
                    if sink.on_progress(chunk.fraction, &chunk.text).is_break() {
                        return Ok(EngineOutcome::Cancelled);
                    }
                }
            }
            start = end;
        }

        if sink.is_cancelled() {
            return Ok(EngineOutcome::Cancelled);
        }
        if let Some(chunk) = batcher.finish() {
            if sink.on_progress(chunk.fraction, &chunk.text).is_break() {
                return Ok(EngineOutcome::Cancelled);
            }
        }
        Ok(EngineOutcome::Completed)
    }
}

/// whisper.cpp rejects windows shorter than one second; pad the tail with
/// silence.
fn pad_window(window: &[f32]) -> std::borrow::Cow<'_, [f32]> {
    if window.len() >= MIN_WINDOW_SAMPLES {
        return std::borrow::Cow::Borrowed(window);
    }
    let mut buf = window.to_vec();
    buf.resize(MIN_WINDOW_SAMPLES, 0.0);
    std::borrow::Cow::Owned(buf)
}

// ---------------------------------------------------------------------------
// WhisperLoader
// ---------------------------------------------------------------------------

/// [`EngineLoader`] that builds a [`WhisperEngine`] on first use.
#[derive(Debug, Clone)]
pub struct WhisperLoader {
    pub model_path: PathBuf,
    pub params: TranscribeParams,
}

impl WhisperLoader {
    pub fn new(model_path: impl Into<PathBuf>, params: TranscribeParams) -> Self {
        Self {
            model_path: model_path.into(),
            params,
        }
    }
}

impl EngineLoader for WhisperLoader {
    fn load(&self) -> Result<Arc<dyn TranscriptionEngine>, EngineError> {
        let engine = WhisperEngine::load(&self.model_path, self.params.clone())?;
        Ok(Arc::new(engine))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
