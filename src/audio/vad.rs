//! Energy-based silence removal.
//!
//! [`VadDetector`] drops long silent stretches from a 16 kHz mono recording
//! before it is handed to Whisper.  Lectures and meetings carry minutes of
//! pauses; removing them shortens inference and keeps Whisper from inventing
//! text over silence.
//!
//! ## Algorithm
//!
//! Audio is split into 30 ms frames (480 samples @ 16 kHz).  A frame is
//! *voice* when its RMS amplitude exceeds the threshold.  A run of silent
//! frames at least `min_silence_ms` long is cut down to `SPEECH_PAD_MS` on
//! each side; shorter pauses are kept whole.  A recording with no voice frame
//! at all comes back empty.

/// Silence kept on each side of a removed pause so words are not clipped.
const SPEECH_PAD_MS: u32 = 150;

/// Samples per millisecond at 16 kHz.
const SAMPLES_PER_MS: usize = 16;

// ---------------------------------------------------------------------------
// VadDetector
// ---------------------------------------------------------------------------

/// Energy-based silence remover.
///
/// # Example
///
/// ```rust
/// use transcript_queue::audio::VadDetector;
///
/// let vad = VadDetector::new(0.01).with_min_silence_ms(500);
///
/// // 0.3 s voice, 1.2 s silence, 0.3 s voice
/// let mut audio = vec![0.5_f32; 4_800];
/// audio.extend(vec![0.0_f32; 19_200]);
/// audio.extend(vec![0.5_f32; 4_800]);
///
/// let kept = vad.remove_silence(&audio);
/// assert_eq!(kept.len(), 4_800 + 2 * 2_400 + 4_800);
/// ```
#[derive(Debug, Clone)]
pub struct VadDetector {
    /// RMS amplitude threshold; frames below this are considered silence.
    rms_threshold: f32,
    /// Frame size in samples.  480 samples = 30 ms at 16 kHz.
    frame_size: usize,
    /// Shortest pause, in samples, that gets removed.
    min_silence: usize,
    /// Silence kept on each side of a removed pause, in samples.
    pad: usize,
}

impl VadDetector {
    /// Create a [`VadDetector`] with the given RMS threshold and a 500 ms
    /// minimum pause.
    ///
    /// `rms_threshold` should be in `[0.0, 1.0]`.  `0.01` suits clean
    /// recordings; use `0.02`–`0.05` for noisy rooms.
    pub fn new(rms_threshold: f32) -> Self {
        Self {
            rms_threshold,
            frame_size: 480,
            min_silence: 500 * SAMPLES_PER_MS,
            pad: SPEECH_PAD_MS as usize * SAMPLES_PER_MS,
        }
    }

    /// Only remove pauses at least `ms` long.
    pub fn with_min_silence_ms(mut self, ms: u32) -> Self {
        self.min_silence = ms as usize * SAMPLES_PER_MS;
        self
    }

    /// RMS threshold currently in use.
    pub fn threshold(&self) -> f32 {
        self.rms_threshold
    }

    /// Returns `true` when the frame contains voice activity.
    fn is_voice_frame(&self, chunk: &[f32]) -> bool {
        if chunk.is_empty() {
            return false;
        }
        let mean_sq: f32 = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
        mean_sq.sqrt() > self.rms_threshold
    }

    /// Copy `audio` without its long pauses.
    ///
    /// # Arguments
    ///
    /// * `audio` — 16 kHz mono `f32` samples, as produced by
    ///   [`crate::audio::DecodedAudio::into_whisper_input`].
    pub fn remove_silence(&self, audio: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(audio.len());
        let mut silence_start: Option<usize> = None;
        let mut any_voice = false;

        for (i, frame) in audio.chunks(self.frame_size).enumerate() {
            let start = i * self.frame_size;
            if self.is_voice_frame(frame) {
                any_voice = true;
                if let Some(from) = silence_start.take() {
                    self.keep_pause(&audio[from..start], &mut out);
                }
                out.extend_from_slice(frame);
            } else if silence_start.is_none() {
                silence_start = Some(start);
            }
        }

        if !any_voice {
            return Vec::new();
        }
        if let Some(from) = silence_start {
            self.keep_pause(&audio[from..], &mut out);
        }
        out
    }

    fn keep_pause(&self, pause: &[f32], out: &mut Vec<f32>) {
        if pause.len() < self.min_silence {
            out.extend_from_slice(pause);
            return;
        }
        let pad = self.pad.min(pause.len() / 2);
        out.extend_from_slice(&pause[..pad]);
        out.extend_from_slice(&pause[pause.len() - pad..]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Alternating runs of voice (`true`) and silence, lengths in samples.
    fn make_signal(runs: &[(bool, usize)]) -> Vec<f32> {
        runs.iter()
            .flat_map(|&(voice, len)| std::iter::repeat(if voice { 0.5 } else { 0.0 }).take(len))
            .collect()
    }

    #[test]
    fn long_pause_is_cut_to_padding() {
        // 300 ms voice / 600 ms silence / 300 ms voice
        let audio = make_signal(&[(true, 4_800), (false, 9_600), (true, 4_800)]);
        let kept = VadDetector::new(0.01).remove_silence(&audio);
        assert_eq!(kept.len(), 4_800 + 2 * 2_400 + 4_800);
        assert!(kept[..4_800].iter().all(|&s| s == 0.5));
        assert!(kept[kept.len() - 4_800..].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn short_pause_is_kept() {
        // 300 ms silence is under the 500 ms minimum
        let audio = make_signal(&[(true, 4_800), (false, 4_800), (true, 4_800)]);
        let kept = VadDetector::new(0.01).remove_silence(&audio);
        assert_eq!(kept, audio);
    }

    #[test]
    fn min_silence_is_configurable() {
        let audio = make_signal(&[(true, 4_800), (false, 9_600), (true, 4_800)]);
        let vad = VadDetector::new(0.01).with_min_silence_ms(1_000);
        assert_eq!(vad.remove_silence(&audio).len(), audio.len());
    }

    #[test]
    fn leading_and_trailing_pauses_are_cut() {
        let audio = make_signal(&[(false, 9_600), (true, 4_800), (false, 9_600)]);
        let kept = VadDetector::new(0.01).remove_silence(&audio);
        assert_eq!(kept.len(), 2 * 2_400 + 4_800 + 2 * 2_400);
    }

    #[test]
    fn all_silence_returns_empty() {
        let audio = vec![0.0_f32; 16_000];
        assert!(VadDetector::new(0.01).remove_silence(&audio).is_empty());
    }

    #[test]
    fn no_silence_returns_full_signal() {
        let audio = vec![0.5_f32; 960];
        let kept = VadDetector::new(0.01).remove_silence(&audio);
        assert_eq!(kept.len(), audio.len());
    }

    #[test]
    fn empty_input_returns_empty() {
        assert!(VadDetector::new(0.01).remove_silence(&[]).is_empty());
    }

    #[test]
    fn threshold_getter() {
        let vad = VadDetector::new(0.05);
        assert!((vad.threshold() - 0.05).abs() < 1e-7);
    }
}
