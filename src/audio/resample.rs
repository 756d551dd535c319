//! Audio resampling and channel mixing utilities.
//!
//! The Whisper STT engine requires **16 kHz mono `f32`** audio.  This module
//! provides the two conversion steps:
//!
//! 1. [`stereo_to_mono`] — downmix any number of interleaved channels to mono.
//! 2. [`resample_to_16k`] — resample from any source rate to 16 000 Hz with a
//!    band-limited sinc resampler (`rubato`).

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::decode::AudioError;

/// Sample rate Whisper consumes.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Frames fed to the resampler per call.  Long recordings are processed in
/// slices of this size so memory stays proportional to the output.
const RESAMPLE_CHUNK: usize = 8_192;

// ---------------------------------------------------------------------------
// stereo_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// ```rust
/// use transcript_queue::audio::stereo_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = stereo_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample_to_16k
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `source_rate` Hz to 16 000 Hz.
///
/// * `source_rate == 16_000` returns the input unchanged.
/// * Empty input returns an empty vector.
///
/// The output length is `ceil(samples.len() * 16_000 / source_rate)`.
pub fn resample_to_16k(samples: &[f32], source_rate: u32) -> Result<Vec<f32>, AudioError> {
    resample_to_16k_cancellable(samples, source_rate, &|| false)
}

/// [`resample_to_16k`] that polls `cancelled` before every resampler chunk
/// and returns [`AudioError::Cancelled`] once it reports `true`.
pub fn resample_to_16k_cancellable(
    samples: &[f32],
    source_rate: u32,
    cancelled: &dyn Fn() -> bool,
) -> Result<Vec<f32>, AudioError> {
    if source_rate == WHISPER_SAMPLE_RATE {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    if source_rate == 0 {
        return Err(AudioError::Resample("source sample rate is 0".into()));
    }

    let ratio = WHISPER_SAMPLE_RATE as f64 / source_rate as f64;
    let expected_len = (samples.len() as f64 * ratio).ceil() as usize;

    // Downsampling needs the stronger anti-aliasing setup.
    let (sinc_len, interpolation) = if ratio < 1.0 {
        (256, SincInterpolationType::Cubic)
    } else {
        (128, SincInterpolationType::Linear)
    };

    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: 0.95,
        interpolation,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    let mut output = Vec::with_capacity(expected_len + RESAMPLE_CHUNK);
    let mut chunk = vec![0.0_f32; RESAMPLE_CHUNK];

    // One extra all-zero chunk flushes the filter delay.
    let n_chunks = samples.len().div_ceil(RESAMPLE_CHUNK) + 1;
    for i in 0..n_chunks {
        if cancelled() {
            return Err(AudioError::Cancelled);
        }
        let start = (i * RESAMPLE_CHUNK).min(samples.len());
        let end = (start + RESAMPLE_CHUNK).min(samples.len());
        let filled = end - start;

        chunk[..filled].copy_from_slice(&samples[start..end]);
        chunk[filled..].fill(0.0);

        let waves_out = resampler
            .process(&[chunk.as_slice()], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if let Some(channel) = waves_out.into_iter().next() {
            output.extend(channel);
        }

        if output.len() >= expected_len && end == samples.len() {
            break;
        }
    }

    output.truncate(expected_len);
    Ok(output)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
