//! Media file decoding with `symphonia`.
//!
//! [`decode_file`] reads the first audio track of any supported container
//! (`mp3`, `wav`, `m4a`/`mp4`, `mkv`) into mono `f32` samples, downmixing
//! each packet as it is decoded.  [`DecodedAudio::into_whisper_input`] then
//! resamples to the 16 kHz buffer Whisper expects.
//!
//! Both steps take a cancel check that is polled once per packet or
//! resampler chunk and abort with [`AudioError::Cancelled`].

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::resample::{resample_to_16k_cancellable, stereo_to_mono};

// ---------------------------------------------------------------------------
// AudioError
// ---------------------------------------------------------------------------

/// Errors raised while turning a media file into PCM samples.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported or unreadable media format: {0}")]
    Probe(String),

    #[error("no decodable audio track")]
    NoTrack,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("cancelled while decoding")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// DecodedAudio
// ---------------------------------------------------------------------------

/// Mono PCM at the source sample rate.
#[derive(Debug, Clone, Default)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source track before downmixing.
    pub channels: u16,
}

impl DecodedAudio {
    /// Length of the decoded audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Resample to 16 kHz, polling `cancelled` between resampler chunks.
    pub fn into_whisper_input(self, cancelled: &dyn Fn() -> bool) -> Result<Vec<f32>, AudioError> {
        resample_to_16k_cancellable(&self.samples, self.sample_rate, cancelled)
    }
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Open `path` and probe its container, using the extension as a hint.
pub(crate) fn open_format(path: &Path) -> Result<Box<dyn FormatReader>, AudioError> {
    let file = File::open(path).map_err(|source| AudioError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Probe(e.to_string()))?;

    Ok(probed.format)
}

// ---------------------------------------------------------------------------
// decode_file
// ---------------------------------------------------------------------------

/// Decode the first audio track of `path` into mono `f32` samples.
///
/// Corrupt packets are skipped; the stream ends at the first end-of-file.
/// `cancelled` is checked before every packet.
pub fn decode_file(path: &Path, cancelled: &dyn Fn() -> bool) -> Result<DecodedAudio, AudioError> {
    let mut format = open_format(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioError::NoTrack)?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(e.to_string()))?;

    let mut out = DecodedAudio {
        samples: Vec::new(),
        sample_rate: track.codec_params.sample_rate.unwrap_or(0),
        channels: track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0),
    };

    loop {
        if cancelled() {
            return Err(AudioError::Cancelled);
        }
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                let channels = spec.channels.count() as u16;
                if channels > 1 {
                    out.samples.extend(stereo_to_mono(buf.samples(), channels));
                } else {
                    out.samples.extend_from_slice(buf.samples());
                }
                out.sample_rate = spec.rate;
                out.channels = channels;
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                log::debug!("audio: skipping corrupt packet: {msg}");
            }
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        }
    }

    if out.sample_rate == 0 {
        return Err(AudioError::NoTrack);
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
