//! Media duration probe and display formatting.
//!
//! [`probe_duration`] reads container metadata only; it never decodes audio
//! unless the container omits the frame count, in which case packet
//! durations are summed instead.

use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::units::TimeBase;

use super::decode::open_format;

/// Duration of the media file at `path` in seconds.
///
/// Returns `0.0` for missing, unreadable or unsupported files.  Never fails.
pub fn probe_duration(path: &Path) -> f64 {
    if !path.exists() {
        return 0.0;
    }

    let mut format = match open_format(path) {
        Ok(format) => format,
        Err(e) => {
            log::debug!("audio: cannot read duration of {}: {e}", path.display());
            return 0.0;
        }
    };

    let Some(track) = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    else {
        return 0.0;
    };

    let params = &track.codec_params;
    let track_id = track.id;
    let time_base = params
        .time_base
        .or_else(|| {
            params
                .sample_rate
                .filter(|&r| r > 0)
                .map(|rate| TimeBase::new(1, rate))
        });

    if let Some(n_frames) = params.n_frames {
        if let Some(rate) = params.sample_rate.filter(|&r| r > 0) {
            return n_frames as f64 / rate as f64;
        }
        if let Some(tb) = time_base {
            return seconds(tb, n_frames);
        }
    }

    // Frame count missing from the header: sum packet durations.
    let Some(tb) = time_base else {
        return 0.0;
    };
    let mut total: u64 = 0;
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() == track_id {
            total = total.saturating_add(packet.dur);
        }
    }
    seconds(tb, total)
}

fn seconds(tb: TimeBase, ts: u64) -> f64 {
    let time = tb.calc_time(ts);
    time.seconds as f64 + time.frac
}

/// Render `secs` as `MM:SS`, or `H:MM:SS` from one hour upwards.
///
/// ```
/// use transcript_queue::audio::format_duration;
///
/// assert_eq!(format_duration(0.0), "00:00");
/// assert_eq!(format_duration(225.0), "03:45");
/// assert_eq!(format_duration(3_725.0), "1:02:05");
/// ```
pub fn format_duration(secs: f64) -> String {
    if !secs.is_finite() || secs <= 0.0 {
        return "00:00".into();
    }
    let total = secs as u64;
    let (m, s) = (total / 60, total % 60);
    let (h, m) = (m / 60, m % 60);

    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
