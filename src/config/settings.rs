//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Default prompt nudging Whisper towards colloquial Jordanian Arabic with
/// English technical terms.
pub const DEFAULT_INITIAL_PROMPT: &str = "هذا التسجيل باللهجة الأردنية العامية. \
يرجى كتابة النص كما هو مسموع تماماً. \
المصطلحات التقنية تكتب بالإنجليزية.";

/// Media file extensions accepted by the front end and the duration probe.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "mp4", "wav", "m4a", "mkv"];

// ---------------------------------------------------------------------------
// SttConfig
// ---------------------------------------------------------------------------

/// Settings for the Whisper STT engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// GGML model file stem under the models directory (e.g. `"ggml-medium"`).
    pub model: String,
    /// Explicit model file; overrides `model` when set.
    pub model_path: Option<PathBuf>,
    /// Speech language as an ISO-639-1 code, or `"auto"`.
    pub language: String,
    /// Prompt fed to Whisper before the first window.  Empty disables it.
    pub initial_prompt: String,
    /// Beam width.  `1` selects greedy decoding.
    pub beam_size: i32,
    /// Length of each audio window handed to Whisper, in seconds.
    ///
    /// Cancellation is polled at least once per window.
    pub window_secs: u32,
    /// Inference threads; `None` picks a value from the CPU count.
    pub n_threads: Option<i32>,
    /// Remove long pauses before transcribing.
    pub vad_filter: bool,
    /// RMS amplitude below which a 30 ms frame counts as silence.
    pub vad_threshold: f32,
    /// Shortest pause the silence filter removes, in milliseconds.
    pub vad_min_silence_ms: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "ggml-medium".into(),
            model_path: None,
            language: "ar".into(),
            initial_prompt: DEFAULT_INITIAL_PROMPT.into(),
            beam_size: 1,
            window_secs: 30,
            n_threads: None,
            vad_filter: true,
            vad_threshold: 0.01,
            vad_min_silence_ms: 500,
        }
    }
}

impl SttConfig {
    /// Resolve the model file: `model_path` if set, otherwise
    /// `<models_dir>/<model>.bin`.
    pub fn resolve_model_path(&self, paths: &AppPaths) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| paths.models_dir.join(format!("{}.bin", self.model)))
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Worker, checkpoint and shutdown tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Minimum progress advance (0.0 – 1.0) before buffered segment text is
    /// flushed to the checkpoint as one chunk.
    pub progress_step: f32,
    /// Pause after an internal queue fault before the worker loops again.
    pub fault_backoff_ms: u64,
    /// Time given to the worker to observe cancellations on shutdown.
    pub shutdown_grace_ms: u64,
    /// Attempts at removing the scratch directory on shutdown.
    pub cleanup_retries: u32,
    /// Pause between scratch-directory removal attempts.
    pub cleanup_retry_delay_ms: u64,
    /// Overrides [`AppPaths::scratch_dir`].
    pub scratch_dir: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            progress_step: 0.01,
            fault_backoff_ms: 1_000,
            shutdown_grace_ms: 500,
            cleanup_retries: 20,
            cleanup_retry_delay_ms: 100,
            scratch_dir: None,
        }
    }
}

impl QueueConfig {
    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn cleanup_retry_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_retry_delay_ms)
    }

    /// The configured scratch directory, or the platform default.
    pub fn resolve_scratch_dir(&self, paths: &AppPaths) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| paths.scratch_dir.clone())
    }
}

// ---------------------------------------------------------------------------
// OutputConfig
// ---------------------------------------------------------------------------

/// Naming of saved transcripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Appended to the media file stem for single-file saves
    /// (`talk.mp3` → `talk_transcript.txt`).
    pub transcript_suffix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            transcript_suffix: "_transcript".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use transcript_queue::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// STT engine settings.
    pub stt: SttConfig,
    /// Queue / worker settings.
    pub queue: QueueConfig,
    /// Transcript naming.
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
