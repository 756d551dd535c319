//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\transcript-queue\
//!   macOS:   ~/Library/Application Support/transcript-queue/
//!   Linux:   ~/.config/transcript-queue/
//!
//! Data dir (models + recovery scratch):
//!   Windows: %LOCALAPPDATA%\transcript-queue\
//!   macOS:   ~/Library/Application Support/transcript-queue/
//!   Linux:   ~/.local/share/transcript-queue/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Directory for GGML model files.
    pub models_dir: PathBuf,
    /// Scratch directory holding one checkpoint file per job.
    ///
    /// Wiped at startup and at shutdown.
    pub scratch_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "transcript-queue";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            models_dir: data_dir.join("models"),
            scratch_dir: data_dir.join("recovery"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
