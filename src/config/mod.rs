//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the STT engine,
//! the job queue and transcript output, `AppPaths` for cross-platform data
//! directories, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, OutputConfig, QueueConfig, SttConfig, DEFAULT_INITIAL_PROMPT,
    SUPPORTED_EXTENSIONS,
};
