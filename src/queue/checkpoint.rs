//! Per-job recovery files.
//!
//! Every job being processed owns one text file in the scratch directory.
//! Chunks are appended and synced to disk as they arrive, so a crash loses at
//! most the chunk being written.  Files are named from the job's display
//! name with everything but letters, digits and spaces stripped, plus the job
//! id so two jobs for files with the same name never share a checkpoint:
//!
//! ```text
//! <scratch>/recovery_lecture 1mp3_7.txt
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::CheckpointError;
use super::state::Job;

/// Filesystem-safe form of a display name.
pub(crate) fn safe_name(display_name: &str) -> String {
    let kept: String = display_name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();
    let trimmed = kept.trim_end();
    if trimmed.is_empty() {
        "job".to_owned()
    } else {
        trimmed.to_owned()
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// The scratch directory holding every job's checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Does not touch the filesystem; call [`purge_all`](Self::purge_all)
    /// before first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, job: &Job) -> PathBuf {
        self.dir.join(format!(
            "recovery_{}_{}.txt",
            safe_name(job.display_name()),
            job.id().get()
        ))
    }

    pub fn exists(&self, job: &Job) -> bool {
        self.path_for(job).is_file()
    }

    /// Create the scratch directory and delete everything left in it by a
    /// previous run.  Returns the number of entries removed.
    pub fn purge_all(&self) -> Result<usize, CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|e| CheckpointError::io(&self.dir, e))?;

        let mut removed = 0;
        let entries = fs::read_dir(&self.dir).map_err(|e| CheckpointError::io(&self.dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("checkpoint: cannot purge {}: {e}", path.display()),
            }
        }
        if removed > 0 {
            log::info!("checkpoint: purged {removed} stale file(s) from {}", self.dir.display());
        }
        Ok(removed)
    }

    /// Create or truncate the job's checkpoint.
    pub fn open(&self, job: &Job) -> Result<CheckpointWriter, CheckpointError> {
        let path = self.path_for(job);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| CheckpointError::io(&path, e))?;
        log::debug!("checkpoint: opened {}", path.display());
        Ok(CheckpointWriter { file, path })
    }

    /// Full text of the job's checkpoint.
    pub fn read(&self, job: &Job) -> Result<String, CheckpointError> {
        let path = self.path_for(job);
        fs::read_to_string(&path).map_err(|e| CheckpointError::io(&path, e))
    }

    /// Delete the job's checkpoint.  A missing file is not an error.
    pub fn delete(&self, job: &Job) -> Result<(), CheckpointError> {
        let path = self.path_for(job);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("checkpoint: deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(&path, e)),
        }
    }

    /// Copy the job's checkpoint to `dest`, creating parent directories.
    pub fn export(&self, job: &Job, dest: &Path) -> Result<u64, CheckpointError> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
        }
        let src = self.path_for(job);
        if !src.is_file() {
            return Err(CheckpointError::io(
                &src,
                std::io::Error::new(ErrorKind::NotFound, "no checkpoint for job"),
            ));
        }
        fs::copy(&src, dest).map_err(|e| CheckpointError::io(dest, e))
    }

    /// Remove the whole scratch directory, retrying up to `retries` times
    /// with `delay` in between.  Read-only attributes are cleared before
    /// each retry.  Blocks the calling thread.
    ///
    /// Returns `true` once the directory no longer exists.
    pub fn remove_dir_with_retries(&self, retries: u32, delay: Duration) -> bool {
        for attempt in 0..retries.max(1) {
            if !self.dir.exists() {
                return true;
            }
            match fs::remove_dir_all(&self.dir) {
                Ok(()) => {
                    log::info!("checkpoint: removed {}", self.dir.display());
                    return true;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return true,
                Err(e) => {
                    log::debug!(
                        "checkpoint: removing {} failed (attempt {}): {e}",
                        self.dir.display(),
                        attempt + 1
                    );
                    clear_readonly(&self.dir);
                    std::thread::sleep(delay);
                }
            }
        }
        let gone = !self.dir.exists();
        if !gone {
            log::warn!("checkpoint: could not remove {}", self.dir.display());
        }
        gone
    }
}

#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) {
    if let Ok(meta) = fs::symlink_metadata(path) {
        let mut perms = meta.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
        if meta.is_dir() {
            if let Ok(entries) = fs::read_dir(path) {
                for entry in entries.flatten() {
                    clear_readonly(&entry.path());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointWriter
// ---------------------------------------------------------------------------

/// Open handle on one job's checkpoint.
#[derive(Debug)]
pub struct CheckpointWriter {
    file: File,
    path: PathBuf,
}

impl CheckpointWriter {
    /// Append `text` and sync it to disk before returning.
    pub fn append(&mut self, text: &str) -> Result<(), CheckpointError> {
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| CheckpointError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
