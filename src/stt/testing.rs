//! Test doubles for the engine contract.
//!
//! [`ScriptedEngine`] replays a fixed list of `(fraction, chunk)` steps
//! without touching any model file.  It can fail after a given number of
//! chunks and can be paced by a gate so tests decide exactly when each chunk
//! is produced.  [`EngineStats`] records calls and concurrency so tests can
//! assert the queue never runs two transcriptions at once.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::engine::{EngineError, EngineOutcome, ProgressSink, TranscriptionEngine};

/// Observations shared between a [`ScriptedEngine`] and the test.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub sources: Mutex<Vec<PathBuf>>,
}

impl EngineStats {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        self.sources.lock().unwrap().clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Pace {
    Free,
    Sleep(Duration),
    Gated(Mutex<mpsc::Receiver<()>>),
}

/// Releases gated chunks one at a time.  Dropping it lets the engine run
/// freely.
pub struct Gate(mpsc::Sender<()>);

impl Gate {
    pub fn release(&self, n: usize) {
        for _ in 0..n {
            let _ = self.0.send(());
        }
    }
}

/// Engine that replays scripted chunks.
pub struct ScriptedEngine {
    steps: Vec<(f32, String)>,
    fail_after: Option<usize>,
    fail_only_on: Option<String>,
    pace: Pace,
    stats: Arc<EngineStats>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<(f32, String)>) -> Self {
        Self {
            steps,
            fail_after: None,
            fail_only_on: None,
            pace: Pace::Free,
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// One chunk per text, fractions spread evenly up to 1.0.
    pub fn even_steps(texts: &[&str]) -> Self {
        let n = texts.len().max(1) as f32;
        Self::new(
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| ((i + 1) as f32 / n, (*t).to_owned()))
                .collect(),
        )
    }

    /// Ten chunks, one per 10 % of progress.
    pub fn tenths() -> Self {
        let texts: Vec<String> = (1..=10).map(|i| format!("[{}0%]", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        Self::even_steps(&refs)
    }

    /// What [`tenths`](Self::tenths) writes in full.
    pub fn tenths_text() -> String {
        (1..=10).map(|i| format!("[{}0%]", i)).collect()
    }

    /// Fail with a transcription error instead of producing chunk `n`.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Restrict [`failing_after`](Self::failing_after) to sources whose file
    /// name is `file_name`.
    pub fn fail_only_on(mut self, file_name: &str) -> Self {
        self.fail_only_on = Some(file_name.to_owned());
        self
    }

    fn fails_on(&self, source: &Path) -> Option<usize> {
        match &self.fail_only_on {
            Some(name) if source.file_name().and_then(|n| n.to_str()) != Some(name.as_str()) => {
                None
            }
            _ => self.fail_after,
        }
    }

    pub fn sleeping(mut self, per_chunk: Duration) -> Self {
        self.pace = Pace::Sleep(per_chunk);
        self
    }

    pub fn gated(mut self) -> (Self, Gate) {
        let (tx, rx) = mpsc::channel();
        self.pace = Pace::Gated(Mutex::new(rx));
        (self, Gate(tx))
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    fn wait_for_turn(&self) {
        match &self.pace {
            Pace::Free => {}
            Pace::Sleep(d) => std::thread::sleep(*d),
            Pace::Gated(rx) => {
                let _ = rx.lock().unwrap().recv();
            }
        }
    }
}

impl TranscriptionEngine for ScriptedEngine {
    fn transcribe(
        &self,
        source: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<EngineOutcome, EngineError> {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.stats.active);
        self.stats.sources.lock().unwrap().push(source.to_path_buf());
        let fail_after = self.fails_on(source);

        for (i, (fraction, chunk)) in self.steps.iter().enumerate() {
            if sink.is_cancelled() {
                return Ok(EngineOutcome::Cancelled);
            }
            self.wait_for_turn();
            if sink.is_cancelled() {
                return Ok(EngineOutcome::Cancelled);
            }
            if fail_after == Some(i) {
                return Err(EngineError::Transcription(format!(
                    "scripted failure after {i} chunks"
                )));
            }
            if sink.on_progress(*fraction, chunk).is_break() {
                return Ok(EngineOutcome::Cancelled);
            }
        }

        if fail_after == Some(self.steps.len()) {
            return Err(EngineError::Transcription("scripted failure at end".into()));
        }
        Ok(EngineOutcome::Completed)
    }
}

/// Sink that records every chunk it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub chunks: Vec<(f32, String)>,
    pub cancelled: bool,
    /// Return `Break` once this many chunks have been recorded.
    pub break_after: Option<usize>,
}

impl CollectingSink {
    pub fn text(&self) -> String {
        self.chunks.iter().map(|(_, c)| c.as_str()).collect()
    }
}

impl ProgressSink for CollectingSink {
    fn on_progress(&mut self, fraction: f32, chunk: &str) -> ControlFlow<()> {
        self.chunks.push((fraction, chunk.to_owned()));
        match self.break_after {
            Some(n) if self.chunks.len() >= n => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
