//! End-to-end queue behaviour against the scripted engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::{tempdir, TempDir};

use crate::config::AppConfig;
use crate::stt::testing::{EngineStats, ScriptedEngine};
use crate::stt::{EngineError, LazyEngine, TranscriptionEngine};

use super::*;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _tmp: TempDir,
    media: PathBuf,
    queue: JobQueue,
    events: EventReceiver,
    log: Vec<QueueEvent>,
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.queue.shutdown_grace_ms = 100;
    config.queue.cleanup_retries = 5;
    config.queue.cleanup_retry_delay_ms = 10;
    config
}

fn harness(engine: ScriptedEngine) -> (Harness, Arc<EngineStats>) {
    let stats = engine.stats();
    (harness_with(LazyEngine::ready(Arc::new(engine))), stats)
}

fn harness_with(engine: LazyEngine) -> Harness {
    let tmp = tempdir().unwrap();
    let media = tmp.path().join("media");
    let store = CheckpointStore::new(tmp.path().join("recovery"));
    let (queue, events) = JobQueue::start(&config(), store, engine).unwrap();
    Harness {
        _tmp: tmp,
        media,
        queue,
        events,
        log: Vec::new(),
    }
}

impl Harness {
    fn add(&self, name: &str) -> Arc<Job> {
        self.queue.add(self.media.join(name))
    }

    /// Move everything received so far into `log`.
    fn drain(&mut self) -> &[QueueEvent] {
        while let Ok(ev) = self.events.try_recv() {
            self.log.push(ev);
        }
        &self.log
    }

    fn states_of(&mut self, id: JobId) -> Vec<JobState> {
        self.drain()
            .iter()
            .filter_map(|e| match e {
                QueueEvent::StateChanged { job, state, .. } if *job == id => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn progress_count(&mut self, id: JobId) -> usize {
        self.drain()
            .iter()
            .filter(|e| matches!(e, QueueEvent::Progress { job, .. } if *job == id))
            .count()
    }

    /// Every announced state change must be an edge of the state machine.
    fn assert_legal_transitions(&mut self) {
        let mut last: HashMap<JobId, JobState> = HashMap::new();
        for ev in self.drain() {
            if let QueueEvent::StateChanged { job, state, .. } = ev {
                let from = last.get(job).copied().unwrap_or(JobState::Idle);
                assert!(
                    from == *state || from.can_transition_to(*state),
                    "job {job}: illegal {from} -> {state}"
                );
                last.insert(*job, *state);
            }
        }
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 5 s");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn jobs_finish_in_submission_order_one_at_a_time() {
    let engine = ScriptedEngine::even_steps(&["one", " two", " three"])
        .sleeping(Duration::from_millis(5));
    let (mut h, stats) = harness(engine);
    let jobs = [h.add("a.wav"), h.add("b.wav"), h.add("c.wav")];

    assert_eq!(h.queue.start_all_pending(), 3);
    wait_until(|| {
        let busy = jobs.iter().filter(|j| j.state().is_active()).count();
        assert!(busy <= 1, "{busy} jobs active at once");
        jobs.iter().all(|j| j.state() == JobState::Done)
    })
    .await;

    assert_eq!(stats.calls(), 3);
    assert_eq!(stats.max_active(), 1);
    let expected: Vec<PathBuf> = jobs.iter().map(|j| j.source_path().to_path_buf()).collect();
    assert_eq!(stats.sources(), expected);

    let done_order: Vec<JobId> = h
        .drain()
        .iter()
        .filter_map(|e| match e {
            QueueEvent::StateChanged {
                job,
                state: JobState::Done,
                ..
            } => Some(*job),
            _ => None,
        })
        .collect();
    assert_eq!(done_order, jobs.iter().map(|j| j.id()).collect::<Vec<_>>());

    for job in &jobs {
        assert_eq!(h.queue.read_transcript(job).unwrap(), "one two three");
        assert_eq!(h.states_of(job.id()), [
            JobState::Idle,
            JobState::Waiting,
            JobState::Processing,
            JobState::Done
        ]);
    }
    assert_eq!(h.queue.batch_progress(), BatchProgress { done: 3, total: 3 });
    h.assert_legal_transitions();
}

#[tokio::test]
async fn cancel_at_forty_percent_stops_and_next_job_runs() {
    let (engine, gate) = ScriptedEngine::tenths().gated();
    let (mut h, _stats) = harness(engine);
    let first = h.add("first.wav");
    let second = h.add("second.wav");
    h.queue.start_all_pending();

    gate.release(4);
    wait_until(|| first.progress() >= 0.39).await;
    assert!(h.queue.store().exists(&first));

    h.queue.request_cancel(&first).unwrap();
    assert_eq!(first.state(), JobState::Stopping);
    drop(gate);

    wait_until(|| second.state() == JobState::Done).await;
    assert_eq!(first.state(), JobState::Stopped);
    assert!(!h.queue.store().exists(&first));
    assert!(first.text().is_empty());
    assert_eq!(h.progress_count(first.id()), 4);

    // Nothing from the cancelled job after it was asked to stop.
    let log = h.drain().to_vec();
    let stop_at = log
        .iter()
        .position(|e| {
            matches!(e, QueueEvent::StateChanged { job, state: JobState::Stopping, .. }
                if *job == first.id())
        })
        .unwrap();
    assert!(!log[stop_at..]
        .iter()
        .any(|e| matches!(e, QueueEvent::Progress { job, .. } if *job == first.id())));

    assert_eq!(
        h.queue.read_transcript(&second).unwrap(),
        ScriptedEngine::tenths_text()
    );
    h.assert_legal_transitions();
}

#[tokio::test]
async fn engine_failure_fails_only_that_job() {
    let engine = ScriptedEngine::even_steps(&["a", " b", " c", " d"])
        .failing_after(2)
        .fail_only_on("bad.wav");
    let (mut h, stats) = harness(engine);
    let bad = h.add("bad.wav");
    let good = h.add("good.wav");
    h.queue.start_all_pending();

    wait_until(|| good.state() == JobState::Done).await;
    assert_eq!(bad.state(), JobState::Error);
    let message = bad.error_message().unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("scripted failure"));
    assert!(!h.queue.store().exists(&bad));
    assert_eq!(h.progress_count(bad.id()), 2);

    assert_eq!(h.queue.read_transcript(&good).unwrap(), "a b c d");
    assert_eq!(stats.calls(), 2);
    assert_eq!(h.queue.batch_progress(), BatchProgress { done: 1, total: 2 });
    h.assert_legal_transitions();
}

#[tokio::test]
async fn remove_while_processing_is_deferred_then_done_once() {
    let (engine, gate) = ScriptedEngine::tenths().gated();
    let (mut h, _stats) = harness(engine);
    let job = h.add("a.wav");
    let other = h.add("b.wav");
    h.queue.submit(&job).unwrap();
    gate.release(2);
    wait_until(|| job.progress() >= 0.19).await;

    assert_eq!(h.queue.remove(&job).unwrap(), Removal::Deferred);
    assert_eq!(h.queue.remove(&job).unwrap(), Removal::Deferred);
    assert_eq!(h.queue.jobs().len(), 2);
    assert_eq!(h.queue.batch_progress().total, 2);
    assert!(matches!(
        h.queue.submit(&job),
        Err(QueueError::UnknownJob(_))
    ));

    drop(gate);
    wait_until(|| h.queue.jobs().len() == 1).await;

    assert_eq!(job.state(), JobState::Stopped);
    assert!(!h.queue.store().exists(&job));
    assert_eq!(h.queue.jobs()[0].id(), other.id());
    assert_eq!(h.queue.batch_progress(), BatchProgress { done: 0, total: 1 });

    let removed = h
        .drain()
        .iter()
        .filter(|e| matches!(e, QueueEvent::JobRemoved { job: id } if *id == job.id()))
        .count();
    assert_eq!(removed, 1);
    assert_eq!(
        h.drain().last(),
        Some(&QueueEvent::BatchProgress { done: 0, total: 1 })
    );
}

#[tokio::test]
async fn shutdown_cancels_everything_and_removes_scratch_dir() {
    let engine = ScriptedEngine::tenths().sleeping(Duration::from_millis(10));
    let (h, stats) = harness(engine);
    let running = h.add("running.wav");
    let waiting = h.add("waiting.wav");
    h.queue.start_all_pending();
    wait_until(|| running.progress() > 0.0).await;

    let dir = h.queue.store().dir().to_path_buf();
    let report = h.queue.shutdown().await;

    assert_eq!(report.cancelled, 2);
    assert!(report.scratch_removed);
    assert!(!dir.exists());
    assert_eq!(running.state(), JobState::Stopped);
    assert_eq!(waiting.state(), JobState::Stopped);
    assert_eq!(stats.calls(), 1);
}

#[tokio::test]
async fn shutdown_does_not_wait_for_a_stuck_engine() {
    let (engine, gate) = ScriptedEngine::tenths().gated();
    let (h, stats) = harness(engine);
    let stuck = h.add("stuck.wav");
    let waiting = h.add("waiting.wav");
    h.queue.start_all_pending();
    wait_until(|| stuck.state() == JobState::Processing).await;

    let dir = h.queue.store().dir().to_path_buf();
    let report = tokio::time::timeout(Duration::from_secs(2), h.queue.shutdown())
        .await
        .expect("shutdown must not block on the worker");

    assert!(report.scratch_removed);
    assert!(!dir.exists());
    assert_eq!(stuck.state(), JobState::Stopping);
    assert!(waiting.is_cancel_requested());

    // Unblock the engine thread so the test runtime can wind down.
    drop(gate);
    wait_until(|| waiting.state() == JobState::Stopped).await;
    assert_eq!(stuck.state(), JobState::Stopped);
    assert_eq!(stats.calls(), 1);
    assert!(!dir.exists());
}

// ---------------------------------------------------------------------------
// Invariants and edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelling_a_waiting_job_never_reaches_the_engine() {
    let (engine, gate) = ScriptedEngine::even_steps(&["x"]).gated();
    let (mut h, stats) = harness(engine);
    let first = h.add("first.wav");
    let second = h.add("second.wav");
    h.queue.start_all_pending();
    wait_until(|| first.state() == JobState::Processing).await;

    h.queue.request_cancel(&second).unwrap();
    assert_eq!(second.state(), JobState::Idle);
    assert!(second.is_cancel_requested());

    drop(gate);
    wait_until(|| first.state() == JobState::Done).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(second.state(), JobState::Idle);
    assert!(!h.queue.store().exists(&second));
    assert_eq!(stats.calls(), 1);
    assert_eq!(h.states_of(second.id()), [
        JobState::Idle,
        JobState::Waiting,
        JobState::Idle
    ]);
    h.assert_legal_transitions();
}

#[tokio::test]
async fn checkpoint_is_the_concatenation_of_every_chunk() {
    let chunks = ["مرحبا", " بكم", " في", " المحاضرة"];
    let (mut h, _stats) = harness(ScriptedEngine::even_steps(&chunks));
    let job = h.add("lecture.m4a");
    h.queue.submit(&job).unwrap();
    wait_until(|| job.state() == JobState::Done).await;

    let streamed: String = h
        .drain()
        .iter()
        .filter_map(|e| match e {
            QueueEvent::Progress { job: id, chunk, .. } if *id == job.id() => {
                Some(chunk.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(streamed, chunks.concat());
    assert_eq!(h.queue.read_transcript(&job).unwrap(), chunks.concat());
    assert_eq!(job.progress(), 1.0);
}

#[tokio::test]
async fn missing_scratch_dir_fails_the_job() {
    let (mut h, stats) = harness(ScriptedEngine::even_steps(&["x"]));
    std::fs::remove_dir_all(h.queue.store().dir()).unwrap();
    let job = h.add("a.wav");
    h.queue.submit(&job).unwrap();

    wait_until(|| job.state() == JobState::Error).await;
    assert!(job.error_message().unwrap().contains("checkpoint"));
    assert_eq!(stats.calls(), 0);
    h.assert_legal_transitions();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn failed_checkpoint_write_fails_the_job() {
    let (engine, gate) = ScriptedEngine::even_steps(&["a", " b"]).gated();
    let (mut h, _stats) = harness(engine);
    let first = h.add("first.wav");
    let full = h.add("full.wav");
    let after = h.add("after.wav");
    h.queue.submit(&first).unwrap();
    wait_until(|| first.state() == JobState::Processing).await;

    h.queue.submit(&full).unwrap();
    h.queue.submit(&after).unwrap();
    let path = h.queue.store().path_for(&full);
    std::os::unix::fs::symlink("/dev/full", &path).unwrap();
    drop(gate);

    wait_until(|| after.state() == JobState::Done).await;
    assert_eq!(first.state(), JobState::Done);
    assert_eq!(full.state(), JobState::Error);
    assert!(full.error_message().unwrap().contains("checkpoint"));
    assert!(path.symlink_metadata().is_err());
    assert_eq!(h.progress_count(full.id()), 0);
    assert_eq!(h.queue.read_transcript(&after).unwrap(), "a b");
    h.assert_legal_transitions();
}

#[tokio::test]
async fn engine_loads_lazily_and_announces_it() {
    let engine = LazyEngine::new(|| {
        Ok::<_, EngineError>(
            Arc::new(ScriptedEngine::even_steps(&["x"])) as Arc<dyn TranscriptionEngine>
        )
    });
    let mut h = harness_with(engine);
    let first = h.add("a.wav");
    let second = h.add("b.wav");
    h.queue.start_all_pending();
    wait_until(|| second.state() == JobState::Done).await;

    let loading: Vec<JobId> = h
        .drain()
        .iter()
        .filter_map(|e| match e {
            QueueEvent::StateChanged { job, detail: Some(d), .. } if d == LOADING_MODEL_DETAIL => {
                Some(*job)
            }
            _ => None,
        })
        .collect();
    assert_eq!(loading, [first.id()]);
    h.assert_legal_transitions();
}

#[tokio::test]
async fn failed_engine_load_errors_the_job_and_is_retried() {
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let engine = LazyEngine::new(move || {
        if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            Err(EngineError::ModelNotFound("/models/ggml-medium.bin".into()))
        } else {
            Ok(Arc::new(ScriptedEngine::even_steps(&["ok"])) as Arc<dyn TranscriptionEngine>)
        }
    });
    let h = harness_with(engine);
    let first = h.add("a.wav");
    let second = h.add("b.wav");
    h.queue.start_all_pending();

    wait_until(|| second.state() == JobState::Done).await;
    assert_eq!(first.state(), JobState::Error);
    assert!(first
        .error_message()
        .unwrap()
        .contains("/models/ggml-medium.bin"));
    assert!(!h.queue.store().exists(&first));

    h.queue.submit(&first).unwrap();
    wait_until(|| first.state() == JobState::Done).await;
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn aggregate_is_recomputed_on_add_remove_and_completion() {
    let (mut h, _stats) = harness(ScriptedEngine::even_steps(&["x"]));
    assert!(h.queue.batch_progress().fraction().is_none());

    let a = h.add("a.wav");
    let b = h.add("b.wav");
    assert_eq!(h.queue.batch_progress().fraction(), Some(0.0));

    h.queue.submit(&a).unwrap();
    wait_until(|| a.state() == JobState::Done).await;
    assert_eq!(h.queue.batch_progress().fraction(), Some(0.5));

    h.queue.remove(&b).unwrap();
    assert_eq!(h.queue.batch_progress().fraction(), Some(1.0));

    h.queue.remove(&a).unwrap();
    assert!(h.queue.batch_progress().fraction().is_none());

    for ev in h.drain() {
        if let QueueEvent::BatchProgress { done, total } = ev {
            assert!(done <= total);
        }
    }
}
