//! Command-line front end for the transcription queue.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Parse arguments and load [`AppConfig`] (defaults on first run).
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Start the [`JobQueue`]: purge stale checkpoints, spawn the worker.  The
//!    Whisper model is loaded by the worker when the first job needs it.
//! 5. Add every file and start them all.
//! 6. Drain queue events on every tick until the batch is finished or Ctrl-C
//!    is pressed.
//! 7. Save finished transcripts, shut the queue down and exit the process
//!    without waiting for the worker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use transcript_queue::{
    audio::format_duration,
    config::{AppConfig, AppPaths, SUPPORTED_EXTENSIONS},
    queue::{CheckpointStore, EventReceiver, JobQueue, JobState, QueueEvent},
    stt::{LazyEngine, TranscribeParams, WhisperLoader},
};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Transcribe media files one at a time with Whisper.
#[derive(Debug, Parser)]
#[command(name = "transcript-queue", version, about)]
struct Cli {
    /// Media files to transcribe (mp3, mp4, wav, m4a, mkv).
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Folder that receives `<name>.txt` for every finished file.
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Settings file to use instead of the platform default.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print queue events as JSON lines on stdout.
    #[arg(long)]
    json: bool,

    /// Interval between event drains, in milliseconds.
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Event reporting
// ---------------------------------------------------------------------------

fn report(queue: &JobQueue, event: &QueueEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let name = |id| {
        queue
            .job(id)
            .map(|j| j.display_name().to_owned())
            .unwrap_or_else(|| id.to_string())
    };
    match event {
        QueueEvent::Progress { job, fraction, .. } => {
            log::info!("{}: {:>5.1}%", name(*job), fraction * 100.0);
        }
        QueueEvent::StateChanged { job, state, detail } => match (state, detail) {
            (JobState::Error, Some(msg)) => log::error!("{}: {msg}", name(*job)),
            (_, Some(msg)) => log::info!("{}: {state} ({msg})", name(*job)),
            (JobState::Done, None) => {
                let elapsed = queue
                    .job(*job)
                    .map(|j| format_duration(j.elapsed().as_secs_f64()))
                    .unwrap_or_default();
                log::info!("{}: done in {elapsed}", name(*job));
            }
            (_, None) => log::info!("{}: {state}", name(*job)),
        },
        QueueEvent::BatchProgress { done, total } => {
            log::info!("batch: {done}/{total} finished");
        }
        QueueEvent::JobRemoved { job } => log::info!("{job}: removed"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Returns the process exit code.  Once the queue has started it is shut
/// down on every path, including errors.
async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<i32> {
    let paths = AppPaths::new();
    let store = CheckpointStore::new(config.queue.resolve_scratch_dir(&paths));
    let loader = WhisperLoader::new(
        config.stt.resolve_model_path(&paths),
        TranscribeParams::from_config(&config.stt, &config.queue),
    );

    let (queue, mut events) = JobQueue::start(&config, store, LazyEngine::new(loader))
        .context("cannot prepare the recovery directory")?;

    let outcome = drive(&cli, &queue, &mut events).await;

    let shutdown = queue.shutdown().await;
    if !shutdown.scratch_removed {
        log::warn!("recovery directory could not be removed");
    }
    outcome
}

/// Add the files, run the batch and save what finished.
async fn drive(cli: &Cli, queue: &JobQueue, events: &mut EventReceiver) -> anyhow::Result<i32> {
    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("cannot create output folder {}", cli.out.display()))?;

    for file in &cli.files {
        if !is_supported(file) {
            log::warn!("skipping {}: unsupported file type", file.display());
            continue;
        }
        let job = queue.add(file.clone());
        log::info!(
            "{} [{}]",
            job.display_name(),
            format_duration(job.duration_secs())
        );
    }
    if queue.jobs().is_empty() {
        log::error!("nothing to transcribe");
        return Ok(2);
    }
    log::info!(
        "{} file(s), {} total",
        queue.jobs().len(),
        format_duration(queue.total_duration_secs())
    );
    queue.start_all_pending();

    let mut tick = tokio::time::interval(Duration::from_millis(cli.tick_ms.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let interrupted = loop {
        tokio::select! {
            _ = &mut ctrl_c => break true,
            _ = tick.tick() => {
                while let Ok(event) = events.try_recv() {
                    report(queue, &event, cli.json)?;
                }
                if queue.jobs().iter().all(|j| j.state().is_terminal()) {
                    break false;
                }
            }
        }
    };
    if interrupted {
        log::warn!("interrupted, stopping");
    }

    let saved = queue
        .save_all_finished(&cli.out)
        .with_context(|| format!("cannot save transcripts to {}", cli.out.display()))?;
    let failed = queue
        .jobs()
        .iter()
        .filter(|j| j.state() == JobState::Error)
        .count();
    log::info!("{saved} transcript(s) written to {}", cli.out.display());

    Ok(match (interrupted, failed) {
        (true, _) => 130,
        (false, 0) => 0,
        _ => 1,
    })
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 2. Arguments + configuration
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("cannot read settings from {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };

    // 3. Tokio runtime (one worker drives the queue, one serves the front end)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    // 4–7. Queue lifetime
    let code = rt.block_on(run(cli, config)).unwrap_or_else(|e| {
        log::error!("{e:#}");
        1
    });

    // The engine thread may still be unwinding a cancelled job; do not wait
    // for it, not even through the runtime's drop.
    std::process::exit(code)
}
