//! sentryd - zone alerting daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured source
//! 2. Buffers the last few seconds of frames for pre-event evidence
//! 3. Runs detection and maps detections to zones and alert classes
//! 4. Appends every classified detection to the daily CSV log
//! 5. Records an evidence clip per accepted alert and notifies off-loop
//! 6. On Ctrl-C, closes any active recording before exiting

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use zone_sentry::{
    open_source, run_frames, AlertDebouncer, AlertPipeline, Clock, DailyCsvLog,
    DetectionClassifier, FilesystemClipStore, LoopExit, LoopSettings, PipelineParts, Recorder,
    SentryConfig, SharedFrameBuffer, StubBackend, SystemClock,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stop after this many frames (runs until Ctrl-C when omitted).
    #[arg(long, env = "SENTRY_MAX_FRAMES")]
    max_frames: Option<u64>,
    /// Save a screenshot of the latest frame every N seconds.
    #[arg(long, env = "SENTRY_SCREENSHOT_SECS")]
    screenshot_secs: Option<u64>,
    /// Label reported by the stub detector for synthetic scenes.
    #[arg(long, default_value = "person")]
    stub_label: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = SentryConfig::load()?;
    cfg.ensure_output_dirs()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut source = open_source(cfg.source.clone(), Arc::clone(&clock))?;
    source.connect()?;

    let zones = Arc::new(cfg.zone_registry()?);
    let clip_store = FilesystemClipStore::new(cfg.clips_dir(), cfg.source.target_fps)?;
    let mut pipeline = AlertPipeline::new(PipelineParts {
        classifier: DetectionClassifier::new(zones, &cfg.alert_labels),
        buffer: SharedFrameBuffer::with_capacity(cfg.buffer_capacity())?,
        debouncer: AlertDebouncer::new(cfg.cooldown)?,
        recorder: Recorder::new(Box::new(clip_store), cfg.recording_duration),
        log_store: Arc::new(DailyCsvLog::open(cfg.logs_dir())?),
        dispatcher: cfg.build_dispatcher()?,
        detector: Box::new(StubBackend::new(&args.stub_label)),
        clock: Arc::clone(&clock),
        confidence_threshold: cfg.confidence_threshold,
        screenshot_dir: cfg.screenshots_dir(),
    })?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("sentryd running. writing to {}", cfg.output_dir.display());
    log::info!(
        "source={} fps={} alert_labels={:?}",
        cfg.source.url,
        cfg.source.target_fps,
        cfg.alert_labels
    );
    log::info!(
        "frame buffer capacity: {} frames, {:?} pre-event",
        cfg.buffer_capacity(),
        cfg.pre_event
    );

    let settings = LoopSettings {
        max_frames: args.max_frames,
        screenshot_every: args.screenshot_secs.map(Duration::from_secs),
        ..LoopSettings::for_fps(cfg.source.target_fps)
    };
    let summary = run_frames(&mut pipeline, source.as_mut(), &rx, &settings);

    let (stats, dispatch) = pipeline.shutdown(Duration::from_secs(2));
    log::info!(
        "sentryd stopped ({:?}): frames={} rows={} triggers={} clips={} notified={} failed={}",
        summary.exit,
        stats.frames,
        stats.rows_logged,
        stats.triggers,
        stats.clips_completed,
        dispatch.delivered,
        dispatch.failed
    );
    match summary.exit {
        LoopExit::SourceFailed => Err(anyhow!("frame source failed")),
        LoopExit::PipelineFailed => Err(anyhow!("pipeline failed")),
        LoopExit::Signal | LoopExit::FrameLimit => Ok(()),
    }
}
