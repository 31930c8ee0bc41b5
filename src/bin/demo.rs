//! demo - deterministic end-to-end run of the alert pipeline
//!
//! Drives a synthetic source with a manual clock and a scripted detector:
//! a person enters Zone1 at t=0 (alert + clip), again at t=5 s (logged,
//! dropped: recording active and cooldown running), a dog and an outside
//! person are logged without alerting, and a person and a car enter at
//! t=301 s (second alert once the cooldown has elapsed).

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use zone_sentry::ingest::{FrameSource, SourceConfig, SyntheticSource};
use zone_sentry::{
    AlertDebouncer, AlertPipeline, BoundingBox, ChannelNotifier, Clock, DailyCsvLog, Detection,
    DetectionClassifier, FilesystemClipStore, ManualClock, NotificationDispatcher, PipelineParts,
    Recorder, ScriptedBackend, SentryConfig, SharedFrameBuffer,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output root (clips/, logs/, screenshots/ are created below it).
    #[arg(long, default_value = "demo_out")]
    out: PathBuf,
    /// Frames per second of the synthetic source.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Simulated run length in seconds.
    #[arg(long, default_value_t = 312)]
    seconds: u64,
    /// Alert cooldown in seconds.
    #[arg(long, default_value_t = 300)]
    cooldown: u64,
    /// Clip length in seconds.
    #[arg(long, default_value_t = 10)]
    recording: u64,
    /// Pre-event window in seconds.
    #[arg(long, default_value_t = 5)]
    pre_event: u64,
    /// Simulated start time (local, `YYYY-MM-DD HH:MM:SS`).
    #[arg(long, default_value = "2024-03-01 12:00:00")]
    start: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let naive = NaiveDateTime::parse_from_str(&args.start, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("invalid --start '{}'", args.start))?;
    let start = Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| anyhow!("--start '{}' is ambiguous in local time", args.start))?;

    let mut cfg = SentryConfig::load()?;
    cfg.output_dir = args.out.clone();
    cfg.source = SourceConfig {
        url: "stub://demo".to_string(),
        target_fps: args.fps,
        width: 320,
        height: 240,
    };
    cfg.cooldown = Duration::from_secs(args.cooldown);
    cfg.recording_duration = Duration::from_secs(args.recording);
    cfg.pre_event = Duration::from_secs(args.pre_event);
    cfg.ensure_output_dirs()?;

    stage("build pipeline");
    let clock = Arc::new(ManualClock::new(start));
    let frame_at = |secs: u64| secs * u64::from(args.fps) + 1;
    let person_in_zone = || Detection::new("person", 0.91, BoundingBox::centered(500, 200, 60, 120));
    let detector = ScriptedBackend::new()
        .with(frame_at(0), vec![person_in_zone()])
        .with(
            frame_at(2),
            vec![Detection::new("dog", 0.77, BoundingBox::centered(520, 300, 40, 30))],
        )
        .with(
            frame_at(3),
            vec![Detection::new("person", 0.83, BoundingBox::centered(100, 100, 40, 80))],
        )
        .with(frame_at(5), vec![person_in_zone()])
        .with(
            frame_at(301),
            vec![
                person_in_zone(),
                Detection::new("car", 0.88, BoundingBox::centered(560, 380, 120, 60)),
            ],
        );

    let (tx, rx) = mpsc::channel();
    let mut pipeline = AlertPipeline::new(PipelineParts {
        classifier: DetectionClassifier::new(Arc::new(cfg.zone_registry()?), &cfg.alert_labels),
        buffer: SharedFrameBuffer::with_capacity(cfg.buffer_capacity())?,
        debouncer: AlertDebouncer::new(cfg.cooldown)?,
        recorder: Recorder::new(
            Box::new(FilesystemClipStore::new(cfg.clips_dir(), args.fps)?),
            cfg.recording_duration,
        ),
        log_store: Arc::new(DailyCsvLog::open(cfg.logs_dir())?),
        dispatcher: NotificationDispatcher::spawn(Box::new(ChannelNotifier::new(tx)))?,
        detector: Box::new(detector),
        clock: clock.clone(),
        confidence_threshold: cfg.confidence_threshold,
        screenshot_dir: cfg.screenshots_dir(),
    })?;

    let mut source = SyntheticSource::new(cfg.source.clone(), clock.clone())?;
    source.connect()?;

    stage("process synthetic frames");
    let total_frames = args.seconds.saturating_mul(u64::from(args.fps));
    let frame_step = Duration::from_secs_f64(1.0 / f64::from(args.fps));
    let mut triggers = Vec::new();
    for _ in 0..total_frames {
        let report = pipeline.process_frame(source.next_frame()?)?;
        if let Some(trigger) = report.trigger {
            triggers.push(trigger);
        }
        clock.advance(frame_step);
    }
    let screenshot = pipeline.capture_screenshot()?;
    let rows = pipeline.rows_written();

    stage("shutdown");
    let (stats, dispatch) = pipeline.shutdown(Duration::from_secs(5));
    let notifications: Vec<_> = rx.try_iter().collect();

    println!("demo summary:");
    println!("  frames processed: {}", stats.frames);
    println!("  log rows written: {}", rows);
    println!(
        "  triggers accepted: {} (suppressed: {} cooldown, {} active recording)",
        stats.triggers, stats.suppressed_cooldown, stats.suppressed_active
    );
    for trigger in &triggers {
        println!(
            "    {} [{}] in {}",
            trigger.accepted_at.format("%H:%M:%S"),
            trigger.labels_joined(),
            trigger.zone
        );
    }
    println!("  clips written: {}", stats.clips_completed);
    for n in &notifications {
        println!("    {} ({} frames, sha256 {})", n.clip_path, n.frames, n.sha256);
    }
    println!(
        "  notifications: {} delivered, {} failed",
        dispatch.delivered, dispatch.failed
    );
    println!("  screenshot: {}", screenshot.display());
    println!("  detection log:");
    let mut logs: Vec<_> = fs::read_dir(cfg.logs_dir())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    logs.sort();
    for path in logs {
        println!("    {}", path.display());
        for line in fs::read_to_string(&path)?.lines() {
            println!("      {}", line);
        }
    }
    println!("current time on the simulated clock: {}", clock.now());
    Ok(())
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
