//! Paced frame loop used by the daemon.
//!
//! `run_frames` never shuts the pipeline down. Every exit path returns to the
//! caller, which must call `AlertPipeline::shutdown` so an active recording is
//! force-closed before the process exits.

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use crate::ingest::FrameSource;
use crate::pipeline::AlertPipeline;

pub const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Target time per frame; `Duration::ZERO` runs unpaced.
    pub frame_interval: Duration,
    pub max_frames: Option<u64>,
    pub screenshot_every: Option<Duration>,
    pub health_interval: Duration,
}

impl LoopSettings {
    pub fn for_fps(fps: u32) -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
            max_frames: None,
            screenshot_every: None,
            health_interval: HEALTH_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    Signal,
    FrameLimit,
    SourceFailed,
    PipelineFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub frames: u64,
}

pub fn run_frames(
    pipeline: &mut AlertPipeline,
    source: &mut dyn FrameSource,
    stop: &Receiver<()>,
    settings: &LoopSettings,
) -> LoopSummary {
    let mut last_health_log = Instant::now();
    let mut last_screenshot = Instant::now();
    let mut frames = 0u64;

    let exit = loop {
        let tick = Instant::now();
        if stop.try_recv().is_ok() {
            log::info!("shutdown signal received");
            break LoopExit::Signal;
        }
        if settings.max_frames.is_some_and(|max| frames >= max) {
            log::info!("frame limit reached");
            break LoopExit::FrameLimit;
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("frame source failed: {:#}", e);
                break LoopExit::SourceFailed;
            }
        };
        frames += 1;
        let report = match pipeline.process_frame(frame) {
            Ok(report) => report,
            Err(e) => {
                log::error!("pipeline failed: {:#}", e);
                break LoopExit::PipelineFailed;
            }
        };
        if let Some(clip) = &report.closed_clip {
            log::info!(
                "evidence clip ready: {} ({} frames)",
                clip.path.display(),
                clip.frames_written
            );
        }

        if let Some(every) = settings.screenshot_every {
            if !every.is_zero() && last_screenshot.elapsed() >= every {
                if let Err(e) = pipeline.capture_screenshot() {
                    log::warn!("screenshot failed: {:#}", e);
                }
                last_screenshot = Instant::now();
            }
        }

        if last_health_log.elapsed() >= settings.health_interval {
            log_health(pipeline, source.is_healthy());
            last_health_log = Instant::now();
        }

        if let Some(remaining) = settings.frame_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(remaining);
        }
    };

    LoopSummary { exit, frames }
}

fn log_health(pipeline: &AlertPipeline, source_healthy: bool) {
    let stats = pipeline.stats();
    let classifier = pipeline.classifier_stats();
    let dispatch = pipeline.dispatch_stats();
    let (len, capacity, bytes) = pipeline.buffer_fill().unwrap_or_default();
    log::info!(
        "health source={} frames={} rows={} rejected={} triggers={} clips={} recording={} notified={}/{} buffer={}/{} (~{} KB)",
        source_healthy,
        stats.frames,
        stats.rows_logged,
        classifier.rejected,
        stats.triggers,
        stats.clips_completed,
        pipeline.is_recording(),
        dispatch.delivered,
        dispatch.failed,
        len,
        capacity,
        bytes / 1024
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDebouncer;
    use crate::clock::{advance, ManualClock};
    use crate::detect::{BoundingBox, Detection, DetectionClassifier, ScriptedBackend};
    use crate::dispatch::NotificationDispatcher;
    use crate::frame::{RawFrame, SharedFrameBuffer};
    use crate::ingest::SourceStats;
    use crate::pipeline::PipelineParts;
    use crate::recording::{InMemoryClipStore, Recorder};
    use crate::storage::InMemoryDetectionLog;
    use crate::zone::{Zone, ZoneRegistry};
    use anyhow::Result;
    use chrono::{DateTime, Local, TimeZone};
    use std::sync::{mpsc, Arc};

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// One frame per second; poisons the shared buffer before `poison_at`.
    struct TestSource {
        next: u64,
        buffer: SharedFrameBuffer,
        poison_at: Option<u64>,
    }

    impl FrameSource for TestSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<RawFrame> {
            let seq = self.next;
            self.next += 1;
            if self.poison_at == Some(seq) {
                self.buffer.poison();
            }
            RawFrame::filled(seq, advance(t0(), Duration::from_secs(seq)), 8, 8, 0)
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.next,
                url: "stub://test".to_string(),
            }
        }
    }

    fn setup(poison_at: Option<u64>) -> (AlertPipeline, TestSource, InMemoryClipStore) {
        let zones = ZoneRegistry::new(vec![Zone::rect("Zone1", 400, 100, 250, 350).unwrap()]).unwrap();
        let clips = InMemoryClipStore::new();
        let buffer = SharedFrameBuffer::with_capacity(5).unwrap();
        let backend = ScriptedBackend::new().with(
            1,
            vec![Detection::new("person", 0.9, BoundingBox::centered(500, 200, 40, 80))],
        );
        let pipeline = AlertPipeline::new(PipelineParts {
            classifier: DetectionClassifier::new(Arc::new(zones), ["person"]),
            buffer: buffer.clone(),
            debouncer: AlertDebouncer::new(Duration::from_secs(300)).unwrap(),
            recorder: Recorder::new(Box::new(clips.clone()), Duration::from_secs(60)),
            log_store: Arc::new(InMemoryDetectionLog::new()),
            dispatcher: NotificationDispatcher::disabled(),
            detector: Box::new(backend),
            clock: Arc::new(ManualClock::new(t0())),
            confidence_threshold: 0.5,
            screenshot_dir: std::env::temp_dir().join("zone-sentry-runner-test"),
        })
        .unwrap();
        let source = TestSource {
            next: 0,
            buffer,
            poison_at,
        };
        (pipeline, source, clips)
    }

    fn unpaced(max_frames: Option<u64>) -> LoopSettings {
        LoopSettings {
            frame_interval: Duration::ZERO,
            max_frames,
            screenshot_every: None,
            health_interval: Duration::from_secs(3600),
        }
    }

    #[test]
    fn stops_at_frame_limit() {
        let (mut pipeline, mut source, _clips) = setup(None);
        let (_tx, rx) = mpsc::channel();
        let summary = run_frames(&mut pipeline, &mut source, &rx, &unpaced(Some(4)));
        assert_eq!(summary, LoopSummary { exit: LoopExit::FrameLimit, frames: 4 });
        assert!(pipeline.is_recording());
    }

    #[test]
    fn stop_signal_ends_loop_before_next_frame() {
        let (mut pipeline, mut source, _clips) = setup(None);
        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();
        let summary = run_frames(&mut pipeline, &mut source, &rx, &unpaced(None));
        assert_eq!(summary, LoopSummary { exit: LoopExit::Signal, frames: 0 });
    }

    #[test]
    fn pipeline_error_returns_so_active_clip_is_closed() {
        let (mut pipeline, mut source, clips) = setup(Some(3));
        let (_tx, rx) = mpsc::channel();
        let summary = run_frames(&mut pipeline, &mut source, &rx, &unpaced(None));
        assert_eq!(summary.exit, LoopExit::PipelineFailed);
        assert_eq!(summary.frames, 4);
        assert!(pipeline.is_recording());

        let (stats, _) = pipeline.shutdown(Duration::from_millis(100));
        assert_eq!(stats.clips_completed, 1);
        let stored = clips.clips();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sequences, vec![0, 1, 2]);
    }
}
