//! Per-frame orchestration.
//!
//! `AlertPipeline::process_frame` runs the whole control flow for one frame,
//! strictly in this order:
//!
//! 1. push the frame into the pre-event ring buffer;
//! 2. feed the active recording session (close it when its duration has
//!    elapsed and hand the clip to the dispatcher, otherwise append);
//! 3. detect and classify;
//! 4. write one detection log row per classified detection;
//! 5. if alert candidates are present and no session is active, consult the
//!    debouncer and, on acceptance, start a session seeded with a buffer
//!    snapshot.
//!
//! Rows are always logged before the debouncer runs. Triggers arriving while
//! a session is active are dropped without touching the debouncer, so the
//! cooldown anchor stays at the trigger that opened the session.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{AlertDebouncer, AlertInput, TriggerAccepted};
use crate::clock::Clock;
use crate::detect::{ClassifiedDetection, ClassifierStats, DetectionClassifier, DetectorBackend};
use crate::dispatch::{DispatchStats, NotificationDispatcher};
use crate::frame::{RawFrame, SharedFrameBuffer};
use crate::log::DetectionLogEntry;
use crate::recording::{ClipArtifact, Recorder, StartOutcome};
use crate::storage::DetectionLogStore;

pub const DEFAULT_DISPATCH_GRACE: Duration = Duration::from_secs(2);
const SCREENSHOT_QUALITY: u8 = 95;

/// Everything the pipeline owns, assembled by the caller.
pub struct PipelineParts {
    pub classifier: DetectionClassifier,
    pub buffer: SharedFrameBuffer,
    pub debouncer: AlertDebouncer,
    pub recorder: Recorder,
    pub log_store: Arc<dyn DetectionLogStore>,
    pub dispatcher: NotificationDispatcher,
    pub detector: Box<dyn DetectorBackend>,
    pub clock: Arc<dyn Clock>,
    pub confidence_threshold: f32,
    pub screenshot_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suppression {
    /// Inside the debouncer's cooldown window.
    Cooldown,
    /// A recording session was already active.
    ActiveSession,
}

/// Outcome of one `process_frame` call.
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    pub classified: Vec<ClassifiedDetection>,
    pub alert_candidates: usize,
    pub trigger: Option<TriggerAccepted>,
    pub closed_clip: Option<ClipArtifact>,
    pub suppressed: Option<Suppression>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub detector_errors: u64,
    pub rows_logged: u64,
    pub log_failures: u64,
    pub triggers: u64,
    pub suppressed_cooldown: u64,
    pub suppressed_active: u64,
    pub clips_completed: u64,
    pub clip_failures: u64,
}

pub struct AlertPipeline {
    classifier: DetectionClassifier,
    buffer: SharedFrameBuffer,
    debouncer: AlertDebouncer,
    recorder: Recorder,
    log_store: Arc<dyn DetectionLogStore>,
    dispatcher: NotificationDispatcher,
    detector: Box<dyn DetectorBackend>,
    clock: Arc<dyn Clock>,
    confidence_threshold: f32,
    screenshot_dir: PathBuf,
    stats: PipelineStats,
}

impl AlertPipeline {
    pub fn new(parts: PipelineParts) -> Result<Self> {
        let PipelineParts {
            classifier,
            buffer,
            debouncer,
            recorder,
            log_store,
            dispatcher,
            mut detector,
            clock,
            confidence_threshold,
            screenshot_dir,
        } = parts;

        if !(confidence_threshold > 0.0 && confidence_threshold <= 1.0) {
            return Err(anyhow!(
                "confidence threshold must be in (0, 1], got {}",
                confidence_threshold
            ));
        }
        if debouncer.cooldown() < recorder.target_duration() {
            log::warn!(
                "cooldown {:?} is shorter than recording duration {:?}; triggers during a session are dropped",
                debouncer.cooldown(),
                recorder.target_duration()
            );
        }
        detector
            .warm_up()
            .with_context(|| format!("detector '{}' failed to warm up", detector.name()))?;

        log::info!(
            "pipeline ready: detector={} zones={} cooldown={:?} recording={:?} notifier={}",
            detector.name(),
            classifier.zones().len(),
            debouncer.cooldown(),
            recorder.target_duration(),
            dispatcher.notifier_name()
        );

        Ok(Self {
            classifier,
            buffer,
            debouncer,
            recorder,
            log_store,
            dispatcher,
            detector,
            clock,
            confidence_threshold,
            screenshot_dir,
            stats: PipelineStats::default(),
        })
    }

    /// Run the full per-frame control flow.
    ///
    /// Detector, log, clip and notification failures are logged and counted;
    /// only a poisoned frame buffer is returned as an error.
    pub fn process_frame(&mut self, frame: RawFrame) -> Result<FrameReport> {
        let frame = Arc::new(frame);
        let now = frame.captured_at();
        let mut report = FrameReport::default();
        self.stats.frames += 1;

        self.buffer.push(Arc::clone(&frame))?;

        match self.recorder.on_frame(&frame) {
            Ok(Some(artifact)) => {
                self.stats.clips_completed += 1;
                self.dispatcher.send(&artifact);
                report.closed_clip = Some(artifact);
            }
            Ok(None) => {}
            Err(err) => {
                self.stats.clip_failures += 1;
                log::error!("evidence clip discarded: {:#}", err);
            }
        }

        let detections = match self.detector.detect(&frame, self.confidence_threshold) {
            Ok(detections) => detections,
            Err(err) => {
                self.stats.detector_errors += 1;
                log::warn!(
                    "detector '{}' failed on frame {}: {:#}",
                    self.detector.name(),
                    frame.sequence(),
                    err
                );
                Vec::new()
            }
        };
        let classified = self.classifier.classify_frame(&detections, now);

        for det in &classified {
            match self.log_store.append(&DetectionLogEntry::from_classified(det)) {
                Ok(()) => self.stats.rows_logged += 1,
                Err(err) => {
                    self.stats.log_failures += 1;
                    log::warn!("detection log append failed: {:#}", err);
                }
            }
        }

        let input = AlertInput::from_classified(&classified);
        report.alert_candidates = classified.iter().filter(|d| d.is_alert_candidate()).count();
        if !input.is_empty() {
            if self.recorder.is_active() {
                self.stats.suppressed_active += 1;
                report.suppressed = Some(Suppression::ActiveSession);
            } else {
                // Snapshot before the debouncer commits: a failed snapshot
                // must leave the cooldown anchor where it was.
                let pre_event = if self.debouncer.in_cooldown(now) {
                    Vec::new()
                } else {
                    self.buffer.snapshot()?
                };
                self.handle_alert_input(now, &input, &pre_event, &mut report);
            }
        }

        report.classified = classified;
        Ok(report)
    }

    fn handle_alert_input(
        &mut self,
        now: DateTime<Local>,
        input: &AlertInput,
        pre_event: &[Arc<RawFrame>],
        report: &mut FrameReport,
    ) {
        match self.debouncer.evaluate(now, input) {
            Some(trigger) => {
                self.stats.triggers += 1;
                log::info!(
                    "alert accepted at {}: [{}] in {}",
                    trigger.accepted_at.format("%Y-%m-%d %H:%M:%S"),
                    trigger.labels_joined(),
                    trigger.zone
                );
                match self.recorder.start(&trigger, pre_event) {
                    Ok(StartOutcome::Started) => {}
                    Ok(StartOutcome::AlreadyActive) => {
                        log::warn!("recording already active at accepted trigger");
                    }
                    Err(err) => {
                        self.stats.clip_failures += 1;
                        log::error!("failed to start evidence recording: {:#}", err);
                    }
                }
                report.trigger = Some(trigger);
            }
            None => {
                self.stats.suppressed_cooldown += 1;
                report.suppressed = Some(Suppression::Cooldown);
            }
        }
    }

    /// Save the most recent buffered frame as a JPEG screenshot.
    pub fn capture_screenshot(&self) -> Result<PathBuf> {
        let frame = self
            .buffer
            .latest()?
            .ok_or_else(|| anyhow!("no frame available for screenshot"))?;
        fs::create_dir_all(&self.screenshot_dir).with_context(|| {
            format!(
                "failed to create screenshot directory {}",
                self.screenshot_dir.display()
            )
        })?;
        let stem = format!("capture_{}", frame.captured_at().format("%Y-%m-%d_%H-%M-%S"));
        let path = unique_path(&self.screenshot_dir, &stem, "jpg");
        let file = fs::File::create(&path)
            .with_context(|| format!("failed to create screenshot {}", path.display()))?;
        JpegEncoder::new_with_quality(BufWriter::new(file), SCREENSHOT_QUALITY).encode(
            frame.pixels(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )?;
        log::info!("screenshot saved: {}", path.display());
        Ok(path)
    }

    /// Force-close an active session, dispatch its clip and stop the
    /// dispatcher after at most `grace`.
    pub fn shutdown(mut self, grace: Duration) -> (PipelineStats, DispatchStats) {
        match self.recorder.force_close(self.clock.now()) {
            Ok(Some(artifact)) => {
                self.stats.clips_completed += 1;
                log::info!("active recording closed on shutdown: {}", artifact.path.display());
                self.dispatcher.send(&artifact);
            }
            Ok(None) => {}
            Err(err) => {
                self.stats.clip_failures += 1;
                log::error!("failed to close recording on shutdown: {:#}", err);
            }
        }
        let dispatch = self.dispatcher.shutdown(grace);
        (self.stats, dispatch)
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn classifier_stats(&self) -> ClassifierStats {
        self.classifier.stats()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn rows_written(&self) -> u64 {
        self.log_store.rows_written()
    }

    /// `(len, capacity, memory_bytes)` of the pre-event buffer.
    pub fn buffer_fill(&self) -> Result<(usize, usize, usize)> {
        self.buffer.fill()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn debouncer(&self) -> &AlertDebouncer {
        &self.debouncer
    }
}

fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let mut path = dir.join(format!("{stem}.{ext}"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{stem}_{n}.{ext}"));
        n += 1;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{advance, ManualClock};
    use crate::detect::{BoundingBox, Detection, ScriptedBackend};
    use crate::recording::InMemoryClipStore;
    use crate::storage::InMemoryDetectionLog;
    use crate::zone::{Zone, ZoneRegistry};
    use chrono::{DateTime, Local, TimeZone};

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    struct Harness {
        pipeline: AlertPipeline,
        clips: InMemoryClipStore,
        log: Arc<InMemoryDetectionLog>,
        buffer: SharedFrameBuffer,
        _dir: tempfile::TempDir,
    }

    fn harness(backend: ScriptedBackend, cooldown: u64, recording: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let zones = ZoneRegistry::new(vec![Zone::rect("Zone1", 400, 100, 250, 350).unwrap()]).unwrap();
        let clips = InMemoryClipStore::new();
        let log = Arc::new(InMemoryDetectionLog::new());
        let buffer = SharedFrameBuffer::with_capacity(5).unwrap();
        let pipeline = AlertPipeline::new(PipelineParts {
            classifier: DetectionClassifier::new(Arc::new(zones), ["person", "car", "truck"]),
            buffer: buffer.clone(),
            debouncer: AlertDebouncer::new(Duration::from_secs(cooldown)).unwrap(),
            recorder: Recorder::new(Box::new(clips.clone()), Duration::from_secs(recording)),
            log_store: log.clone(),
            dispatcher: NotificationDispatcher::disabled(),
            detector: Box::new(backend),
            clock: Arc::new(ManualClock::new(t0())),
            confidence_threshold: 0.5,
            screenshot_dir: dir.path().join("screenshots"),
        })
        .unwrap();
        Harness {
            pipeline,
            clips,
            log,
            buffer,
            _dir: dir,
        }
    }

    fn frame(seq: u64) -> RawFrame {
        // One frame per second keeps the arithmetic readable.
        RawFrame::filled(seq, advance(t0(), Duration::from_secs(seq)), 8, 8, 0).unwrap()
    }

    fn person() -> Vec<Detection> {
        vec![Detection::new("person", 0.9, BoundingBox::centered(500, 200, 40, 80))]
    }

    #[test]
    fn rows_are_logged_even_when_trigger_is_suppressed() {
        let backend = ScriptedBackend::new().with(1, person()).with(2, person());
        let mut h = harness(backend, 300, 10);
        let first = h.pipeline.process_frame(frame(1)).unwrap();
        assert!(first.trigger.is_some());
        let second = h.pipeline.process_frame(frame(2)).unwrap();
        assert_eq!(second.suppressed, Some(Suppression::ActiveSession));
        let rows = h.log.entries().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.alert_triggered));
    }

    #[test]
    fn buffer_failure_leaves_cooldown_unspent() {
        let backend = ScriptedBackend::new().with(1, person()).with(2, person());
        let mut h = harness(backend, 300, 10);
        h.buffer.poison();

        assert!(h.pipeline.process_frame(frame(1)).is_err());
        assert_eq!(h.pipeline.debouncer().last_alert_at(), None);
        assert!(!h.pipeline.debouncer().in_cooldown(frame(2).captured_at()));
        assert!(!h.pipeline.is_recording());
        assert_eq!(h.pipeline.stats().triggers, 0);
        assert_eq!(h.clips.created(), 0);
    }

    #[test]
    fn cooldown_suppression_skips_buffer_snapshot() {
        // Cooldown longer than the recording: the second candidate arrives
        // after the clip closed and is dropped by the debouncer alone.
        let backend = ScriptedBackend::new().with(0, person()).with(4, person());
        let mut h = harness(backend, 60, 2);
        for seq in 0..=3 {
            h.pipeline.process_frame(frame(seq)).unwrap();
        }
        assert!(!h.pipeline.is_recording());
        let report = h.pipeline.process_frame(frame(4)).unwrap();
        assert_eq!(report.suppressed, Some(Suppression::Cooldown));
        assert_eq!(h.pipeline.debouncer().last_alert_at(), Some(frame(0).captured_at()));
        assert_eq!(h.clips.created(), 1);
    }

    #[test]
    fn active_session_suppression_leaves_cooldown_anchor() {
        // Cooldown shorter than the recording: a candidate at t=3 falls
        // inside the session and must not move the anchor.
        let backend = ScriptedBackend::new()
            .with(0, person())
            .with(3, person())
            .with(6, person());
        let mut h = harness(backend, 2, 5);
        for seq in 0..=3 {
            h.pipeline.process_frame(frame(seq)).unwrap();
        }
        assert_eq!(h.pipeline.debouncer().last_alert_at(), Some(frame(0).captured_at()));
        for seq in 4..=6 {
            h.pipeline.process_frame(frame(seq)).unwrap();
        }
        assert_eq!(h.pipeline.debouncer().last_alert_at(), Some(frame(6).captured_at()));
        assert_eq!(h.pipeline.stats().suppressed_active, 1);
        assert_eq!(h.pipeline.stats().triggers, 2);
        assert_eq!(h.clips.clips().len(), 1);
    }

    #[test]
    fn detector_failure_counts_and_continues() {
        let backend = ScriptedBackend::new().fail_at(1).with(2, person());
        let mut h = harness(backend, 300, 10);
        let report = h.pipeline.process_frame(frame(1)).unwrap();
        assert!(report.classified.is_empty());
        assert!(h.pipeline.process_frame(frame(2)).unwrap().trigger.is_some());
        assert_eq!(h.pipeline.stats().detector_errors, 1);
    }

    #[test]
    fn pre_event_snapshot_includes_triggering_frame() {
        let backend = ScriptedBackend::new().with(7, person());
        let mut h = harness(backend, 300, 2);
        for seq in 1..=9 {
            h.pipeline.process_frame(frame(seq)).unwrap();
        }
        let clips = h.clips.clips();
        assert_eq!(clips.len(), 1);
        // Buffer of 5 at trigger (3..=7), then 8 appended, closed at 9.
        assert_eq!(clips[0].sequences, vec![3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn shutdown_force_closes_active_session() {
        let backend = ScriptedBackend::new().with(1, person());
        let mut h = harness(backend, 300, 10);
        h.pipeline.process_frame(frame(1)).unwrap();
        assert!(h.pipeline.is_recording());
        let (stats, dispatch) = h.pipeline.shutdown(Duration::from_millis(10));
        assert_eq!(stats.clips_completed, 1);
        assert_eq!(dispatch.skipped, 1);
        assert_eq!(h.clips.clips().len(), 1);
    }

    #[test]
    fn screenshot_writes_latest_frame() {
        let mut h = harness(ScriptedBackend::new(), 300, 10);
        assert!(h.pipeline.capture_screenshot().is_err());
        h.pipeline.process_frame(frame(1)).unwrap();
        let path = h.pipeline.capture_screenshot().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "capture_2024-03-01_12-00-01.jpg"
        );
        let again = h.pipeline.capture_screenshot().unwrap();
        assert_ne!(path, again);
        assert!(fs::read(&again).unwrap().starts_with(&[0xFF, 0xD8]));
    }
}
