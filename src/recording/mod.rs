//! Evidence recording.
//!
//! A `Recorder` owns at most one `RecordingSession` at a time:
//!
//! - `INACTIVE -> ACTIVE` on an accepted trigger: a clip is allocated from the
//!   `ClipStore` and seeded with the ring buffer snapshot (pre-event frames).
//! - While `ACTIVE`, every processed frame is appended.
//! - `ACTIVE -> INACTIVE` once `target_duration` has elapsed since the
//!   trigger: the clip is finalized and handed back as a `ClipArtifact`.
//!
//! Clips are finalize-or-discard: any create/write failure discards the
//! partial artifact and returns the recorder to `INACTIVE`.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::alert::TriggerAccepted;
use crate::clock::has_elapsed;
use crate::frame::RawFrame;

mod avi;
mod mjpeg;
mod memory;

pub use avi::AviMjpegWriter;
pub use mjpeg::{clip_stem, FilesystemClipStore, CLIP_EXTENSION, MANIFEST_EXTENSION};
pub use memory::{InMemoryClipStore, StoredClip};

/// Session facts passed to the writer when the clip is closed.
#[derive(Clone, Debug)]
pub struct ClipMetadata {
    pub session_id: u64,
    pub labels: BTreeSet<String>,
    pub zone: String,
    pub started_at: DateTime<Local>,
    pub closed_at: DateTime<Local>,
    pub frames_written: u64,
}

/// A finalized evidence clip. Ownership passes to the notification path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClipArtifact {
    pub path: PathBuf,
    pub manifest_path: Option<PathBuf>,
    pub labels: Vec<String>,
    pub zone: String,
    pub started_at: DateTime<Local>,
    pub closed_at: DateTime<Local>,
    pub frames_written: u64,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

/// Output sink for one clip.
pub trait ClipWriter: Send {
    fn path(&self) -> &Path;

    fn append(&mut self, frame: &RawFrame) -> Result<()>;

    /// Flush and publish the clip. On error the partial artifact is removed.
    fn finalize(self: Box<Self>, meta: &ClipMetadata) -> Result<ClipArtifact>;

    /// Drop the partial artifact.
    fn discard(self: Box<Self>) -> Result<()>;
}

/// Allocates clip writers, one per accepted trigger.
pub trait ClipStore: Send {
    fn create(&self, trigger: &TriggerAccepted) -> Result<Box<dyn ClipWriter>>;
}

pub struct RecordingSession {
    id: u64,
    started_at: DateTime<Local>,
    triggering_labels: BTreeSet<String>,
    zone: String,
    target_duration: Duration,
    frames_written: u64,
    writer: Box<dyn ClipWriter>,
}

impl RecordingSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn triggering_labels(&self) -> &BTreeSet<String> {
        &self.triggering_labels
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn output_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        has_elapsed(now, self.started_at, self.target_duration)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session was already active; the trigger was dropped.
    AlreadyActive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct Recorder {
    store: Box<dyn ClipStore>,
    target_duration: Duration,
    active: Option<RecordingSession>,
    next_id: u64,
    stats: RecorderStats,
}

impl Recorder {
    pub fn new(store: Box<dyn ClipStore>, target_duration: Duration) -> Self {
        Self {
            store,
            target_duration,
            active: None,
            next_id: 1,
            stats: RecorderStats::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_session(&self) -> Option<&RecordingSession> {
        self.active.as_ref()
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    pub fn target_duration(&self) -> Duration {
        self.target_duration
    }

    /// Open a session for `trigger`, seeded with `pre_event` (oldest first).
    pub fn start(
        &mut self,
        trigger: &TriggerAccepted,
        pre_event: &[Arc<RawFrame>],
    ) -> Result<StartOutcome> {
        if let Some(session) = &self.active {
            log::debug!(
                "recording session {} already active; trigger at {} dropped",
                session.id,
                trigger.accepted_at
            );
            return Ok(StartOutcome::AlreadyActive);
        }

        let mut writer = match self.store.create(trigger) {
            Ok(writer) => writer,
            Err(err) => {
                self.stats.failed += 1;
                return Err(err.context("failed to allocate evidence clip"));
            }
        };

        for frame in pre_event {
            if let Err(err) = writer.append(frame) {
                self.stats.failed += 1;
                if let Err(discard_err) = writer.discard() {
                    log::warn!("failed to discard partial clip: {}", discard_err);
                }
                return Err(err.context("failed to write pre-event frames"));
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.stats.started += 1;
        log::info!(
            "recording session {} started: {} labels=[{}] zone={} pre_event_frames={}",
            id,
            writer.path().display(),
            trigger.labels_joined(),
            trigger.zone,
            pre_event.len()
        );
        self.active = Some(RecordingSession {
            id,
            started_at: trigger.accepted_at,
            triggering_labels: trigger.labels.clone(),
            zone: trigger.zone.clone(),
            target_duration: self.target_duration,
            frames_written: pre_event.len() as u64,
            writer,
        });
        Ok(StartOutcome::Started)
    }

    /// Feed one processed frame to the active session, if any.
    ///
    /// Returns the finalized clip when the session's duration has elapsed at
    /// this frame's capture time; the frame itself is then not appended.
    pub fn on_frame(&mut self, frame: &RawFrame) -> Result<Option<ClipArtifact>> {
        let Some(session) = self.active.as_mut() else {
            return Ok(None);
        };

        if session.is_expired(frame.captured_at()) {
            return self.finish(frame.captured_at()).map(Some);
        }

        match session.writer.append(frame) {
            Ok(()) => {
                session.frames_written += 1;
                Ok(None)
            }
            Err(err) => {
                self.abort();
                Err(err.context("failed to append frame to evidence clip"))
            }
        }
    }

    /// Close the active session early (shutdown path).
    pub fn force_close(&mut self, now: DateTime<Local>) -> Result<Option<ClipArtifact>> {
        if self.active.is_none() {
            return Ok(None);
        }
        self.finish(now).map(Some)
    }

    fn finish(&mut self, closed_at: DateTime<Local>) -> Result<ClipArtifact> {
        let session = self
            .active
            .take()
            .context("no active recording session to finish")?;
        let meta = ClipMetadata {
            session_id: session.id,
            labels: session.triggering_labels,
            zone: session.zone,
            started_at: session.started_at,
            closed_at,
            frames_written: session.frames_written,
        };
        match session.writer.finalize(&meta) {
            Ok(artifact) => {
                self.stats.completed += 1;
                log::info!(
                    "recording session {} closed: {} frames -> {}",
                    meta.session_id,
                    artifact.frames_written,
                    artifact.path.display()
                );
                Ok(artifact)
            }
            Err(err) => {
                self.stats.failed += 1;
                Err(err.context(format!(
                    "failed to finalize recording session {}",
                    meta.session_id
                )))
            }
        }
    }

    fn abort(&mut self) {
        if let Some(session) = self.active.take() {
            self.stats.failed += 1;
            log::warn!(
                "recording session {} aborted after {} frames",
                session.id,
                session.frames_written
            );
            if let Err(err) = session.writer.discard() {
                log::warn!("failed to discard partial clip: {}", err);
            }
        }
    }
}
