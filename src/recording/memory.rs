use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{clip_stem, ClipArtifact, ClipMetadata, ClipStore, ClipWriter};
use crate::alert::TriggerAccepted;
use crate::frame::RawFrame;

/// A clip kept by `InMemoryClipStore`.
#[derive(Clone, Debug)]
pub struct StoredClip {
    pub artifact: ClipArtifact,
    /// Sequence numbers of the frames written, in write order.
    pub sequences: Vec<u64>,
}

#[derive(Default)]
struct Shared {
    clips: Mutex<Vec<StoredClip>>,
    created: AtomicU64,
    discarded: AtomicU64,
}

/// Clip store that keeps finalized clips in memory. Cloning shares the store,
/// so a test can hand one clone to the recorder and inspect the other.
#[derive(Clone, Default)]
pub struct InMemoryClipStore {
    shared: Arc<Shared>,
    fail_create: bool,
    fail_after_frames: Option<u64>,
}

impl InMemoryClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` call fails.
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Writers fail on the append after `frames` successful ones.
    pub fn fail_after_frames(mut self, frames: u64) -> Self {
        self.fail_after_frames = Some(frames);
        self
    }

    pub fn clips(&self) -> Vec<StoredClip> {
        self.shared
            .clips
            .lock()
            .map(|clips| clips.clone())
            .unwrap_or_default()
    }

    pub fn created(&self) -> u64 {
        self.shared.created.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.shared.discarded.load(Ordering::Relaxed)
    }
}

impl ClipStore for InMemoryClipStore {
    fn create(&self, trigger: &TriggerAccepted) -> Result<Box<dyn ClipWriter>> {
        if self.fail_create {
            return Err(anyhow!("in-memory clip store configured to fail"));
        }
        let n = self.shared.created.fetch_add(1, Ordering::Relaxed);
        let path = PathBuf::from(format!("memory/{}_{}", clip_stem(trigger.accepted_at), n));
        Ok(Box::new(InMemoryClipWriter {
            shared: Arc::clone(&self.shared),
            path,
            sequences: Vec::new(),
            resolution: None,
            fail_after_frames: self.fail_after_frames,
        }))
    }
}

struct InMemoryClipWriter {
    shared: Arc<Shared>,
    path: PathBuf,
    sequences: Vec<u64>,
    resolution: Option<(u32, u32)>,
    fail_after_frames: Option<u64>,
}

impl ClipWriter for InMemoryClipWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, frame: &RawFrame) -> Result<()> {
        if self
            .fail_after_frames
            .is_some_and(|limit| self.sequences.len() as u64 >= limit)
        {
            return Err(anyhow!("in-memory clip write failure"));
        }
        self.resolution.get_or_insert((frame.width(), frame.height()));
        self.sequences.push(frame.sequence());
        Ok(())
    }

    fn finalize(self: Box<Self>, meta: &ClipMetadata) -> Result<ClipArtifact> {
        let InMemoryClipWriter {
            shared,
            path,
            sequences,
            resolution,
            ..
        } = *self;
        let (width, height) = resolution.unwrap_or((0, 0));
        let artifact = ClipArtifact {
            path,
            manifest_path: None,
            labels: meta.labels.iter().cloned().collect(),
            zone: meta.zone.clone(),
            started_at: meta.started_at,
            closed_at: meta.closed_at,
            frames_written: sequences.len() as u64,
            width,
            height,
            sha256: String::new(),
        };
        let mut clips = shared
            .clips
            .lock()
            .map_err(|_| anyhow!("in-memory clip store lock poisoned"))?;
        clips.push(StoredClip {
            artifact: artifact.clone(),
            sequences,
        });
        Ok(artifact)
    }

    fn discard(self: Box<Self>) -> Result<()> {
        self.shared.discarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
