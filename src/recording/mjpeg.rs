//! Filesystem clip store: motion-JPEG AVI plus a JSON manifest.
//!
//! A clip is an AVI file whose single video stream holds baseline JPEG
//! frames at the source frame rate (`alert_YYYYMMDD_HHMMSS.avi`). It is
//! written to `<name>.avi.part` and renamed into place only once the
//! manifest is durable, so a crash never leaves a clip that looks complete.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::avi::AviMjpegWriter;
use super::{ClipArtifact, ClipMetadata, ClipStore, ClipWriter};
use crate::alert::TriggerAccepted;
use crate::frame::RawFrame;

pub const CLIP_EXTENSION: &str = "avi";
pub const MANIFEST_EXTENSION: &str = "json";
const PART_SUFFIX: &str = "part";
const DEFAULT_JPEG_QUALITY: u8 = 85;
/// Upper bound on `_N` suffixes tried for one second's worth of clips.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// `alert_YYYYMMDD_HHMMSS` for the trigger's acceptance time.
pub fn clip_stem(at: DateTime<Local>) -> String {
    format!("alert_{}", at.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone)]
pub struct FilesystemClipStore {
    root: PathBuf,
    fps: u32,
    jpeg_quality: u8,
}

impl FilesystemClipStore {
    pub fn new(root: impl Into<PathBuf>, fps: u32) -> Result<Self> {
        let root = root.into();
        if fps == 0 {
            return Err(anyhow!("clip fps must be greater than zero"));
        }
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create clip directory {}", root.display()))?;
        Ok(Self {
            root,
            fps,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        })
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unique_stem(&self, at: DateTime<Local>) -> Result<String> {
        let base = clip_stem(at);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stem = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}_{attempt}")
            };
            let clip = self.root.join(format!("{stem}.{CLIP_EXTENSION}"));
            let part = self.root.join(format!("{stem}.{CLIP_EXTENSION}.{PART_SUFFIX}"));
            if !clip.exists() && !part.exists() {
                return Ok(stem);
            }
        }
        Err(anyhow!("no free clip name for {}", base))
    }
}

impl ClipStore for FilesystemClipStore {
    fn create(&self, trigger: &TriggerAccepted) -> Result<Box<dyn ClipWriter>> {
        let stem = self.unique_stem(trigger.accepted_at)?;
        let final_path = self.root.join(format!("{stem}.{CLIP_EXTENSION}"));
        let part_path = self
            .root
            .join(format!("{stem}.{CLIP_EXTENSION}.{PART_SUFFIX}"));
        let manifest_path = self.root.join(format!("{stem}.{MANIFEST_EXTENSION}"));

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part_path)
            .with_context(|| format!("failed to create clip {}", part_path.display()))?;

        let avi = match AviMjpegWriter::new(BufWriter::new(file), self.fps) {
            Ok(avi) => avi,
            Err(err) => {
                let _ = fs::remove_file(&part_path);
                return Err(err);
            }
        };

        Ok(Box::new(MjpegClipWriter {
            final_path,
            part_path,
            manifest_path,
            avi,
            resolution: None,
            fps: self.fps,
            quality: self.jpeg_quality,
            scratch: Vec::new(),
        }))
    }
}

struct MjpegClipWriter {
    final_path: PathBuf,
    part_path: PathBuf,
    manifest_path: PathBuf,
    avi: AviMjpegWriter<BufWriter<File>>,
    resolution: Option<(u32, u32)>,
    fps: u32,
    quality: u8,
    scratch: Vec<u8>,
}

#[derive(Serialize)]
struct ClipManifest<'a> {
    clip: &'a str,
    format: &'static str,
    fps: u32,
    width: u32,
    height: u32,
    frames: u64,
    labels: &'a [String],
    zone: &'a str,
    started_at: String,
    closed_at: String,
    sha256: &'a str,
}

impl MjpegClipWriter {
    fn commit(self, meta: &ClipMetadata) -> Result<ClipArtifact> {
        let frames = self.avi.frames();
        let (width, height) = self.resolution.unwrap_or((0, 0));
        let file = self
            .avi
            .finish()?
            .into_inner()
            .map_err(|err| anyhow!("failed to flush clip: {}", err.error()))?;
        file.sync_all()?;
        drop(file);

        let sha256 = sha256_file(&self.part_path)?;
        let labels: Vec<String> = meta.labels.iter().cloned().collect();
        let clip_name = self
            .final_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        let manifest = ClipManifest {
            clip: clip_name,
            format: "avi/mjpeg",
            fps: self.fps,
            width,
            height,
            frames,
            labels: &labels,
            zone: &meta.zone,
            started_at: meta.started_at.to_rfc3339(),
            closed_at: meta.closed_at.to_rfc3339(),
            sha256: &sha256,
        };
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&self.manifest_path, &bytes)?;
        fs::rename(&self.part_path, &self.final_path).with_context(|| {
            format!(
                "failed to publish clip {} -> {}",
                self.part_path.display(),
                self.final_path.display()
            )
        })?;

        if frames != meta.frames_written {
            log::warn!(
                "clip {} holds {} frames, session counted {}",
                self.final_path.display(),
                frames,
                meta.frames_written
            );
        }

        Ok(ClipArtifact {
            path: self.final_path,
            manifest_path: Some(self.manifest_path),
            labels,
            zone: meta.zone.clone(),
            started_at: meta.started_at,
            closed_at: meta.closed_at,
            frames_written: frames,
            width,
            height,
            sha256,
        })
    }
}

impl ClipWriter for MjpegClipWriter {
    fn path(&self) -> &Path {
        &self.final_path
    }

    fn append(&mut self, frame: &RawFrame) -> Result<()> {
        let dims = (frame.width(), frame.height());
        if let Some(expected) = self.resolution {
            if expected != dims {
                return Err(anyhow!(
                    "frame {} is {}x{}, clip is {}x{}",
                    frame.sequence(),
                    dims.0,
                    dims.1,
                    expected.0,
                    expected.1
                ));
            }
        }

        self.scratch.clear();
        JpegEncoder::new_with_quality(&mut self.scratch, self.quality)
            .encode(frame.pixels(), dims.0, dims.1, ExtendedColorType::Rgb8)
            .with_context(|| format!("failed to encode frame {}", frame.sequence()))?;
        self.avi
            .write_frame(&self.scratch, dims.0, dims.1)
            .with_context(|| format!("failed to write frame {}", frame.sequence()))?;
        if self.resolution.is_none() {
            self.resolution = Some(dims);
        }
        Ok(())
    }

    fn finalize(self: Box<Self>, meta: &ClipMetadata) -> Result<ClipArtifact> {
        let part_path = self.part_path.clone();
        let manifest_path = self.manifest_path.clone();
        (*self).commit(meta).inspect_err(|_| {
            let _ = fs::remove_file(&part_path);
            let _ = fs::remove_file(&manifest_path);
        })
    }

    fn discard(self: Box<Self>) -> Result<()> {
        let MjpegClipWriter { part_path, avi, .. } = *self;
        drop(avi);
        match fs::remove_file(&part_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove partial clip {}", part_path.display())),
        }
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to reopen clip {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn trigger() -> TriggerAccepted {
        TriggerAccepted {
            accepted_at: Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap(),
            labels: BTreeSet::from(["car".to_string(), "person".to_string()]),
            zone: "Zone1".to_string(),
        }
    }

    fn meta(frames: u64) -> ClipMetadata {
        let t = trigger();
        ClipMetadata {
            session_id: 1,
            labels: t.labels,
            zone: t.zone,
            started_at: t.accepted_at,
            closed_at: t.accepted_at,
            frames_written: frames,
        }
    }

    fn frame(seq: u64, w: u32, h: u32) -> RawFrame {
        RawFrame::filled(seq, Local::now(), w, h, (seq * 40) as u8).unwrap()
    }

    #[test]
    fn finalize_publishes_clip_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemClipStore::new(dir.path(), 30).unwrap();
        let mut writer = store.create(&trigger()).unwrap();
        assert_eq!(
            writer.path(),
            dir.path().join("alert_20240301_123005.avi")
        );
        writer.append(&frame(1, 16, 8)).unwrap();
        writer.append(&frame(2, 16, 8)).unwrap();
        let artifact = writer.finalize(&meta(2)).unwrap();

        assert!(artifact.path.exists());
        assert!(!dir
            .path()
            .join("alert_20240301_123005.avi.part")
            .exists());
        let bytes = fs::read(&artifact.path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        // strh rate field, then the first 00dc chunk's JPEG start marker.
        assert_eq!(u32::from_le_bytes(bytes[132..136].try_into().unwrap()), 30);
        assert_eq!(&bytes[224..228], b"00dc");
        assert_eq!(&bytes[232..234], &[0xFF, 0xD8]);
        assert_eq!(artifact.sha256, hex::encode(Sha256::digest(&bytes)));

        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(artifact.manifest_path.unwrap()).unwrap()).unwrap();
        assert_eq!(manifest["frames"], 2);
        assert_eq!(manifest["fps"], 30);
        assert_eq!(manifest["format"], "avi/mjpeg");
        assert_eq!(manifest["width"], 16);
        assert_eq!(manifest["labels"], serde_json::json!(["car", "person"]));
        assert_eq!(manifest["sha256"], artifact.sha256);
    }

    #[test]
    fn colliding_names_get_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemClipStore::new(dir.path(), 30).unwrap();
        let first = store.create(&trigger()).unwrap();
        let second = store.create(&trigger()).unwrap();
        assert_eq!(
            second.path(),
            dir.path().join("alert_20240301_123005_1.avi")
        );
        first.discard().unwrap();
        second.discard().unwrap();
    }

    #[test]
    fn resolution_change_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemClipStore::new(dir.path(), 30).unwrap();
        let mut writer = store.create(&trigger()).unwrap();
        writer.append(&frame(1, 16, 8)).unwrap();
        assert!(writer.append(&frame(2, 8, 8)).is_err());
        writer.discard().unwrap();
    }

    #[test]
    fn discard_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemClipStore::new(dir.path(), 30).unwrap();
        let mut writer = store.create(&trigger()).unwrap();
        writer.append(&frame(1, 16, 8)).unwrap();
        writer.discard().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
