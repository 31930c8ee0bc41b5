use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::log::{partition_file_name, DetectionLogEntry, CSV_HEADER};

/// Append-only sink for detection log rows.
///
/// Implementations serialise concurrent appends so rows never interleave.
pub trait DetectionLogStore: Send + Sync {
    fn append(&self, entry: &DetectionLogEntry) -> Result<()>;

    fn rows_written(&self) -> u64;
}

struct OpenPartition {
    date: NaiveDate,
    path: PathBuf,
    file: File,
}

/// CSV log partitioned by local calendar date under one directory.
pub struct DailyCsvLog {
    dir: PathBuf,
    current: Mutex<Option<OpenPartition>>,
    rows: AtomicU64,
}

impl DailyCsvLog {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
            rows: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(partition_file_name(date))
    }

    fn open_partition(&self, date: NaiveDate) -> Result<OpenPartition> {
        let path = self.partition_path(date);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open detection log {}", path.display()))?;
        if file.metadata()?.len() == 0 {
            file.write_all(format!("{CSV_HEADER}\n").as_bytes())?;
            file.flush()?;
        }
        log::debug!("detection log partition {}", path.display());
        Ok(OpenPartition { date, path, file })
    }
}

impl DetectionLogStore for DailyCsvLog {
    fn append(&self, entry: &DetectionLogEntry) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("detection log lock poisoned"))?;

        let date = entry.partition_date();
        if current.as_ref().map(|p| p.date) != Some(date) {
            *current = Some(self.open_partition(date)?);
        }
        let partition = current
            .as_mut()
            .ok_or_else(|| anyhow!("detection log partition missing"))?;

        partition
            .file
            .write_all(entry.csv_row().as_bytes())
            .and_then(|_| partition.file.flush())
            .with_context(|| format!("failed to append to {}", partition.path.display()))?;
        self.rows.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }
}

/// Keeps rows in memory; for tests.
#[derive(Default)]
pub struct InMemoryDetectionLog {
    rows: Mutex<Vec<DetectionLogEntry>>,
}

impl InMemoryDetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Result<Vec<DetectionLogEntry>> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .map_err(|_| anyhow!("in-memory detection log lock poisoned"))
    }
}

impl DetectionLogStore for InMemoryDetectionLog {
    fn append(&self, entry: &DetectionLogEntry) -> Result<()> {
        self.rows
            .lock()
            .map_err(|_| anyhow!("in-memory detection log lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows.lock().map(|rows| rows.len() as u64).unwrap_or(0)
    }
}
