use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::RawFrame;

/// Backend that replays pre-programmed detections keyed by frame sequence.
///
/// Used by the deterministic demo and by tests. Sequences with no script
/// produce no detections; sequences marked with `fail_at` return an error.
#[derive(Default)]
pub struct ScriptedBackend {
    script: HashMap<u64, Vec<Detection>>,
    failures: HashSet<u64>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sequence: u64, detections: Vec<Detection>) -> Self {
        self.script.entry(sequence).or_default().extend(detections);
        self
    }

    pub fn fail_at(mut self, sequence: u64) -> Self {
        self.failures.insert(sequence);
        self
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &RawFrame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        if self.failures.contains(&frame.sequence()) {
            return Err(anyhow!(
                "scripted detector failure at frame {}",
                frame.sequence()
            ));
        }
        Ok(self
            .script
            .get(&frame.sequence())
            .map(|dets| {
                dets.iter()
                    .filter(|d| d.confidence >= confidence_threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
