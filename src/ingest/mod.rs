//! Frame ingestion sources.
//!
//! Live capture (RTSP, USB cameras, video files) is an external collaborator;
//! this crate ships only the synthetic `stub://` source used by the daemon's
//! dry-run mode, the demo and the tests.
//!
//! All sources produce `RawFrame` instances stamped from the injected `Clock`
//! with a monotonically increasing sequence number.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::clock::Clock;
use crate::frame::RawFrame;

pub mod synthetic;

pub use synthetic::SyntheticSource;

pub const STUB_SCHEME: &str = "stub://";

#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source URL; only `stub://...` is handled in-crate.
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://synthetic".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    fn next_frame(&mut self) -> Result<RawFrame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Open the source named by `config.url`.
pub fn open_source(config: SourceConfig, clock: Arc<dyn Clock>) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with(STUB_SCHEME) {
        return Ok(Box::new(SyntheticSource::new(config, clock)?));
    }
    Err(anyhow!(
        "unsupported source URL '{}': only {} sources are built in",
        config.url,
        STUB_SCHEME
    ))
}
