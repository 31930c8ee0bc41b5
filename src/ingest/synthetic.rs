use anyhow::{anyhow, Result};
use std::sync::Arc;

use super::{FrameSource, SourceConfig, SourceStats};
use crate::clock::Clock;
use crate::frame::{RawFrame, RGB8_CHANNELS};

const BACKGROUND: u8 = 30;
const FOREGROUND: u8 = 255;
/// Seconds per sweep cycle; the object is visible for the first half.
const CYCLE_SECS: u64 = 20;

/// Synthetic scene: a dark background with a bright square that sweeps left
/// to right along the upper third of the frame, then leaves for a while.
///
/// Pairs with `StubBackend`, which reports the square as an object.
pub struct SyntheticSource {
    config: SourceConfig,
    clock: Arc<dyn Clock>,
    frame_count: u64,
    block: u32,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic source needs non-zero dimensions"));
        }
        if config.target_fps == 0 {
            return Err(anyhow!("synthetic source needs a non-zero frame rate"));
        }
        let block = (config.width.min(config.height) / 8).max(1);
        Ok(Self {
            config,
            clock,
            frame_count: 0,
            block,
        })
    }

    /// Top-left corner of the object at `frame`, or `None` when off-screen.
    pub fn object_position(&self, frame: u64) -> Option<(u32, u32)> {
        let cycle = CYCLE_SECS * u64::from(self.config.target_fps);
        let visible = cycle / 2;
        let phase = frame % cycle;
        if phase >= visible {
            return None;
        }
        let travel = u64::from(self.config.width.saturating_sub(self.block));
        let x = (travel * phase / visible.max(1)) as u32;
        let y = self.config.height / 3;
        Some((x, y.min(self.config.height.saturating_sub(self.block))))
    }

    fn render(&self, frame: u64) -> Vec<u8> {
        let (width, height) = (self.config.width as usize, self.config.height as usize);
        let mut pixels = vec![BACKGROUND; width * height * RGB8_CHANNELS];
        if let Some((x0, y0)) = self.object_position(frame) {
            let block = self.block as usize;
            let (x0, y0) = (x0 as usize, y0 as usize);
            for y in y0..(y0 + block).min(height) {
                let row = y * width * RGB8_CHANNELS;
                let start = row + x0 * RGB8_CHANNELS;
                let end = row + (x0 + block).min(width) * RGB8_CHANNELS;
                pixels[start..end].fill(FOREGROUND);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame> {
        let index = self.frame_count;
        self.frame_count += 1;
        RawFrame::new(
            self.frame_count,
            self.clock.now(),
            self.config.width,
            self.config.height,
            self.render(index),
        )
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::{DetectorBackend, StubBackend};
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    fn source(clock: Arc<ManualClock>) -> SyntheticSource {
        SyntheticSource::new(
            SourceConfig {
                url: "stub://test".to_string(),
                target_fps: 10,
                width: 160,
                height: 120,
            },
            clock,
        )
        .unwrap()
    }

    #[test]
    fn frames_carry_sequence_and_clock_time() -> Result<()> {
        let start = Local.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let mut src = source(Arc::clone(&clock));
        let first = src.next_frame()?;
        clock.advance(Duration::from_millis(100));
        let second = src.next_frame()?;
        assert_eq!((first.sequence(), second.sequence()), (1, 2));
        assert_eq!(first.captured_at(), start);
        assert_eq!(second.captured_at() - start, chrono::Duration::milliseconds(100));
        assert_eq!(src.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn object_sweeps_then_leaves() {
        let clock = Arc::new(ManualClock::new(Local::now()));
        let src = source(clock);
        let (x_start, _) = src.object_position(0).unwrap();
        let (x_mid, _) = src.object_position(50).unwrap();
        assert!(x_mid > x_start);
        assert!(src.object_position(100).is_none());
        assert!(src.object_position(200).is_some());
    }

    #[test]
    fn stub_backend_sees_the_object() -> Result<()> {
        let clock = Arc::new(ManualClock::new(Local::now()));
        let mut src = source(clock);
        let frame = src.next_frame()?;
        let detections = StubBackend::default().detect(&frame, 0.5)?;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox.y, 40);
        Ok(())
    }
}
