use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::{RawFrame, RGB8_CHANNELS};

/// Channel value above which a pixel counts as foreground.
const BRIGHT_THRESHOLD: u8 = 200;
/// Sample every Nth pixel in both directions.
const SAMPLE_STRIDE: u32 = 4;
const STUB_CONFIDENCE: f32 = 0.9;

/// Stub backend for synthetic scenes.
///
/// Reports the bounding box of bright pixels as a single object with a fixed
/// label. Paired with the synthetic source, whose "object" is a bright block
/// sweeping across a dark background.
pub struct StubBackend {
    label: String,
}

impl StubBackend {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new("person")
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &RawFrame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        if STUB_CONFIDENCE < confidence_threshold {
            return Ok(vec![]);
        }

        let (width, height) = (frame.width(), frame.height());
        let pixels = frame.pixels();
        let mut bounds: Option<(u32, u32, u32, u32)> = None;

        for y in (0..height).step_by(SAMPLE_STRIDE as usize) {
            for x in (0..width).step_by(SAMPLE_STRIDE as usize) {
                let offset = (y as usize * width as usize + x as usize) * RGB8_CHANNELS;
                let px = &pixels[offset..offset + RGB8_CHANNELS];
                if px.iter().all(|&c| c > BRIGHT_THRESHOLD) {
                    bounds = Some(match bounds {
                        None => (x, y, x, y),
                        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    });
                }
            }
        }

        Ok(bounds
            .map(|(x0, y0, x1, y1)| {
                let bbox = BoundingBox::new(
                    x0 as i32,
                    y0 as i32,
                    (x1 - x0 + SAMPLE_STRIDE) as i32,
                    (y1 - y0 + SAMPLE_STRIDE) as i32,
                );
                vec![Detection::new(&self.label, STUB_CONFIDENCE, bbox)]
            })
            .unwrap_or_default())
    }
}
