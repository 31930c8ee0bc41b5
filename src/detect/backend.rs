use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::RawFrame;

/// Object detector boundary.
///
/// The model itself is an external collaborator. Implementations receive a
/// frame and a caller-supplied confidence threshold and return only the boxes
/// that survive thresholding and suppression, in absolute pixel coordinates.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &RawFrame, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
