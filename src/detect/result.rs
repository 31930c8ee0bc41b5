use chrono::{DateTime, Local};

use crate::zone::Point;

/// Bounding box in absolute pixel coordinates: top-left corner plus size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Box of size `w`x`h` centred on `(cx, cy)`.
    pub fn centered(cx: i32, cy: i32, w: i32, h: i32) -> Self {
        Self {
            x: cx - w / 2,
            y: cy - h / 2,
            w,
            h,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            f64::from(self.x) + f64::from(self.w) / 2.0,
            f64::from(self.y) + f64::from(self.h) / 2.0,
        )
    }

    pub fn is_degenerate(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }
}

/// One detector output for one frame, after confidence filtering and
/// suppression.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Expected in (0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: &str, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.to_string(),
            confidence,
            bbox,
        }
    }
}

/// A detection enriched with zone membership and alert eligibility.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedDetection {
    pub detection: Detection,
    pub frame_timestamp: DateTime<Local>,
    pub in_zone: bool,
    /// Matching zone name, or `"Outside"`.
    pub zone_name: String,
    pub is_alert_class: bool,
}

impl ClassifiedDetection {
    /// Alert-eligible class observed inside a zone.
    pub fn is_alert_candidate(&self) -> bool {
        self.is_alert_class && self.in_zone
    }
}
