use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::sync::Arc;

use crate::detect::result::{ClassifiedDetection, Detection};
use crate::zone::{ZoneRegistry, OUTSIDE_ZONE};

/// Counters for the classifier boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub classified: u64,
    pub rejected: u64,
}

/// Stateless per-detection transformation: zone assignment plus alert-class
/// membership. Malformed detections are dropped here and only counted.
pub struct DetectionClassifier {
    zones: Arc<ZoneRegistry>,
    alert_labels: HashSet<String>,
    stats: ClassifierStats,
}

impl DetectionClassifier {
    pub fn new<I, S>(zones: Arc<ZoneRegistry>, alert_labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            zones,
            alert_labels: alert_labels
                .into_iter()
                .map(|label| label.as_ref().trim().to_lowercase())
                .collect(),
            stats: ClassifierStats::default(),
        }
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }

    pub fn is_alert_label(&self, label: &str) -> bool {
        self.alert_labels.contains(&label.trim().to_lowercase())
    }

    /// Classify one detection, or `None` if it is malformed.
    pub fn classify(
        &mut self,
        detection: &Detection,
        frame_timestamp: DateTime<Local>,
    ) -> Option<ClassifiedDetection> {
        if detection.bbox.is_degenerate() {
            log::warn!(
                "dropping detection '{}': non-positive box {}x{}",
                detection.label,
                detection.bbox.w,
                detection.bbox.h
            );
            self.stats.rejected += 1;
            return None;
        }
        // NaN fails the range check too.
        if !(detection.confidence > 0.0 && detection.confidence <= 1.0) {
            log::warn!(
                "dropping detection '{}': confidence {} outside (0, 1]",
                detection.label,
                detection.confidence
            );
            self.stats.rejected += 1;
            return None;
        }

        let (in_zone, zone_name) = match self.zones.first_containing(detection.bbox.center()) {
            Some(zone) => (true, zone.name().to_string()),
            None => (false, OUTSIDE_ZONE.to_string()),
        };

        self.stats.classified += 1;
        Some(ClassifiedDetection {
            detection: detection.clone(),
            frame_timestamp,
            in_zone,
            zone_name,
            is_alert_class: self.is_alert_label(&detection.label),
        })
    }

    /// Classify all detections of one frame, preserving detector order.
    pub fn classify_frame(
        &mut self,
        detections: &[Detection],
        frame_timestamp: DateTime<Local>,
    ) -> Vec<ClassifiedDetection> {
        detections
            .iter()
            .filter_map(|det| self.classify(det, frame_timestamp))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;
    use crate::zone::Zone;

    fn classifier() -> DetectionClassifier {
        let zones = ZoneRegistry::new(vec![
            Zone::rect("Zone1", 400, 100, 250, 350).unwrap(),
            Zone::rect("Zone2", 600, 300, 200, 200).unwrap(),
        ])
        .unwrap();
        DetectionClassifier::new(Arc::new(zones), ["Person", "car"])
    }

    #[test]
    fn assigns_first_matching_zone_in_registration_order() {
        let mut c = classifier();
        let det = Detection::new("person", 0.8, BoundingBox::centered(620, 320, 40, 40));
        let out = c.classify(&det, Local::now()).unwrap();
        assert!(out.in_zone);
        assert_eq!(out.zone_name, "Zone1");
        assert!(out.is_alert_candidate());
    }

    #[test]
    fn outside_detection_is_not_alert_candidate() {
        let mut c = classifier();
        let det = Detection::new("person", 0.8, BoundingBox::centered(50, 50, 20, 20));
        let out = c.classify(&det, Local::now()).unwrap();
        assert!(!out.in_zone);
        assert_eq!(out.zone_name, OUTSIDE_ZONE);
        assert!(out.is_alert_class);
        assert!(!out.is_alert_candidate());
    }

    #[test]
    fn alert_labels_match_case_insensitively() {
        let mut c = classifier();
        let det = Detection::new("CAR", 0.6, BoundingBox::centered(500, 200, 10, 10));
        assert!(c.classify(&det, Local::now()).unwrap().is_alert_class);
        let det = Detection::new("dog", 0.6, BoundingBox::centered(500, 200, 10, 10));
        assert!(!c.classify(&det, Local::now()).unwrap().is_alert_class);
    }

    #[test]
    fn rejects_malformed_detections_and_counts_them() {
        let mut c = classifier();
        let now = Local::now();
        let bad = [
            Detection::new("person", 0.8, BoundingBox::new(500, 200, 0, 10)),
            Detection::new("person", 0.8, BoundingBox::new(500, 200, 10, -1)),
            Detection::new("person", 0.0, BoundingBox::new(500, 200, 10, 10)),
            Detection::new("person", 1.5, BoundingBox::new(500, 200, 10, 10)),
            Detection::new("person", f32::NAN, BoundingBox::new(500, 200, 10, 10)),
        ];
        let good = Detection::new("person", 1.0, BoundingBox::new(500, 200, 10, 10));
        let mut all = bad.to_vec();
        all.push(good);
        let out = c.classify_frame(&all, now);
        assert_eq!(out.len(), 1);
        assert_eq!(
            c.stats(),
            ClassifierStats {
                classified: 1,
                rejected: 5
            }
        );
    }
}
