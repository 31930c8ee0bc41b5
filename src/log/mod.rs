use chrono::{DateTime, Local, NaiveDate};

use crate::detect::ClassifiedDetection;

/// Column layout read by the external dashboard and analytics tools.
pub const CSV_HEADER: &str = "Timestamp,Object,Confidence,In_ROI,Zone,Alert_Triggered";

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Daily partition file name, e.g. `detections_2024-03-01.csv`.
pub fn partition_file_name(date: NaiveDate) -> String {
    format!("detections_{}.csv", date.format("%Y-%m-%d"))
}

/// One row of the detection log.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionLogEntry {
    pub timestamp: DateTime<Local>,
    pub label: String,
    pub confidence: f32,
    pub in_zone: bool,
    pub zone_name: String,
    /// Alert class inside a zone, decided before debouncing.
    pub alert_triggered: bool,
}

impl DetectionLogEntry {
    pub fn from_classified(det: &ClassifiedDetection) -> Self {
        Self {
            timestamp: det.frame_timestamp,
            label: det.detection.label.clone(),
            confidence: det.detection.confidence,
            in_zone: det.in_zone,
            zone_name: det.zone_name.clone(),
            alert_triggered: det.is_alert_candidate(),
        }
    }

    pub fn partition_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// CSV line including the trailing newline.
    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{:.2},{},{},{}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            csv_field(&self.label),
            self.confidence,
            py_bool(self.in_zone),
            csv_field(&self.zone_name),
            py_bool(self.alert_triggered)
        )
    }
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Quote a field when it contains a separator, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use chrono::TimeZone;

    fn classified(label: &str, in_zone: bool, is_alert: bool, zone: &str) -> ClassifiedDetection {
        ClassifiedDetection {
            detection: Detection::new(label, 0.876, BoundingBox::new(0, 0, 4, 4)),
            frame_timestamp: Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap(),
            in_zone,
            zone_name: zone.to_string(),
            is_alert_class: is_alert,
        }
    }

    #[test]
    fn formats_row_like_original_log() {
        let entry = DetectionLogEntry::from_classified(&classified("person", true, true, "Zone1"));
        assert!(entry.alert_triggered);
        assert_eq!(entry.csv_row(), "2024-03-01 09:05:07,person,0.88,True,Zone1,True\n");
    }

    #[test]
    fn alert_flag_requires_zone_and_class() {
        let outside = DetectionLogEntry::from_classified(&classified("person", false, true, "Outside"));
        assert!(!outside.alert_triggered);
        let other = DetectionLogEntry::from_classified(&classified("dog", true, false, "Zone1"));
        assert!(!other.alert_triggered);
        assert_eq!(other.csv_row(), "2024-03-01 09:05:07,dog,0.88,True,Zone1,False\n");
    }

    #[test]
    fn quotes_fields_with_separators() {
        assert_eq!(csv_field("Zone 1"), "Zone 1");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn partition_name_uses_local_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(partition_file_name(date), "detections_2024-03-01.csv");
    }
}
