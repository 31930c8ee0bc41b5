//! Alert debouncer.
//!
//! Turns a burst of alert-eligible frames into at most one accepted trigger
//! per cooldown window. Cooldown is not stored as a state: it is the guard
//! `elapsed(now, last_alert_at) < cooldown`, evaluated on demand.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::clock::has_elapsed;
use crate::detect::ClassifiedDetection;

/// Alert-eligible, in-zone observations of one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlertInput {
    /// Lower-cased labels, sorted and de-duplicated.
    pub labels: BTreeSet<String>,
    /// Zone of the first alert candidate in detector order.
    pub zone: Option<String>,
}

impl AlertInput {
    pub fn from_classified(classified: &[ClassifiedDetection]) -> Self {
        let mut input = AlertInput::default();
        for det in classified.iter().filter(|d| d.is_alert_candidate()) {
            input.labels.insert(det.detection.label.to_lowercase());
            if input.zone.is_none() {
                input.zone = Some(det.zone_name.clone());
            }
        }
        input
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Emitted when the debouncer accepts an alert condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerAccepted {
    pub accepted_at: DateTime<Local>,
    pub labels: BTreeSet<String>,
    pub zone: String,
}

impl TriggerAccepted {
    pub fn labels_joined(&self) -> String {
        self.labels.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

#[derive(Debug)]
pub struct AlertDebouncer {
    cooldown: Duration,
    last_alert_at: Option<DateTime<Local>>,
    suppressed: u64,
}

impl AlertDebouncer {
    pub fn new(cooldown: Duration) -> Result<Self> {
        if cooldown.is_zero() {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        Ok(Self {
            cooldown,
            last_alert_at: None,
            suppressed: 0,
        })
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_alert_at(&self) -> Option<DateTime<Local>> {
        self.last_alert_at
    }

    /// Inputs dropped because they arrived inside a cooldown window.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn in_cooldown(&self, now: DateTime<Local>) -> bool {
        self.last_alert_at
            .is_some_and(|last| !has_elapsed(now, last, self.cooldown))
    }

    /// Accept or drop the frame's alert input. Dropped inputs are neither
    /// queued nor merged into a later trigger.
    pub fn evaluate(&mut self, now: DateTime<Local>, input: &AlertInput) -> Option<TriggerAccepted> {
        if input.is_empty() {
            return None;
        }
        if self.in_cooldown(now) {
            self.suppressed += 1;
            log::debug!(
                "alert suppressed by cooldown: labels={:?} remaining cooldown from {:?}",
                input.labels,
                self.last_alert_at
            );
            return None;
        }

        self.last_alert_at = Some(now);
        Some(TriggerAccepted {
            accepted_at: now,
            labels: input.labels.clone(),
            zone: input.zone.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::advance;
    use crate::detect::{BoundingBox, Detection};
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn at(secs: u64) -> DateTime<Local> {
        advance(t0(), Duration::from_secs(secs))
    }

    fn person() -> AlertInput {
        AlertInput {
            labels: BTreeSet::from(["person".to_string()]),
            zone: Some("Zone1".to_string()),
        }
    }

    #[test]
    fn rejects_zero_cooldown() {
        assert!(AlertDebouncer::new(Duration::ZERO).is_err());
    }

    #[test]
    fn accepts_once_per_cooldown_window() {
        let cooldown = 300;
        let mut debouncer = AlertDebouncer::new(Duration::from_secs(cooldown)).unwrap();

        let accepted: Vec<u64> = (0..cooldown)
            .filter(|&t| debouncer.evaluate(at(t), &person()).is_some())
            .collect();
        assert_eq!(accepted, vec![0]);
        assert_eq!(debouncer.suppressed(), cooldown - 1);

        let trigger = debouncer.evaluate(at(cooldown), &person()).unwrap();
        assert_eq!(trigger.accepted_at, at(cooldown));
        assert_eq!(trigger.zone, "Zone1");
        assert_eq!(debouncer.last_alert_at(), Some(at(cooldown)));
    }

    #[test]
    fn empty_input_never_fires_or_touches_state() {
        let mut debouncer = AlertDebouncer::new(Duration::from_secs(10)).unwrap();
        assert!(debouncer.evaluate(at(0), &AlertInput::default()).is_none());
        assert!(debouncer.last_alert_at().is_none());
        assert!(!debouncer.in_cooldown(at(0)));
        assert!(debouncer.evaluate(at(1), &person()).is_some());
    }

    #[test]
    fn accepted_triggers_are_never_closer_than_cooldown() {
        let cooldown = Duration::from_secs(7);
        let mut debouncer = AlertDebouncer::new(cooldown).unwrap();
        let mut accepted = Vec::new();
        // Irregular arrival pattern, including repeated timestamps.
        let arrivals = [0u64, 0, 3, 6, 7, 7, 9, 13, 14, 15, 21, 28, 29, 35, 36];
        for secs in arrivals {
            if let Some(trigger) = debouncer.evaluate(at(secs), &person()) {
                accepted.push(trigger.accepted_at);
            }
        }
        assert_eq!(accepted, vec![at(0), at(7), at(14), at(21), at(28), at(35)]);
        for pair in accepted.windows(2) {
            assert!(crate::clock::elapsed(pair[1], pair[0]) >= cooldown);
        }
    }

    #[test]
    fn alert_input_collects_only_in_zone_alert_classes() {
        let ts = t0();
        let make = |label: &str, in_zone: bool, is_alert: bool, zone: &str| ClassifiedDetection {
            detection: Detection::new(label, 0.9, BoundingBox::new(0, 0, 1, 1)),
            frame_timestamp: ts,
            in_zone,
            zone_name: zone.to_string(),
            is_alert_class: is_alert,
        };
        let input = AlertInput::from_classified(&[
            make("dog", true, false, "Zone1"),
            make("Person", false, true, "Outside"),
            make("Car", true, true, "Zone2"),
            make("person", true, true, "Zone1"),
        ]);
        assert_eq!(
            input.labels,
            BTreeSet::from(["car".to_string(), "person".to_string()])
        );
        assert_eq!(input.zone.as_deref(), Some("Zone2"));
    }
}
