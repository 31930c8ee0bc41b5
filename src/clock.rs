//! Wall-clock abstraction.
//!
//! Every timing decision in the pipeline (cooldown, recording duration, log
//! partitioning, artifact naming) is a comparison between two timestamps.
//! Frames carry their capture time; sources and shutdown paths obtain "now"
//! from a `Clock` so tests can drive time explicitly.

use chrono::{DateTime, Local};
use std::sync::Mutex;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Local system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually driven clock for tests and deterministic runs.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Local>) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = advance(*guard, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Time elapsed from `anchor` to `now`.
///
/// Returns zero when `now` precedes `anchor`, so a clock stepping backwards
/// keeps cooldown and recording guards closed instead of opening them.
pub fn elapsed(now: DateTime<Local>, anchor: DateTime<Local>) -> Duration {
    (now - anchor).to_std().unwrap_or(Duration::ZERO)
}

/// Guard form of [`elapsed`]: has at least `threshold` passed since `anchor`?
pub fn has_elapsed(now: DateTime<Local>, anchor: DateTime<Local>, threshold: Duration) -> bool {
    elapsed(now, anchor) >= threshold
}

/// `at + by`, saturating at the far end of the representable range.
pub fn advance(at: DateTime<Local>, by: Duration) -> DateTime<Local> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn elapsed_is_zero_when_clock_steps_back() {
        let anchor = t0();
        let earlier = anchor - chrono::Duration::seconds(5);
        assert_eq!(elapsed(earlier, anchor), Duration::ZERO);
        assert!(!has_elapsed(earlier, anchor, Duration::from_secs(1)));
    }

    #[test]
    fn has_elapsed_is_inclusive_at_threshold() {
        let anchor = t0();
        let later = advance(anchor, Duration::from_secs(10));
        assert!(has_elapsed(later, anchor, Duration::from_secs(10)));
        assert!(!has_elapsed(later, anchor, Duration::from_secs(11)));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::from_millis(1500));
        assert_eq!(elapsed(clock.now(), t0()), Duration::from_millis(1500));
        clock.set(t0());
        assert_eq!(clock.now(), t0());
    }
}
