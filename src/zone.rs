//! Zone registry.
//!
//! Zones are named regions of interest in frame pixel space, fixed for the
//! lifetime of the process. Membership is evaluated independently per zone,
//! so overlapping zones are allowed and a point may belong to several.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Zone name reported for detections whose centre lies in no zone.
pub const OUTSIDE_ZONE: &str = "Outside";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Containment capability of a zone shape.
pub trait ZoneShape: fmt::Debug + Send + Sync {
    fn contains(&self, point: Point) -> bool;
}

/// Axis-aligned rectangle `(x, y, w, h)` in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }
}

impl ZoneShape for Rect {
    /// Edges are exclusive: a point on the border is outside.
    fn contains(&self, point: Point) -> bool {
        let (x, y) = (f64::from(self.x), f64::from(self.y));
        x < point.x
            && point.x < x + f64::from(self.w)
            && y < point.y
            && point.y < y + f64::from(self.h)
    }
}

#[derive(Clone, Debug)]
pub struct Zone {
    name: String,
    shape: Arc<dyn ZoneShape>,
}

impl Zone {
    pub fn new(name: &str, shape: Arc<dyn ZoneShape>) -> Result<Self> {
        validate_zone_name(name)?;
        Ok(Self {
            name: name.to_string(),
            shape,
        })
    }

    pub fn rect(name: &str, x: i32, y: i32, w: i32, h: i32) -> Result<Self> {
        if w <= 0 || h <= 0 {
            return Err(anyhow!(
                "zone '{}' must have positive width and height (got {}x{})",
                name,
                w,
                h
            ));
        }
        Self::new(name, Arc::new(Rect::new(x, y, w, h)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, point: Point) -> bool {
        self.shape.contains(point)
    }
}

/// Zone names are operator-facing labels written to the detection log.
///
/// Allowed: "Zone1", "Front Door", "lot_a-1", "gate:north"
/// Disallowed: empty, leading punctuation, commas, quotes, control characters,
/// more than 64 characters, and the reserved name "Outside".
pub fn validate_zone_name(name: &str) -> Result<()> {
    static ZONE_NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_NAME_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _:-]{0,63}$").expect("static zone name regex")
    });

    if !re.is_match(name) {
        return Err(anyhow!(
            "zone name '{}' must match ^[A-Za-z0-9][A-Za-z0-9 _:-]{{0,63}}$",
            name
        ));
    }
    if name.eq_ignore_ascii_case(OUTSIDE_ZONE) {
        return Err(anyhow!("zone name '{}' is reserved", OUTSIDE_ZONE));
    }
    Ok(())
}

/// Ordered, immutable set of zones. Registration order breaks ties when a
/// point lies in more than one zone.
#[derive(Clone, Debug)]
pub struct ZoneRegistry {
    zones: Vec<Zone>,
}

impl ZoneRegistry {
    pub fn new(zones: Vec<Zone>) -> Result<Self> {
        if zones.is_empty() {
            return Err(anyhow!("at least one zone must be configured"));
        }
        for (idx, zone) in zones.iter().enumerate() {
            if zones[..idx]
                .iter()
                .any(|prev| prev.name.eq_ignore_ascii_case(&zone.name))
            {
                return Err(anyhow!("duplicate zone name '{}'", zone.name));
            }
        }
        Ok(Self { zones })
    }

    /// Names of every zone containing `point`, in registration order.
    pub fn membership(&self, point: Point) -> Vec<&str> {
        self.zones
            .iter()
            .filter(|zone| zone.contains(point))
            .map(|zone| zone.name())
            .collect()
    }

    pub fn first_containing(&self, point: Point) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.contains(point))
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ZoneRegistry {
        ZoneRegistry::new(vec![
            Zone::rect("Zone1", 400, 100, 250, 350).unwrap(),
            Zone::rect("Overlap", 600, 300, 200, 200).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn membership_is_boundary_exclusive() {
        let zones = registry();
        assert!(zones.membership(Point::new(400.0, 100.0)).is_empty());
        assert_eq!(zones.membership(Point::new(401.0, 101.0)), vec!["Zone1"]);
        assert!(zones.membership(Point::new(650.0, 200.0)).is_empty());
        assert!(zones.membership(Point::new(500.0, 450.0)).is_empty());
    }

    #[test]
    fn overlapping_zones_report_all_in_registration_order() {
        let zones = registry();
        let point = Point::new(620.0, 320.0);
        assert_eq!(zones.membership(point), vec!["Zone1", "Overlap"]);
        assert_eq!(zones.first_containing(point).map(Zone::name), Some("Zone1"));
    }

    #[test]
    fn registry_rejects_duplicates_and_empty_sets() {
        assert!(ZoneRegistry::new(vec![]).is_err());
        let dup = ZoneRegistry::new(vec![
            Zone::rect("Gate", 0, 0, 10, 10).unwrap(),
            Zone::rect("gate", 5, 5, 10, 10).unwrap(),
        ]);
        assert!(dup.is_err());
    }

    #[test]
    fn zone_rejects_degenerate_rectangles() {
        assert!(Zone::rect("Flat", 0, 0, 10, 0).is_err());
        assert!(Zone::rect("Negative", 0, 0, -4, 10).is_err());
    }

    #[test]
    fn zone_name_discipline() {
        assert!(validate_zone_name("Zone1").is_ok());
        assert!(validate_zone_name("Front Door").is_ok());
        assert!(validate_zone_name("gate:north").is_ok());
        assert!(validate_zone_name("").is_err());
        assert!(validate_zone_name(" leading").is_err());
        assert!(validate_zone_name("a,b").is_err());
        assert!(validate_zone_name("outside").is_err());
        assert!(validate_zone_name(&"z".repeat(65)).is_err());
    }

    #[test]
    fn identical_registrations_classify_identically() {
        let a = registry();
        let b = registry();
        for (x, y) in [(401.0, 101.0), (620.0, 320.0), (10.0, 10.0), (650.0, 450.0)] {
            let p = Point::new(x, y);
            assert_eq!(a.membership(p), b.membership(p));
        }
    }
}
