//! Road segment records and the derived per-segment flow attributes.
//!
//! A [`SegmentRecord`] is the raw row handed over by the segment store. It is
//! validated into a [`RoadSegment`], which carries the derived capacity
//! (vehicles/hour) and travel-time cost (seconds) used as edge weights.

use crate::id::{NodeId, SegmentId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Highway Capacity Manual per-lane throughput, vehicles/hour.
pub const HCM_LANE_CAPACITY_VPH: u64 = 1800;

/// Miles/hour to metres/second.
pub const MPH_TO_MPS: f64 = 0.44704;

/// Posted speed assumed when a record carries a zero speed limit.
pub const FALLBACK_SPEED_MPH: f64 = 10.0;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons a segment record cannot become a graph edge.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SegmentError {
    #[error("segment has no lanes")]
    NoLanes,
    #[error("degenerate length: {0} m")]
    DegenerateLength(f64),
    #[error("invalid speed limit: {0} mph")]
    InvalidSpeed(f64),
    #[error("self-loop on node {0}")]
    SelfLoop(NodeId),
}

// ---------------------------------------------------------------------------
// Classification and geometry
// ---------------------------------------------------------------------------

/// Road classification, most significant first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RoadClass {
    Interstate,
    Toll,
    Major,
    #[default]
    Standard,
}

impl RoadClass {
    /// Classes contraflow applies to when a scenario does not say otherwise.
    pub const CONTRAFLOW_DEFAULT: [RoadClass; 2] = [RoadClass::Interstate, RoadClass::Major];
}

/// A WGS84 point, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Compass bearing from `self` to `other` in degrees, 0 = north,
    /// clockwise. `None` when the points coincide.
    ///
    /// Uses an equirectangular projection, which is plenty for
    /// segment-scale distances.
    pub fn bearing_to(&self, other: &GeoPoint) -> Option<f64> {
        let mean_lat = ((self.lat + other.lat) / 2.0).to_radians();
        let dx = (other.lon - self.lon) * mean_lat.cos();
        let dy = other.lat - self.lat;
        if dx == 0.0 && dy == 0.0 {
            return None;
        }
        Some(normalize_degrees(dx.atan2(dy).to_degrees()))
    }

    /// Approximate ground distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let mean_lat = ((self.lat + other.lat) / 2.0).to_radians();
        let dx = (other.lon - self.lon).to_radians() * mean_lat.cos();
        let dy = (other.lat - self.lat).to_radians();
        (dx * dx + dy * dy).sqrt() * EARTH_RADIUS_KM
    }
}

/// Wrap an angle into `[0, 360)`.
pub fn normalize_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Smallest angle between two bearings, in `[0, 180]`.
pub fn angular_distance(a: f64, b: f64) -> f64 {
    let diff = normalize_degrees(a - b);
    if diff > 180.0 { 360.0 - diff } else { diff }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A road segment as supplied by the segment store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub source: NodeId,
    pub target: NodeId,
    /// Region (metropolitan planning area) the segment belongs to.
    pub region: String,
    pub length_m: f64,
    pub lanes: u32,
    pub speed_limit_mph: f64,
    #[serde(default)]
    pub road_class: RoadClass,
    #[serde(default)]
    pub name: Option<String>,
    /// First point of the segment geometry.
    #[serde(default)]
    pub start: Option<GeoPoint>,
    /// Last point of the segment geometry.
    #[serde(default)]
    pub end: Option<GeoPoint>,
}

/// A validated segment with derived capacity and cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadSegment {
    pub record: SegmentRecord,
    /// `lanes * 1800`, vehicles/hour. Always > 0.
    pub capacity_vph: u64,
    /// Free-flow travel time in seconds. Always > 0.
    pub cost_s: f64,
    /// Heading of the geometry, when the record has one.
    pub bearing_deg: Option<f64>,
}

impl RoadSegment {
    /// Validate a record and derive its flow attributes.
    pub fn validate(record: SegmentRecord) -> Result<Self, SegmentError> {
        if record.source == record.target {
            return Err(SegmentError::SelfLoop(record.source));
        }
        if record.lanes == 0 {
            return Err(SegmentError::NoLanes);
        }
        if !record.length_m.is_finite() || record.length_m <= 0.0 {
            return Err(SegmentError::DegenerateLength(record.length_m));
        }
        if !record.speed_limit_mph.is_finite() || record.speed_limit_mph < 0.0 {
            return Err(SegmentError::InvalidSpeed(record.speed_limit_mph));
        }

        let speed_mph = if record.speed_limit_mph == 0.0 {
            FALLBACK_SPEED_MPH
        } else {
            record.speed_limit_mph
        };
        let cost_s = record.length_m / (speed_mph * MPH_TO_MPS);
        let capacity_vph = u64::from(record.lanes) * HCM_LANE_CAPACITY_VPH;
        let bearing_deg = match (&record.start, &record.end) {
            (Some(a), Some(b)) => a.bearing_to(b),
            _ => None,
        };

        Ok(Self {
            record,
            capacity_vph,
            cost_s,
            bearing_deg,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.record.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lanes: u32, length_m: f64, speed: f64) -> SegmentRecord {
        SegmentRecord {
            id: SegmentId(1),
            source: NodeId(1),
            target: NodeId(2),
            region: "Tampa Bay".to_string(),
            length_m,
            lanes,
            speed_limit_mph: speed,
            road_class: RoadClass::Major,
            name: None,
            start: None,
            end: None,
        }
    }

    #[test]
    fn capacity_is_lanes_times_hcm() {
        let seg = RoadSegment::validate(record(3, 1000.0, 55.0)).unwrap();
        assert_eq!(seg.capacity_vph, 5400);
    }

    #[test]
    fn cost_is_length_over_speed() {
        let seg = RoadSegment::validate(record(2, 447.04, 10.0)).unwrap();
        assert!((seg.cost_s - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_speed_uses_fallback() {
        let seg = RoadSegment::validate(record(1, 447.04, 0.0)).unwrap();
        assert!((seg.cost_s - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_zero_lanes() {
        assert_eq!(
            RoadSegment::validate(record(0, 100.0, 30.0)),
            Err(SegmentError::NoLanes)
        );
    }

    #[test]
    fn rejects_degenerate_length() {
        assert!(matches!(
            RoadSegment::validate(record(2, 0.0, 30.0)),
            Err(SegmentError::DegenerateLength(_))
        ));
        assert!(matches!(
            RoadSegment::validate(record(2, f64::NAN, 30.0)),
            Err(SegmentError::DegenerateLength(_))
        ));
    }

    #[test]
    fn rejects_negative_speed() {
        assert!(matches!(
            RoadSegment::validate(record(2, 10.0, -5.0)),
            Err(SegmentError::InvalidSpeed(_))
        ));
    }

    #[test]
    fn rejects_self_loop() {
        let mut r = record(2, 100.0, 30.0);
        r.target = r.source;
        assert_eq!(
            RoadSegment::validate(r),
            Err(SegmentError::SelfLoop(NodeId(1)))
        );
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = GeoPoint::new(-82.5, 27.9);
        let north = GeoPoint::new(-82.5, 28.0);
        let south = GeoPoint::new(-82.5, 27.8);
        let east = GeoPoint::new(-82.4, 27.9);
        let west = GeoPoint::new(-82.6, 27.9);

        assert!((origin.bearing_to(&north).unwrap() - 0.0).abs() < 1e-9);
        assert!((origin.bearing_to(&east).unwrap() - 90.0).abs() < 1e-9);
        assert!((origin.bearing_to(&south).unwrap() - 180.0).abs() < 1e-9);
        assert!((origin.bearing_to(&west).unwrap() - 270.0).abs() < 1e-9);
        assert_eq!(origin.bearing_to(&origin), None);
    }

    #[test]
    fn bearing_is_derived_from_geometry() {
        let mut r = record(2, 100.0, 30.0);
        r.start = Some(GeoPoint::new(-82.5, 28.0));
        r.end = Some(GeoPoint::new(-82.5, 27.9));
        let seg = RoadSegment::validate(r).unwrap();
        assert!((seg.bearing_deg.unwrap() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn angular_distance_wraps() {
        assert_eq!(angular_distance(350.0, 10.0), 20.0);
        assert_eq!(angular_distance(45.0, 225.0), 180.0);
        assert_eq!(angular_distance(90.0, 90.0), 0.0);
    }

    #[test]
    fn distance_is_roughly_right() {
        // One degree of latitude is ~111 km.
        let a = GeoPoint::new(-82.0, 27.0);
        let b = GeoPoint::new(-82.0, 28.0);
        let d = a.distance_km(&b);
        assert!((d - 111.19).abs() < 0.5, "got {d}");
    }
}
