//! Serde data file structs for simulation configuration.
//!
//! These structs define the on-disk format for scenarios and regions. They
//! are deserialized from RON, JSON, or TOML data files and then resolved into
//! engine types by the loader. Segment fixtures use the core's
//! [`SegmentRecord`](evacflow_core::segment::SegmentRecord) directly.

use evacflow_core::id::NodeId;
use evacflow_core::metrics::RiskThresholds;
use evacflow_core::policy::NodeSelector;
use evacflow_core::scenario::{ContraflowMode, ContraflowRule};
use evacflow_core::segment::{GeoPoint, RoadClass};
use serde::Deserialize;

// ===========================================================================
// Scenarios
// ===========================================================================

/// A hurricane scenario definition in a data file.
///
/// Field names follow the engine's snake_case; the camelCase spellings used
/// by upstream scenario catalogues are accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioData {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub category: u8,
    #[serde(default, alias = "windSpeed")]
    pub wind_speed_mph: f64,
    #[serde(default, alias = "pressureMb")]
    pub pressure_mb: Option<f64>,
    #[serde(default)]
    pub landfall: Option<PointData>,
    /// Flat landfall coordinates, used when `landfall` is absent.
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, alias = "heading", alias = "direction")]
    pub heading_deg: Option<f64>,
    #[serde(default, alias = "translationSpeed")]
    pub translation_speed_kt: Option<f64>,
    #[serde(default, alias = "affectedRegions")]
    pub affected_regions: Vec<String>,
    #[serde(default)]
    pub contraflow: Option<ContraflowData>,
}

impl ScenarioData {
    pub fn landfall_point(&self) -> Option<GeoPoint> {
        match self.landfall {
            Some(p) => Some(p.into()),
            None => Some(GeoPoint::new(self.longitude?, self.latitude?)),
        }
    }
}

/// A `(lon, lat)` point.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PointData {
    pub lon: f64,
    pub lat: f64,
}

impl From<PointData> for GeoPoint {
    fn from(p: PointData) -> Self {
        GeoPoint::new(p.lon, p.lat)
    }
}

/// Contraflow settings. Omitted fields take the engine defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContraflowData {
    #[serde(default)]
    pub mode: Option<ContraflowMode>,
    #[serde(default, alias = "roadClasses")]
    pub eligible_classes: Option<Vec<RoadClass>>,
    #[serde(default, alias = "againstThreshold")]
    pub against_threshold_deg: Option<f64>,
    #[serde(default, alias = "laneShare")]
    pub lane_share: Option<f64>,
}

impl From<ContraflowData> for ContraflowRule {
    fn from(data: ContraflowData) -> Self {
        let defaults = ContraflowRule::with_mode(data.mode.unwrap_or_default());
        ContraflowRule {
            eligible_classes: data.eligible_classes.unwrap_or(defaults.eligible_classes),
            against_threshold_deg: data
                .against_threshold_deg
                .unwrap_or(defaults.against_threshold_deg),
            lane_share: data.lane_share.unwrap_or(defaults.lane_share),
            mode: defaults.mode,
        }
    }
}

// ===========================================================================
// Regions
// ===========================================================================

/// A region definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionData {
    pub name: String,
    #[serde(alias = "evacuationAzimuth")]
    pub evacuation_azimuth_deg: f64,
    pub population: u64,
    #[serde(default)]
    pub thresholds: Option<ThresholdData>,
    #[serde(default = "default_sources")]
    pub sources: SelectorData,
    #[serde(default = "default_sinks")]
    pub sinks: SelectorData,
}

fn default_sources() -> SelectorData {
    SelectorData::Origins
}

fn default_sinks() -> SelectorData {
    SelectorData::Terminals
}

/// Clearance-hour thresholds. Omitted fields take the engine defaults.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdData {
    #[serde(default = "default_low_hours")]
    pub low_hours: f64,
    #[serde(default = "default_critical_hours")]
    pub critical_hours: f64,
}

fn default_low_hours() -> f64 {
    RiskThresholds::default().low_hours
}

fn default_critical_hours() -> f64 {
    RiskThresholds::default().critical_hours
}

impl From<ThresholdData> for RiskThresholds {
    fn from(data: ThresholdData) -> Self {
        RiskThresholds {
            low_hours: data.low_hours,
            critical_hours: data.critical_hours,
        }
    }
}

/// A selector no graph could satisfy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectorError {
    #[error("node list is empty")]
    EmptyNodeList,
    #[error("radius_km must be positive, got {0}")]
    InvalidRadius(f64),
    #[error("azimuth_deg {0} outside [0, 360)")]
    InvalidAzimuth(f64),
    #[error("count must be at least 1")]
    ZeroCount,
}

/// How a region names its source or sink nodes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorData {
    /// Listed topology node ids.
    Nodes(Vec<i64>),
    /// Nodes within a radius of a point.
    WithinRadius { center: PointData, radius_km: f64 },
    /// The `count` nodes farthest along a compass direction.
    FarthestAlong { azimuth_deg: f64, count: usize },
    /// Nodes nothing drives into.
    Origins,
    /// Nodes nothing drives out of.
    Terminals,
}

impl SelectorData {
    /// Resolve into an engine selector, rejecting values no graph could
    /// satisfy.
    pub fn resolve(self) -> Result<NodeSelector, SelectorError> {
        match self {
            Self::Nodes(ids) if ids.is_empty() => Err(SelectorError::EmptyNodeList),
            Self::Nodes(ids) => Ok(NodeSelector::Explicit(
                ids.into_iter().map(NodeId).collect(),
            )),
            Self::WithinRadius { center, radius_km } => {
                if !(radius_km.is_finite() && radius_km > 0.0) {
                    return Err(SelectorError::InvalidRadius(radius_km));
                }
                Ok(NodeSelector::WithinRadius {
                    center: center.into(),
                    radius_km,
                })
            }
            Self::FarthestAlong { azimuth_deg, count } => {
                if !(0.0..360.0).contains(&azimuth_deg) {
                    return Err(SelectorError::InvalidAzimuth(azimuth_deg));
                }
                if count == 0 {
                    return Err(SelectorError::ZeroCount);
                }
                Ok(NodeSelector::FarthestAlong { azimuth_deg, count })
            }
            Self::Origins => Ok(NodeSelector::Origins),
            Self::Terminals => Ok(NodeSelector::Terminals),
        }
    }
}
