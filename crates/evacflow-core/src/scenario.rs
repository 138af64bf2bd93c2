//! Scenario and region configuration.
//!
//! Both tables are built once at startup through validating builders and are
//! immutable afterwards, so they can be shared across threads behind an
//! `Arc`. Malformed definitions are rejected here, never at simulation time.

use crate::metrics::{RiskThresholds, ThresholdError};
use crate::policy::TerminalPolicy;
use crate::segment::{GeoPoint, RoadClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{kind} id must not be empty")]
    EmptyId { kind: &'static str },
    #[error("duplicate scenario id '{0}'")]
    DuplicateScenario(String),
    #[error("duplicate region '{0}'")]
    DuplicateRegion(String),
    #[error("{owner}: {field} must be finite and non-negative, got {value}")]
    InvalidNumber {
        owner: String,
        field: &'static str,
        value: f64,
    },
    #[error("region '{region}': azimuth {value} outside [0, 360)")]
    InvalidAzimuth { region: String, value: f64 },
    #[error("region '{region}': {source}")]
    Thresholds {
        region: String,
        source: ThresholdError,
    },
    #[error("scenario '{scenario}': lane share {value} outside (0, 1]")]
    InvalidLaneShare { scenario: String, value: f64 },
    #[error("scenario '{scenario}': contraflow angle {value} outside [0, 180)")]
    InvalidContraflowAngle { scenario: String, value: f64 },
    #[error("scenario '{scenario}': contraflow rule names no road classes")]
    NoEligibleClasses { scenario: String },
    #[error("scenario '{scenario}' references unknown region '{region}'")]
    UnknownRegion { scenario: String, region: String },
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// How a contraflow rule moves capacity onto outbound lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContraflowMode {
    /// Borrow lanes from an inbound edge and open a new outbound edge
    /// alongside it.
    #[default]
    Additive,
    /// Move lanes from an inbound edge onto its paired outbound carriageway.
    Reallocate,
}

/// Which edges a scenario reverses and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContraflowRule {
    #[serde(default)]
    pub mode: ContraflowMode,
    #[serde(default = "default_eligible_classes")]
    pub eligible_classes: Vec<RoadClass>,
    /// An edge counts as inbound when its bearing is more than this many
    /// degrees away from the evacuation azimuth.
    #[serde(default = "default_against_threshold")]
    pub against_threshold_deg: f64,
    /// Fraction of an inbound edge's capacity that is reversed.
    #[serde(default = "default_lane_share")]
    pub lane_share: f64,
}

fn default_eligible_classes() -> Vec<RoadClass> {
    RoadClass::CONTRAFLOW_DEFAULT.to_vec()
}

fn default_against_threshold() -> f64 {
    90.0
}

fn default_lane_share() -> f64 {
    1.0
}

impl Default for ContraflowRule {
    fn default() -> Self {
        Self {
            mode: ContraflowMode::default(),
            eligible_classes: default_eligible_classes(),
            against_threshold_deg: default_against_threshold(),
            lane_share: default_lane_share(),
        }
    }
}

impl ContraflowRule {
    pub fn with_mode(mode: ContraflowMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// A named disaster scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub label: String,
    /// Severity category, e.g. Saffir-Simpson 1-5. Zero for non-storm runs.
    #[serde(default)]
    pub category: u8,
    #[serde(default)]
    pub wind_speed_mph: f64,
    #[serde(default)]
    pub pressure_mb: Option<f64>,
    #[serde(default)]
    pub landfall: Option<GeoPoint>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
    #[serde(default)]
    pub translation_speed_kt: Option<f64>,
    #[serde(default)]
    pub affected_regions: Vec<String>,
    /// `None` runs the network as built.
    #[serde(default)]
    pub contraflow: Option<ContraflowRule>,
}

impl Scenario {
    /// The unmodified-network scenario.
    pub fn baseline(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: "Baseline".to_string(),
            category: 0,
            wind_speed_mph: 0.0,
            pressure_mb: None,
            landfall: None,
            heading_deg: None,
            translation_speed_kt: None,
            affected_regions: Vec::new(),
            contraflow: None,
        }
    }

    pub fn with_contraflow(mut self, rule: ContraflowRule) -> Self {
        self.contraflow = Some(rule);
        self
    }

    pub fn is_baseline(&self) -> bool {
        self.contraflow.is_none()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyId { kind: "scenario" });
        }
        let numbers = [
            ("wind_speed_mph", Some(self.wind_speed_mph)),
            ("pressure_mb", self.pressure_mb),
            ("translation_speed_kt", self.translation_speed_kt),
        ];
        for (field, value) in numbers {
            if let Some(v) = value {
                check_non_negative(&self.id, field, v)?;
            }
        }
        if let Some(rule) = &self.contraflow {
            if !(rule.lane_share > 0.0 && rule.lane_share <= 1.0) {
                return Err(ConfigError::InvalidLaneShare {
                    scenario: self.id.clone(),
                    value: rule.lane_share,
                });
            }
            if !(0.0..180.0).contains(&rule.against_threshold_deg) {
                return Err(ConfigError::InvalidContraflowAngle {
                    scenario: self.id.clone(),
                    value: rule.against_threshold_deg,
                });
            }
            if rule.eligible_classes.is_empty() {
                return Err(ConfigError::NoEligibleClasses {
                    scenario: self.id.clone(),
                });
            }
        }
        Ok(())
    }
}

fn check_non_negative(owner: &str, field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidNumber {
            owner: owner.to_string(),
            field,
            value,
        })
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

/// Per-region simulation settings.
#[derive(Clone)]
pub struct Region {
    pub name: String,
    /// Compass direction evacuees leave in. Drives contraflow eligibility.
    pub evacuation_azimuth_deg: f64,
    /// People that need to leave.
    pub population: u64,
    pub thresholds: RiskThresholds,
    policy: Arc<dyn TerminalPolicy>,
}

impl Region {
    pub fn new(
        name: impl Into<String>,
        evacuation_azimuth_deg: f64,
        population: u64,
        thresholds: RiskThresholds,
        policy: impl TerminalPolicy + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            evacuation_azimuth_deg,
            population,
            thresholds,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &dyn TerminalPolicy {
        self.policy.as_ref()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyId { kind: "region" });
        }
        if !(0.0..360.0).contains(&self.evacuation_azimuth_deg) {
            return Err(ConfigError::InvalidAzimuth {
                region: self.name.clone(),
                value: self.evacuation_azimuth_deg,
            });
        }
        self.thresholds
            .validate()
            .map_err(|source| ConfigError::Thresholds {
                region: self.name.clone(),
                source,
            })
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("evacuation_azimuth_deg", &self.evacuation_azimuth_deg)
            .field("population", &self.population)
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Builder for an immutable [`RegionTable`].
#[derive(Debug, Default)]
pub struct RegionTableBuilder {
    regions: Vec<Region>,
    by_name: HashMap<String, usize>,
}

impl RegionTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, region: Region) -> Result<(), ConfigError> {
        region.validate()?;
        let key = region.name.to_lowercase();
        if self.by_name.contains_key(&key) {
            return Err(ConfigError::DuplicateRegion(region.name));
        }
        self.by_name.insert(key, self.regions.len());
        self.regions.push(region);
        Ok(())
    }

    pub fn build(self) -> RegionTable {
        RegionTable {
            regions: self.regions,
            by_name: self.by_name,
        }
    }
}

/// Immutable region table. Lookups ignore ASCII case.
#[derive(Debug)]
pub struct RegionTable {
    regions: Vec<Region>,
    by_name: HashMap<String, usize>,
}

impl RegionTable {
    pub fn get(&self, name: &str) -> Option<&Region> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| &self.regions[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Builder for an immutable [`ScenarioTable`].
#[derive(Debug, Default)]
pub struct ScenarioTableBuilder {
    scenarios: Vec<Scenario>,
    by_id: HashMap<String, usize>,
}

impl ScenarioTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scenario: Scenario) -> Result<(), ConfigError> {
        scenario.validate()?;
        if self.by_id.contains_key(&scenario.id) {
            return Err(ConfigError::DuplicateScenario(scenario.id));
        }
        self.by_id.insert(scenario.id.clone(), self.scenarios.len());
        self.scenarios.push(scenario);
        Ok(())
    }

    /// Freeze the table. Every affected region must exist in `regions`.
    pub fn build(self, regions: &RegionTable) -> Result<ScenarioTable, ConfigError> {
        for scenario in &self.scenarios {
            for region in &scenario.affected_regions {
                if !regions.contains(region) {
                    return Err(ConfigError::UnknownRegion {
                        scenario: scenario.id.clone(),
                        region: region.clone(),
                    });
                }
            }
        }
        Ok(ScenarioTable {
            scenarios: self.scenarios,
            by_id: self.by_id,
        })
    }
}

/// Immutable scenario table, keyed by exact scenario id.
#[derive(Debug)]
pub struct ScenarioTable {
    scenarios: Vec<Scenario>,
    by_id: HashMap<String, usize>,
}

impl ScenarioTable {
    pub fn get(&self, id: &str) -> Option<&Scenario> {
        self.by_id.get(id).map(|&i| &self.scenarios[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}
