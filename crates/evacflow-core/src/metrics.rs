//! Turns a max-flow value into the reported evacuation statistics.

use serde::{Deserialize, Serialize};

/// Errors in threshold configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("threshold must be a finite, non-negative number of hours, got {0}")]
    NotFinite(f64),
    #[error("low threshold {low} h exceeds critical threshold {critical} h")]
    Inverted { low: f64, critical: f64 },
}

/// Clearance-time bounds separating the three risk buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low_hours: f64,
    pub critical_hours: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low_hours: 6.0,
            critical_hours: 24.0,
        }
    }
}

impl RiskThresholds {
    pub fn new(low_hours: f64, critical_hours: f64) -> Result<Self, ThresholdError> {
        let thresholds = Self {
            low_hours,
            critical_hours,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        for v in [self.low_hours, self.critical_hours] {
            if !v.is_finite() || v < 0.0 {
                return Err(ThresholdError::NotFinite(v));
            }
        }
        if self.low_hours > self.critical_hours {
            return Err(ThresholdError::Inverted {
                low: self.low_hours,
                critical: self.critical_hours,
            });
        }
        Ok(())
    }

    /// Below `low` is LOW, above `critical` is CRITICAL, anything between
    /// (bounds included) is MODERATE. An unbounded clearance is CRITICAL.
    pub fn classify(&self, clearance: ClearanceTime) -> GridlockRisk {
        match clearance {
            ClearanceTime::Unbounded => GridlockRisk::Critical,
            ClearanceTime::Hours(h) if h < self.low_hours => GridlockRisk::Low,
            ClearanceTime::Hours(h) if h > self.critical_hours => GridlockRisk::Critical,
            ClearanceTime::Hours(_) => GridlockRisk::Moderate,
        }
    }
}

/// Estimated time to clear a region's population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ClearanceTime {
    Hours(f64),
    /// No throughput at all: the population can never clear.
    Unbounded,
}

impl ClearanceTime {
    pub fn hours(&self) -> Option<f64> {
        match self {
            Self::Hours(h) => Some(*h),
            Self::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl std::fmt::Display for ClearanceTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hours(h) => write!(f, "{h:.2} h"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Categorical gridlock risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GridlockRisk {
    Low,
    Moderate,
    Critical,
}

impl GridlockRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for GridlockRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived statistics for one solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowMetrics {
    pub max_throughput_vph: u64,
    pub clearance: ClearanceTime,
    pub gridlock_risk: GridlockRisk,
}

/// Compute clearance time and risk for a max-flow value.
///
/// Clearance is `population / throughput`, rounded to two decimals. A region
/// with nobody to move clears immediately; a zero throughput with people
/// left is [`ClearanceTime::Unbounded`].
pub fn derive_metrics(
    max_throughput_vph: u64,
    population: u64,
    thresholds: &RiskThresholds,
) -> FlowMetrics {
    let clearance = if population == 0 {
        ClearanceTime::Hours(0.0)
    } else if max_throughput_vph == 0 {
        ClearanceTime::Unbounded
    } else {
        let hours = population as f64 / max_throughput_vph as f64;
        ClearanceTime::Hours(round2(hours))
    };
    FlowMetrics {
        max_throughput_vph,
        clearance,
        gridlock_risk: thresholds.classify(clearance),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
