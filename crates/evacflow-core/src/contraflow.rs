//! Scenario modifier: applies a scenario's contraflow rule to a built graph.
//!
//! The input graph is never touched. Every run works on a clone, so one
//! cached baseline graph can feed any number of scenario variants.

use crate::graph::{EdgeData, EdgeOrigin, EdgeSpec, FlowGraph, GraphError};
use crate::id::{EdgeKey, SegmentId};
use crate::scenario::{ContraflowMode, ContraflowRule, Region, Scenario};
use crate::segment::{angular_distance, normalize_degrees};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContraflowError {
    #[error("lane share {0} outside (0, 1]")]
    InvalidLaneShare(f64),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// What one edit did to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditKind {
    /// A new reverse edge was opened next to the inbound edge.
    Added { edge: EdgeKey },
    /// Capacity moved onto an existing opposing edge.
    Reallocated { onto: EdgeKey },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContraflowEdit {
    pub segment: SegmentId,
    /// The edge that lost capacity.
    pub inbound: EdgeKey,
    pub kind: EditKind,
    pub moved_vph: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContraflowOutcome {
    pub graph: FlowGraph,
    pub edits: Vec<ContraflowEdit>,
}

/// Whether an edge is a candidate for reversal: an eligible class pointing
/// against the evacuation azimuth.
pub fn is_inbound(edge: &EdgeData, rule: &ContraflowRule, azimuth_deg: f64) -> bool {
    if !rule.eligible_classes.contains(&edge.class) {
        return false;
    }
    match edge.bearing_deg {
        Some(bearing) => angular_distance(bearing, azimuth_deg) > rule.against_threshold_deg,
        None => false,
    }
}

/// Apply the scenario to a copy of `graph`.
///
/// A baseline scenario returns an unmodified copy. Candidates are taken
/// from the input graph in insertion order, so edges opened by this call
/// are never revisited.
pub fn apply(
    graph: &FlowGraph,
    scenario: &Scenario,
    region: &Region,
) -> Result<ContraflowOutcome, ContraflowError> {
    let mut modified = graph.clone();
    let Some(rule) = &scenario.contraflow else {
        return Ok(ContraflowOutcome {
            graph: modified,
            edits: Vec::new(),
        });
    };
    if !(rule.lane_share > 0.0 && rule.lane_share <= 1.0) {
        return Err(ContraflowError::InvalidLaneShare(rule.lane_share));
    }

    let azimuth = region.evacuation_azimuth_deg;
    let candidates: Vec<EdgeKey> = graph
        .edges()
        .filter(|(_, e)| e.origin == EdgeOrigin::Segment && is_inbound(e, rule, azimuth))
        .map(|(key, _)| key)
        .collect();

    let mut consumed: HashSet<EdgeKey> = HashSet::new();
    let mut edits = Vec::new();

    for key in candidates {
        if !consumed.insert(key) {
            continue;
        }
        let inbound = modified
            .edge(key)
            .ok_or(GraphError::EdgeNotFound(key))?
            .clone();
        let moved = (inbound.capacity as f64 * rule.lane_share).floor() as u64;
        if moved == 0 {
            continue;
        }
        let remainder = inbound.capacity - moved;

        let partner = match rule.mode {
            ContraflowMode::Reallocate => {
                find_partner(&modified, key, &inbound, rule, azimuth, &consumed)
            }
            ContraflowMode::Additive => None,
        };

        let kind = match partner {
            Some(onto) => {
                consumed.insert(onto);
                let current = modified
                    .edge(onto)
                    .ok_or(GraphError::EdgeNotFound(onto))?
                    .capacity;
                modified.set_capacity(onto, current + moved)?;
                EditKind::Reallocated { onto }
            }
            None => {
                let edge = modified.add_edge(EdgeSpec {
                    from: inbound.to,
                    to: inbound.from,
                    segment: inbound.segment,
                    class: inbound.class,
                    capacity: moved,
                    cost_s: inbound.cost_s,
                    bearing_deg: inbound.bearing_deg.map(|b| normalize_degrees(b + 180.0)),
                    origin: EdgeOrigin::Contraflow { of: key },
                })?;
                EditKind::Added { edge }
            }
        };
        modified.set_capacity(key, remainder)?;

        debug!(
            scenario = %scenario.id,
            segment = %inbound.segment,
            moved_vph = moved,
            ?kind,
            "contraflow edit"
        );
        edits.push(ContraflowEdit {
            segment: inbound.segment,
            inbound: key,
            kind,
            moved_vph: moved,
        });
    }

    debug!(
        scenario = %scenario.id,
        region = %region.name,
        edits = edits.len(),
        "contraflow applied"
    );
    Ok(ContraflowOutcome {
        graph: modified,
        edits,
    })
}

/// Lowest-key opposing segment edge of an eligible class that is not itself
/// inbound and has not been used by an earlier edit.
fn find_partner(
    graph: &FlowGraph,
    key: EdgeKey,
    inbound: &EdgeData,
    rule: &ContraflowRule,
    azimuth_deg: f64,
    consumed: &HashSet<EdgeKey>,
) -> Option<EdgeKey> {
    graph
        .outputs(inbound.to)
        .iter()
        .copied()
        .filter(|&k| k != key && !consumed.contains(&k))
        .filter(|&k| {
            graph.edge(k).is_some_and(|e| {
                e.to == inbound.from
                    && e.origin == EdgeOrigin::Segment
                    && rule.eligible_classes.contains(&e.class)
                    && !is_inbound(e, rule, azimuth_deg)
            })
        })
        .min()
}
