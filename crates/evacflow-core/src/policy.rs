//! Source and sink selection.
//!
//! Which nodes count as population centres and which as safe egress points
//! is a per-region decision. Regions carry a [`SelectorPolicy`] built from
//! configuration; anything else implementing [`TerminalPolicy`] can be
//! plugged in without touching the builder or the solver.

use crate::graph::FlowGraph;
use crate::id::NodeId;
use crate::segment::GeoPoint;
use serde::{Deserialize, Serialize};

/// Errors that can occur while selecting terminals.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("no source nodes selected")]
    EmptySources,
    #[error("no sink nodes selected")]
    EmptySinks,
    #[error("node {0} is not part of the graph")]
    UnknownNode(NodeId),
}

/// The chosen source and sink sets, sorted and free of duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminals {
    pub sources: Vec<NodeId>,
    pub sinks: Vec<NodeId>,
}

impl Terminals {
    pub fn new(sources: Vec<NodeId>, sinks: Vec<NodeId>) -> Self {
        Self {
            sources: normalized(sources),
            sinks: normalized(sinks),
        }
    }
}

fn normalized(mut ids: Vec<NodeId>) -> Vec<NodeId> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Selects the source and sink sets for a built graph.
pub trait TerminalPolicy: Send + Sync {
    fn select(&self, graph: &FlowGraph) -> Result<Terminals, PolicyError>;
}

/// Configuration-facing rule for picking a node set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeSelector {
    /// Exactly these nodes. Every one must exist in the graph.
    Explicit(Vec<NodeId>),
    /// Nodes within `radius_km` of a centre point, e.g. a downtown cluster.
    WithinRadius { center: GeoPoint, radius_km: f64 },
    /// The `count` nodes lying farthest along a compass direction, e.g. the
    /// northern edge of the network where egress highways leave it.
    FarthestAlong { azimuth_deg: f64, count: usize },
    /// Nodes with no incoming edges.
    Origins,
    /// Nodes with no outgoing edges.
    Terminals,
}

impl NodeSelector {
    /// Resolve the selector against a graph. May return an empty set.
    pub fn resolve(&self, graph: &FlowGraph) -> Result<Vec<NodeId>, PolicyError> {
        let selected = match self {
            Self::Explicit(ids) => {
                for id in ids {
                    if !graph.contains(*id) {
                        return Err(PolicyError::UnknownNode(*id));
                    }
                }
                ids.clone()
            }
            Self::WithinRadius { center, radius_km } => graph
                .nodes()
                .filter_map(|(_, n)| {
                    let pos = n.position?;
                    (pos.distance_km(center) <= *radius_km).then_some(n.id)
                })
                .collect(),
            Self::FarthestAlong { azimuth_deg, count } => {
                let (sin, cos) = azimuth_deg.to_radians().sin_cos();
                let mut scored: Vec<(f64, NodeId)> = graph
                    .nodes()
                    .filter_map(|(_, n)| {
                        let pos = n.position?;
                        let x = pos.lon * pos.lat.to_radians().cos();
                        Some((x * sin + pos.lat * cos, n.id))
                    })
                    .collect();
                // Highest projection first; ties go to the lower node id.
                scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
                scored.into_iter().take(*count).map(|(_, id)| id).collect()
            }
            Self::Origins => graph
                .nodes()
                .filter(|(key, _)| graph.inputs(*key).is_empty())
                .map(|(_, n)| n.id)
                .collect(),
            Self::Terminals => graph
                .nodes()
                .filter(|(key, _)| graph.outputs(*key).is_empty())
                .map(|(_, n)| n.id)
                .collect(),
        };
        Ok(normalized(selected))
    }
}

/// A [`TerminalPolicy`] made of one selector per side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorPolicy {
    pub sources: NodeSelector,
    pub sinks: NodeSelector,
}

impl TerminalPolicy for SelectorPolicy {
    fn select(&self, graph: &FlowGraph) -> Result<Terminals, PolicyError> {
        let sources = self.sources.resolve(graph)?;
        if sources.is_empty() {
            return Err(PolicyError::EmptySources);
        }
        let sinks = self.sinks.resolve(graph)?;
        if sinks.is_empty() {
            return Err(PolicyError::EmptySinks);
        }
        Ok(Terminals { sources, sinks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{GraphBuilder, RegionFilter};
    use crate::test_utils::*;

    fn chain_graph() -> FlowGraph {
        // 1 -> 2 -> 3, laid out south to north.
        let records = vec![
            seg_at(1, 1, 2, 2, (-82.0, 27.0), (-82.0, 27.5)),
            seg_at(2, 2, 3, 2, (-82.0, 27.5), (-82.0, 28.0)),
        ];
        GraphBuilder::new(RegionFilter::All)
            .build(records)
            .unwrap()
            .graph
    }

    #[test]
    fn explicit_requires_known_nodes() {
        let g = chain_graph();
        let sel = NodeSelector::Explicit(vec![NodeId(3), NodeId(1), NodeId(3)]);
        assert_eq!(sel.resolve(&g).unwrap(), vec![NodeId(1), NodeId(3)]);

        let missing = NodeSelector::Explicit(vec![NodeId(99)]);
        assert_eq!(missing.resolve(&g), Err(PolicyError::UnknownNode(NodeId(99))));
    }

    #[test]
    fn within_radius_picks_cluster() {
        let g = chain_graph();
        let sel = NodeSelector::WithinRadius {
            center: GeoPoint::new(-82.0, 27.0),
            radius_km: 10.0,
        };
        assert_eq!(sel.resolve(&g).unwrap(), vec![NodeId(1)]);
    }

    #[test]
    fn farthest_along_north() {
        let g = chain_graph();
        let sel = NodeSelector::FarthestAlong {
            azimuth_deg: 0.0,
            count: 1,
        };
        assert_eq!(sel.resolve(&g).unwrap(), vec![NodeId(3)]);

        let south = NodeSelector::FarthestAlong {
            azimuth_deg: 180.0,
            count: 2,
        };
        assert_eq!(south.resolve(&g).unwrap(), vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn origins_and_terminals_follow_degree() {
        let g = chain_graph();
        assert_eq!(NodeSelector::Origins.resolve(&g).unwrap(), vec![NodeId(1)]);
        assert_eq!(NodeSelector::Terminals.resolve(&g).unwrap(), vec![NodeId(3)]);
    }

    #[test]
    fn empty_selection_is_an_error() {
        let g = chain_graph();
        let policy = SelectorPolicy {
            sources: NodeSelector::WithinRadius {
                center: GeoPoint::new(0.0, 0.0),
                radius_km: 1.0,
            },
            sinks: NodeSelector::Terminals,
        };
        assert_eq!(policy.select(&g), Err(PolicyError::EmptySources));

        let policy = SelectorPolicy {
            sources: NodeSelector::Origins,
            sinks: NodeSelector::Explicit(vec![]),
        };
        assert_eq!(policy.select(&g), Err(PolicyError::EmptySinks));
    }

    #[test]
    fn selector_policy_selects_both_sides() {
        let g = chain_graph();
        let policy = SelectorPolicy {
            sources: NodeSelector::Origins,
            sinks: NodeSelector::Terminals,
        };
        let t = policy.select(&g).unwrap();
        assert_eq!(t.sources, vec![NodeId(1)]);
        assert_eq!(t.sinks, vec![NodeId(3)]);
    }
}
