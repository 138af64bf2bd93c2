use crate::id::*;
use crate::segment::{GeoPoint, RoadClass};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during graph operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeKey),
    #[error("edge not found: {0:?}")]
    EdgeNotFound(EdgeKey),
    #[error("self-loop on node {0}")]
    SelfLoop(NodeId),
}

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// Adjacency lists for a single node, tracking incoming and outgoing edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeAdjacency {
    /// Edges whose destination is this node.
    inputs: Vec<EdgeKey>,
    /// Edges whose source is this node.
    outputs: Vec<EdgeKey>,
}

/// Per-node data stored in the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Topology id the node was discovered from.
    pub id: NodeId,
    /// Geographic position, taken from the first segment geometry that
    /// touched the node.
    pub position: Option<GeoPoint>,
}

/// Where an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeOrigin {
    /// One edge per road segment, directed source to target.
    Segment,
    /// Reverse-direction lanes opened by a contraflow rule on `of`.
    Contraflow { of: EdgeKey },
}

/// Per-edge data stored in the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    /// Source node.
    pub from: NodeKey,
    /// Destination node.
    pub to: NodeKey,
    /// Segment the edge was built from.
    pub segment: SegmentId,
    pub class: RoadClass,
    /// Vehicles/hour.
    pub capacity: u64,
    /// Free-flow travel time, seconds.
    pub cost_s: f64,
    /// Compass heading of the edge direction, when known.
    pub bearing_deg: Option<f64>,
    pub origin: EdgeOrigin,
    /// Remaining capacity after the last solve. Equals `capacity` until a
    /// solver writes flow back.
    residual: u64,
}

impl EdgeData {
    pub fn residual(&self) -> u64 {
        self.residual
    }

    /// Flow carried by the edge in the last solve.
    pub fn flow(&self) -> u64 {
        self.capacity - self.residual
    }
}

/// Everything needed to add an edge.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub from: NodeKey,
    pub to: NodeKey,
    pub segment: SegmentId,
    pub class: RoadClass,
    pub capacity: u64,
    pub cost_s: f64,
    pub bearing_deg: Option<f64>,
    pub origin: EdgeOrigin,
}

// ---------------------------------------------------------------------------
// FlowGraph
// ---------------------------------------------------------------------------

/// A directed multigraph of road links with capacity, cost and residual
/// capacity on every edge.
///
/// Adjacency is stored in a `SecondaryMap` keyed by `NodeKey`, so it stays in
/// sync with the primary `nodes` SlotMap. Iteration follows insertion order,
/// which makes two graphs built from the same input compare equal edge by
/// edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowGraph {
    nodes: SlotMap<NodeKey, NodeData>,
    edges: SlotMap<EdgeKey, EdgeData>,
    adjacency: SecondaryMap<NodeKey, NodeAdjacency>,
    index: HashMap<NodeId, NodeKey>,
}

impl FlowGraph {
    /// Create a new, empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add a node for a topology id, or return the existing one. A missing
    /// position is filled in if one is supplied later.
    pub fn add_node(&mut self, id: NodeId, position: Option<GeoPoint>) -> NodeKey {
        if let Some(&key) = self.index.get(&id) {
            if let Some(node) = self.nodes.get_mut(key) {
                if node.position.is_none() {
                    node.position = position;
                }
            }
            return key;
        }
        let key = self.nodes.insert(NodeData { id, position });
        self.adjacency.insert(key, NodeAdjacency::default());
        self.index.insert(id, key);
        key
    }

    /// Add a directed edge between two existing nodes.
    pub fn add_edge(&mut self, spec: EdgeSpec) -> Result<EdgeKey, GraphError> {
        let from_id = self
            .nodes
            .get(spec.from)
            .ok_or(GraphError::NodeNotFound(spec.from))?
            .id;
        if !self.nodes.contains_key(spec.to) {
            return Err(GraphError::NodeNotFound(spec.to));
        }
        if spec.from == spec.to {
            return Err(GraphError::SelfLoop(from_id));
        }

        let edge = self.edges.insert(EdgeData {
            from: spec.from,
            to: spec.to,
            segment: spec.segment,
            class: spec.class,
            capacity: spec.capacity,
            cost_s: spec.cost_s,
            bearing_deg: spec.bearing_deg,
            origin: spec.origin,
            residual: spec.capacity,
        });
        if let Some(adj) = self.adjacency.get_mut(spec.from) {
            adj.outputs.push(edge);
        }
        if let Some(adj) = self.adjacency.get_mut(spec.to) {
            adj.inputs.push(edge);
        }
        Ok(edge)
    }

    /// Replace an edge's capacity. Residual state is reset to match.
    pub fn set_capacity(&mut self, edge: EdgeKey, capacity: u64) -> Result<(), GraphError> {
        let data = self
            .edges
            .get_mut(edge)
            .ok_or(GraphError::EdgeNotFound(edge))?;
        data.capacity = capacity;
        data.residual = capacity;
        Ok(())
    }

    /// Restore every edge to zero flow.
    pub fn reset_residuals(&mut self) {
        for (_, edge) in self.edges.iter_mut() {
            edge.residual = edge.capacity;
        }
    }

    /// Record the residual left on an edge by a solve.
    pub(crate) fn set_residual(&mut self, edge: EdgeKey, residual: u64) {
        if let Some(data) = self.edges.get_mut(edge) {
            data.residual = residual.min(data.capacity);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Look up the node key for a topology id.
    pub fn node_key(&self, id: NodeId) -> Option<NodeKey> {
        self.index.get(&id).copied()
    }

    /// Get the node data for a given node key.
    pub fn node(&self, node: NodeKey) -> Option<&NodeData> {
        self.nodes.get(node)
    }

    /// Get the edge data for a given edge key.
    pub fn edge(&self, edge: EdgeKey) -> Option<&EdgeData> {
        self.edges.get(edge)
    }

    /// Get the edges coming into a node.
    pub fn inputs(&self, node: NodeKey) -> &[EdgeKey] {
        self.adjacency
            .get(node)
            .map(|adj| adj.inputs.as_slice())
            .unwrap_or(&[])
    }

    /// Get the edges going out of a node.
    pub fn outputs(&self, node: NodeKey) -> &[EdgeKey] {
        self.adjacency
            .get(node)
            .map(|adj| adj.outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns true if the topology id is a node of this graph.
    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Iterate over all node keys and their data, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &NodeData)> {
        self.nodes.iter()
    }

    /// Iterate over all edge keys and their data, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeKey, &EdgeData)> {
        self.edges.iter()
    }

    /// Flow carried by an edge in the last solve, zero for unknown keys.
    pub fn flow_on(&self, edge: EdgeKey) -> u64 {
        self.edges.get(edge).map_or(0, EdgeData::flow)
    }

    /// Topology id of a node key, `None` for keys from another graph.
    pub fn node_id(&self, node: NodeKey) -> Option<NodeId> {
        self.nodes.get(node).map(|n| n.id)
    }

    /// Sum of all edge capacities.
    pub fn total_capacity(&self) -> u64 {
        self.edges.values().map(|e| e.capacity).sum()
    }

    /// Combined capacity of every edge directed `from -> to`.
    pub fn capacity_between(&self, from: NodeId, to: NodeId) -> u64 {
        let (Some(a), Some(b)) = (self.node_key(from), self.node_key(to)) else {
            return 0;
        };
        self.outputs(a)
            .iter()
            .filter_map(|&e| self.edges.get(e))
            .filter(|e| e.to == b)
            .map(|e| e.capacity)
            .sum()
    }

    /// A flat, order-preserving description of every edge. Two graphs built
    /// from the same input produce identical summaries.
    pub fn edge_summary(&self) -> Vec<EdgeSummary> {
        self.edges
            .values()
            .map(|e| EdgeSummary {
                from: self.nodes[e.from].id,
                to: self.nodes[e.to].id,
                segment: e.segment,
                capacity: e.capacity,
                cost_s: e.cost_s,
            })
            .collect()
    }
}

/// Topology-level view of one edge, see [`FlowGraph::edge_summary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSummary {
    pub from: NodeId,
    pub to: NodeId,
    pub segment: SegmentId,
    pub capacity: u64,
    pub cost_s: f64,
}
