use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a node (intersection) inside one [`FlowGraph`](crate::graph::FlowGraph).
    pub struct NodeKey;

    /// Identifies an edge (directed road link) inside one [`FlowGraph`](crate::graph::FlowGraph).
    pub struct EdgeKey;
}

/// A topology node identifier as it appears on segment endpoints.
///
/// Nodes are discovered from segments, never declared, so this is the only
/// stable name a node has across graph builds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub i64);

/// Identifies a road segment record supplied by the segment store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SegmentId(pub i64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_ordering() {
        assert!(NodeId(1) < NodeId(2));
        assert_eq!(NodeId(7), NodeId(7));
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(SegmentId(10), "i-75 nb");
        map.insert(SegmentId(11), "i-75 sb");
        assert_eq!(map[&SegmentId(10)], "i-75 nb");
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        let json = serde_json::to_string(&NodeId(42)).unwrap();
        assert_eq!(json, "42");
        let back: SegmentId = serde_json::from_str("17").unwrap();
        assert_eq!(back, SegmentId(17));
    }
}
