//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::builder::RegionFilter;
use crate::cache::{CacheError, CacheGateway, CacheKey};
use crate::graph::{EdgeOrigin, EdgeSpec, FlowGraph};
use crate::id::*;
use crate::metrics::RiskThresholds;
use crate::policy::{NodeSelector, SelectorPolicy, Terminals};
use crate::scenario::*;
use crate::segment::{GeoPoint, RoadClass, SegmentRecord};
use crate::store::{DatasetVersion, SegmentStore, StoreError};
use std::time::Duration;

pub const TEST_REGION: &str = "Tampa Bay";

// ===========================================================================
// Segment constructors
// ===========================================================================

/// A 1 km, 55 mph standard segment in [`TEST_REGION`] without geometry.
pub fn seg(id: i64, from: i64, to: i64, lanes: u32) -> SegmentRecord {
    SegmentRecord {
        id: SegmentId(id),
        source: NodeId(from),
        target: NodeId(to),
        region: TEST_REGION.to_string(),
        length_m: 1000.0,
        lanes,
        speed_limit_mph: 55.0,
        road_class: RoadClass::Standard,
        name: None,
        start: None,
        end: None,
    }
}

/// Like [`seg`], with geometry endpoints given as `(lon, lat)`.
pub fn seg_at(
    id: i64,
    from: i64,
    to: i64,
    lanes: u32,
    start: (f64, f64),
    end: (f64, f64),
) -> SegmentRecord {
    SegmentRecord {
        start: Some(GeoPoint::new(start.0, start.1)),
        end: Some(GeoPoint::new(end.0, end.1)),
        ..seg(id, from, to, lanes)
    }
}

pub fn edge_spec(
    from: NodeKey,
    to: NodeKey,
    capacity: u64,
    class: RoadClass,
    bearing_deg: Option<f64>,
) -> EdgeSpec {
    EdgeSpec {
        from,
        to,
        segment: SegmentId(0),
        class,
        capacity,
        cost_s: 60.0,
        bearing_deg,
        origin: EdgeOrigin::Segment,
    }
}

// ===========================================================================
// Hand-built networks
// ===========================================================================

/// S(1) -> A(2) -> T(4) at 10 and S(1) -> B(3) -> T(4) at 15. Max flow 25.
pub fn parallel_paths() -> (FlowGraph, Terminals) {
    let mut g = FlowGraph::new();
    let s = g.add_node(NodeId(1), None);
    let a = g.add_node(NodeId(2), None);
    let b = g.add_node(NodeId(3), None);
    let t = g.add_node(NodeId(4), None);
    for (from, to, cap) in [(s, a, 10), (a, t, 10), (s, b, 15), (b, t, 15)] {
        g.add_edge(edge_spec(from, to, cap, RoadClass::Standard, None))
            .expect("fixture edge");
    }
    (g, Terminals::new(vec![NodeId(1)], vec![NodeId(4)]))
}

/// Positions for the five-node evacuation fixtures, south to north.
fn evacuation_positions() -> [(i64, GeoPoint); 5] {
    [
        (1, GeoPoint::new(0.0, 0.0)),
        (2, GeoPoint::new(-0.1, 0.5)),
        (3, GeoPoint::new(0.1, 0.5)),
        (4, GeoPoint::new(0.1, 0.75)),
        (5, GeoPoint::new(0.0, 1.0)),
    ]
}

/// Five nodes, six interstate edges, evacuating north from node 1 to node 5.
///
/// The min cut {2->5 at 7000, 3->4 at 5500} is 12,500 vph. The southbound
/// 4->3 edge carries 2000 vph against the evacuation; reversing it adds
/// 2000 across the cut for 14,500 vph.
pub fn evacuation_network() -> (FlowGraph, Terminals) {
    let mut g = FlowGraph::new();
    let positions = evacuation_positions();
    let keys: Vec<NodeKey> = positions
        .iter()
        .map(|(id, pos)| g.add_node(NodeId(*id), Some(*pos)))
        .collect();
    let edges = [
        (1, 2, 9000),
        (1, 3, 9000),
        (2, 5, 7000),
        (3, 4, 5500),
        (4, 5, 8000),
        (4, 3, 2000),
    ];
    for (segment, (from, to, cap)) in edges.into_iter().enumerate() {
        let (a, b) = ((from - 1) as usize, (to - 1) as usize);
        let bearing = positions[a].1.bearing_to(&positions[b].1);
        let mut spec = edge_spec(keys[a], keys[b], cap, RoadClass::Interstate, bearing);
        spec.segment = SegmentId(segment as i64 + 1);
        g.add_edge(spec).expect("fixture edge");
    }
    (g, Terminals::new(vec![NodeId(1)], vec![NodeId(5)]))
}

/// The evacuation network's shape as segment records, with lane counts in
/// place of the hand-picked capacities.
///
/// Baseline min cut {2->5 at 3 lanes, 3->4 at 2 lanes} is 9000 vph;
/// reversing the one-lane southbound 4->3 raises it to 10,800.
pub fn evacuation_records() -> Vec<SegmentRecord> {
    let positions = evacuation_positions();
    let pos = |id: i64| {
        let p = positions[(id - 1) as usize].1;
        (p.lon, p.lat)
    };
    [
        (1, 1, 2, 5),
        (2, 1, 3, 5),
        (3, 2, 5, 3),
        (4, 3, 4, 2),
        (5, 4, 5, 4),
        (6, 4, 3, 1),
    ]
    .into_iter()
    .map(|(id, from, to, lanes)| SegmentRecord {
        road_class: RoadClass::Interstate,
        ..seg_at(id, from, to, lanes, pos(from), pos(to))
    })
    .collect()
}

/// A `width` x `height` grid. Every node links east and north, capacities
/// vary deterministically. Sources are the west column, sinks the east.
pub fn grid_network(width: i64, height: i64) -> (FlowGraph, Terminals) {
    let mut g = FlowGraph::new();
    let id = |x: i64, y: i64| NodeId(y * width + x);
    for y in 0..height {
        for x in 0..width {
            g.add_node(id(x, y), None);
        }
    }
    let mut segment = 0;
    for y in 0..height {
        for x in 0..width {
            let from = g.node_key(id(x, y)).expect("grid node");
            let mut neighbours = Vec::new();
            if x + 1 < width {
                neighbours.push(id(x + 1, y));
            }
            if y + 1 < height {
                neighbours.push(id(x, y + 1));
            }
            for n in neighbours {
                segment += 1;
                let to = g.node_key(n).expect("grid node");
                let lanes = (segment * 7 % 4 + 1) as u64;
                let mut spec = edge_spec(from, to, lanes * 1800, RoadClass::Standard, None);
                spec.segment = SegmentId(segment);
                g.add_edge(spec).expect("grid edge");
            }
        }
    }
    let sources = (0..height).map(|y| id(0, y)).collect();
    let sinks = (0..height).map(|y| id(width - 1, y)).collect();
    (g, Terminals::new(sources, sinks))
}

// ===========================================================================
// Configuration
// ===========================================================================

/// A region evacuating towards `azimuth_deg`, 90,000 people, sources at
/// in-degree zero and sinks at out-degree zero.
pub fn region_with_azimuth(azimuth_deg: f64) -> Region {
    Region::new(
        TEST_REGION,
        azimuth_deg,
        90_000,
        RiskThresholds::default(),
        SelectorPolicy {
            sources: NodeSelector::Origins,
            sinks: NodeSelector::Terminals,
        },
    )
}

pub fn north_region() -> Region {
    region_with_azimuth(0.0)
}

pub fn region_table() -> RegionTable {
    let mut b = RegionTableBuilder::new();
    b.register(north_region()).expect("fixture region");
    b.build()
}

/// `baseline`, `contraflow` (additive) and `reallocate`.
pub fn scenario_table() -> ScenarioTable {
    let mut b = ScenarioTableBuilder::new();
    b.register(Scenario::baseline("baseline"))
        .expect("fixture scenario");
    for (id, mode) in [
        ("contraflow", ContraflowMode::Additive),
        ("reallocate", ContraflowMode::Reallocate),
    ] {
        let mut s = Scenario::baseline(id).with_contraflow(ContraflowRule::with_mode(mode));
        s.label = id.to_string();
        s.affected_regions = vec![TEST_REGION.to_string()];
        b.register(s).expect("fixture scenario");
    }
    b.build(&region_table()).expect("fixture table")
}

// ===========================================================================
// Doubles
// ===========================================================================

/// A segment store that is always down.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

impl SegmentStore for FailingStore {
    fn dataset_version(&self) -> Result<DatasetVersion, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn segments(&self, _filter: &RegionFilter) -> Result<Vec<SegmentRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// A cache whose every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCache;

impl<V> CacheGateway<V> for FailingCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<V>, CacheError> {
        Err(CacheError::Unavailable("timeout".to_string()))
    }

    fn put(&self, _key: CacheKey, _value: &V, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("timeout".to_string()))
    }
}
