//! Property-based tests for the evacflow core.
//!
//! Uses proptest to generate random segment collections, then verifies the
//! builder, solver and contraflow invariants hold.

use evacflow_core::builder::{GraphBuilder, RegionFilter};
use evacflow_core::contraflow;
use evacflow_core::graph::FlowGraph;
use evacflow_core::id::*;
use evacflow_core::maxflow::MaxFlowSolver;
use evacflow_core::policy::Terminals;
use evacflow_core::scenario::{ContraflowMode, ContraflowRule, Scenario};
use evacflow_core::segment::{RoadClass, SegmentRecord, angular_distance};
use evacflow_core::test_utils::*;
use proptest::prelude::*;
use std::collections::HashMap;

// ===========================================================================
// Generators
// ===========================================================================

/// Nodes sit on a 4-wide lattice, 0.1 degree apart.
fn node_pos(id: i64) -> (f64, f64) {
    ((id % 4) as f64 * 0.1, (id / 4) as f64 * 0.1)
}

fn arb_class() -> impl Strategy<Value = RoadClass> {
    prop_oneof![
        Just(RoadClass::Interstate),
        Just(RoadClass::Toll),
        Just(RoadClass::Major),
        Just(RoadClass::Standard),
    ]
}

/// Random segments over up to 12 nodes. Some are invalid (no lanes,
/// self-loops), most carry geometry.
fn arb_records(max: usize) -> impl Strategy<Value = Vec<SegmentRecord>> {
    proptest::collection::vec(
        (0..12i64, 0..12i64, 0..5u32, arb_class(), prop::bool::weighted(0.8)),
        1..=max,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (from, to, lanes, class, geometry))| {
                let id = i as i64 + 1;
                let record = if geometry {
                    seg_at(id, from, to, lanes, node_pos(from), node_pos(to))
                } else {
                    seg(id, from, to, lanes)
                };
                SegmentRecord {
                    road_class: class,
                    ..record
                }
            })
            .collect()
    })
}

fn build(records: Vec<SegmentRecord>) -> FlowGraph {
    GraphBuilder::new(RegionFilter::All)
        .build(records)
        .expect("build never fails on records")
        .graph
}

/// Lowest and highest node id as source and sink, when distinct.
fn extreme_terminals(graph: &FlowGraph) -> Option<Terminals> {
    let ids: Vec<NodeId> = graph.nodes().map(|(_, n)| n.id).collect();
    let (min, max) = (ids.iter().min()?, ids.iter().max()?);
    (min != max).then(|| Terminals::new(vec![*min], vec![*max]))
}

fn pair_capacities(graph: &FlowGraph) -> HashMap<(NodeId, NodeId), u64> {
    let mut pairs = HashMap::new();
    for e in graph.edge_summary() {
        let key = if e.from < e.to { (e.from, e.to) } else { (e.to, e.from) };
        *pairs.entry(key).or_insert(0) += e.capacity;
    }
    pairs
}

/// Capacity-weighted projection of every edge onto the evacuation azimuth.
fn projection(graph: &FlowGraph, azimuth: f64) -> f64 {
    graph
        .edges()
        .filter_map(|(_, e)| {
            let bearing = e.bearing_deg?;
            Some(e.capacity as f64 * angular_distance(bearing, azimuth).to_radians().cos())
        })
        .sum()
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Same records in any order build the same graph.
    #[test]
    fn builder_is_deterministic(records in arb_records(40)) {
        let mut reversed = records.clone();
        reversed.reverse();

        let a = GraphBuilder::new(RegionFilter::All).build(records).unwrap();
        let b = GraphBuilder::new(RegionFilter::All).build(reversed).unwrap();
        prop_assert_eq!(a.graph.edge_summary(), b.graph.edge_summary());
        prop_assert_eq!(a.report, b.report);
    }

    /// Every edge carries a positive whole number of HCM lanes.
    #[test]
    fn capacities_are_lane_multiples(records in arb_records(40)) {
        let expected = records
            .iter()
            .filter(|r| r.lanes > 0 && r.source != r.target)
            .count();
        let graph = build(records);
        prop_assert_eq!(graph.edge_count(), expected);
        for e in graph.edge_summary() {
            prop_assert!(e.capacity > 0);
            prop_assert_eq!(e.capacity % 1800, 0);
            prop_assert!(e.cost_s > 0.0);
        }
    }

    /// Max flow equals its min cut and never exceeds what the terminals
    /// can emit or absorb.
    #[test]
    fn flow_bounded_by_cuts(records in arb_records(40)) {
        let mut graph = build(records);
        let Some(terminals) = extreme_terminals(&graph) else { return Ok(()); };
        let flow = MaxFlowSolver::default().solve(&mut graph, &terminals).unwrap();

        let source = graph.node_key(terminals.sources[0]).unwrap();
        let sink = graph.node_key(terminals.sinks[0]).unwrap();
        let out_cap: u64 = graph.outputs(source).iter().map(|&e| graph.edge(e).unwrap().capacity).sum();
        let in_cap: u64 = graph.inputs(sink).iter().map(|&e| graph.edge(e).unwrap().capacity).sum();
        prop_assert!(flow.value <= out_cap);
        prop_assert!(flow.value <= in_cap);

        let cut: u64 = flow.min_cut.iter().map(|&e| graph.edge(e).unwrap().capacity).sum();
        prop_assert_eq!(cut, flow.value);

        for (key, edge) in graph.edges() {
            prop_assert!(graph.flow_on(key) <= edge.capacity);
        }
    }

    /// Raising one edge's capacity cannot lower the max flow.
    #[test]
    fn flow_is_monotone_in_capacity(
        records in arb_records(40),
        pick in any::<prop::sample::Index>(),
        extra in 1u64..10_000,
    ) {
        let mut graph = build(records);
        let Some(terminals) = extreme_terminals(&graph) else { return Ok(()); };
        prop_assume!(graph.edge_count() > 0);
        let solver = MaxFlowSolver::default();
        let before = solver.solve(&mut graph, &terminals).unwrap().value;

        let (key, capacity) = graph
            .edges()
            .nth(pick.index(graph.edge_count()))
            .map(|(k, e)| (k, e.capacity))
            .unwrap();
        graph.set_capacity(key, capacity + extra).unwrap();
        let after = solver.solve(&mut graph, &terminals).unwrap().value;
        prop_assert!(after >= before, "{} -> {}", before, after);
    }

    /// Solving twice gives the same value and per-edge flows.
    #[test]
    fn solver_is_deterministic(records in arb_records(40)) {
        let mut a = build(records.clone());
        let mut b = build(records);
        let Some(terminals) = extreme_terminals(&a) else { return Ok(()); };
        let solver = MaxFlowSolver::default();
        let fa = solver.solve(&mut a, &terminals).unwrap();
        let fb = solver.solve(&mut b, &terminals).unwrap();
        prop_assert_eq!(fa.value, fb.value);
        prop_assert_eq!(fa.augmentations, fb.augmentations);
        let flows_a: Vec<u64> = a.edges().map(|(k, _)| a.flow_on(k)).collect();
        let flows_b: Vec<u64> = b.edges().map(|(k, _)| b.flow_on(k)).collect();
        prop_assert_eq!(flows_a, flows_b);
    }

    /// Contraflow moves capacity, it never creates it: each corridor keeps
    /// its combined two-way capacity and the network only tilts towards the
    /// evacuation direction.
    #[test]
    fn contraflow_respects_physical_bounds(
        records in arb_records(40),
        reallocate in any::<bool>(),
        share_pct in 1u32..=100,
        azimuth in 0u32..360,
    ) {
        let graph = build(records);
        let mode = if reallocate { ContraflowMode::Reallocate } else { ContraflowMode::Additive };
        let rule = ContraflowRule {
            lane_share: f64::from(share_pct) / 100.0,
            ..ContraflowRule::with_mode(mode)
        };
        let scenario = Scenario::baseline("prop").with_contraflow(rule);
        let region = region_with_azimuth(f64::from(azimuth));

        let out = contraflow::apply(&graph, &scenario, &region).unwrap();
        prop_assert_eq!(out.graph.total_capacity(), graph.total_capacity());
        prop_assert_eq!(pair_capacities(&out.graph), pair_capacities(&graph));

        let az = f64::from(azimuth);
        prop_assert!(projection(&out.graph, az) >= projection(&graph, az) - 1e-6);

        let moved: u64 = out.edits.iter().map(|e| e.moved_vph).sum();
        prop_assert!(moved <= graph.total_capacity());
    }
}
