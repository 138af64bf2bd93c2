//! Evacflow Core -- road-network evacuation capacity under disaster stress.
//!
//! This crate models a region's road network as a capacity-weighted flow
//! graph and computes the maximum vehicle throughput from population
//! centres to safe egress points, before and after scenario changes such as
//! contraflow lane reversal.
//!
//! # Simulation Pipeline
//!
//! Each call to [`engine::Engine::simulate`] runs:
//!
//! 1. **Build** -- Segment records become a [`graph::FlowGraph`], one directed
//!    edge per valid segment (capacity = lanes x 1800 vph).
//! 2. **Select** -- The region's [`policy::TerminalPolicy`] picks source and
//!    sink nodes.
//! 3. **Modify** -- [`contraflow::apply`] derives the scenario graph from a
//!    copy of the baseline.
//! 4. **Solve** -- [`maxflow::MaxFlowSolver`] runs Edmonds-Karp under a
//!    time and augmentation budget.
//! 5. **Report** -- [`metrics::derive_metrics`] turns the flow into a
//!    clearance time and a gridlock risk label.
//!
//! Results and built graphs go through a [`cache::CacheGateway`] keyed by
//! scenario, region and dataset version.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Simulation entry point, caching and single-flight.
//! - [`graph::FlowGraph`] -- Directed multigraph with capacity, cost and
//!   residual per edge.
//! - [`builder::GraphBuilder`] -- Deterministic graph construction with a
//!   skip report for bad records.
//! - [`scenario::ScenarioTable`] / [`scenario::RegionTable`] -- Immutable
//!   configuration tables (frozen at startup).
//! - [`store::SegmentStore`] -- Read contract for road segment data.

pub mod builder;
pub mod cache;
pub mod contraflow;
pub mod engine;
pub mod graph;
pub mod id;
pub mod maxflow;
pub mod metrics;
pub mod policy;
pub mod scenario;
pub mod segment;
pub mod singleflight;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
