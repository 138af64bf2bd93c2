//! Graph builder: turns a collection of segment records into a [`FlowGraph`].
//!
//! Records are processed in ascending segment-id order so that the same
//! collection always yields the same graph regardless of the order the
//! store returned it in. Bad records are skipped and reported, never fatal.

use crate::graph::{EdgeOrigin, EdgeSpec, FlowGraph, GraphError};
use crate::id::SegmentId;
use crate::segment::{RoadSegment, SegmentError, SegmentRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Region filter
// ---------------------------------------------------------------------------

/// Which segments a build considers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionFilter {
    All,
    /// Case-insensitive region name.
    Only(String),
}

impl RegionFilter {
    pub fn only(name: impl Into<String>) -> Self {
        Self::Only(name.into())
    }

    pub fn matches(&self, region: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(name) => name.eq_ignore_ascii_case(region),
        }
    }
}

// ---------------------------------------------------------------------------
// Build report
// ---------------------------------------------------------------------------

/// Why a record did not become an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    Invalid(SegmentError),
    DuplicateId,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(err) => write!(f, "{err}"),
            Self::DuplicateId => write!(f, "duplicate segment id"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSegment {
    pub segment: SegmentId,
    pub reason: SkipReason,
}

/// Bookkeeping for one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Records that became edges.
    pub accepted: usize,
    /// Records rejected for data-quality reasons.
    pub skipped: Vec<SkippedSegment>,
    /// Records outside the region filter.
    pub filtered_out: usize,
}

impl BuildReport {
    pub fn skip_count(&self) -> usize {
        self.skipped.len()
    }
}

/// A built graph and how it was built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub graph: FlowGraph,
    pub report: BuildReport,
}

// ---------------------------------------------------------------------------
// GraphBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GraphBuilder {
    filter: RegionFilter,
}

impl GraphBuilder {
    pub fn new(filter: RegionFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &RegionFilter {
        &self.filter
    }

    /// Build a graph with one directed edge per valid in-region segment.
    pub fn build(&self, records: Vec<SegmentRecord>) -> Result<BuildOutcome, GraphError> {
        let mut records = records;
        // Stable sort: the first occurrence of a duplicated id wins.
        records.sort_by_key(|r| r.id);

        let mut graph = FlowGraph::new();
        let mut report = BuildReport::default();
        let mut seen: HashSet<SegmentId> = HashSet::with_capacity(records.len());

        for record in records {
            if !self.filter.matches(&record.region) {
                report.filtered_out += 1;
                continue;
            }
            let id = record.id;
            if !seen.insert(id) {
                debug!(segment = %id, "skipping duplicate segment id");
                report.skipped.push(SkippedSegment {
                    segment: id,
                    reason: SkipReason::DuplicateId,
                });
                continue;
            }

            let segment = match RoadSegment::validate(record) {
                Ok(segment) => segment,
                Err(err) => {
                    debug!(segment = %id, reason = %err, "skipping invalid segment");
                    report.skipped.push(SkippedSegment {
                        segment: id,
                        reason: SkipReason::Invalid(err),
                    });
                    continue;
                }
            };

            let from = graph.add_node(segment.record.source, segment.record.start);
            let to = graph.add_node(segment.record.target, segment.record.end);
            graph.add_edge(EdgeSpec {
                from,
                to,
                segment: id,
                class: segment.record.road_class,
                capacity: segment.capacity_vph,
                cost_s: segment.cost_s,
                bearing_deg: segment.bearing_deg,
                origin: EdgeOrigin::Segment,
            })?;
            report.accepted += 1;
        }

        if report.skip_count() > 0 {
            warn!(
                skipped = report.skip_count(),
                accepted = report.accepted,
                "segments skipped during graph build"
            );
        }
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            filtered_out = report.filtered_out,
            "graph built"
        );

        Ok(BuildOutcome { graph, report })
    }
}
