//! Edmonds-Karp maximum flow.
//!
//! The solver copies the graph into a compact residual network: nodes become
//! dense indices, every edge becomes a pair of arcs stored side by side so an
//! arc's reverse is `index ^ 1`. A super-source feeds every source and every
//! sink drains into a super-sink, both with unbounded capacity. Augmenting
//! paths are found by BFS in arc-insertion order, which makes the sequence of
//! augmentations (and so the per-edge flow) deterministic.

use crate::graph::FlowGraph;
use crate::id::{EdgeKey, NodeId, NodeKey};
use crate::policy::Terminals;
use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolverError {
    #[error("source set is empty")]
    EmptySources,
    #[error("sink set is empty")]
    EmptySinks,
    #[error("source node {0} is not in the graph")]
    UnknownSource(NodeId),
    #[error("sink node {0} is not in the graph")]
    UnknownSink(NodeId),
    #[error("node {0} is both a source and a sink")]
    TerminalsOverlap(NodeId),
    #[error("solve budget exceeded after {augmentations} augmentations ({partial_flow} vph found)")]
    BudgetExceeded { partial_flow: u64, augmentations: u64 },
}

// ---------------------------------------------------------------------------
// Budget and result
// ---------------------------------------------------------------------------

/// Limits on a single solve. The default is unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveBudget {
    pub deadline: Option<Instant>,
    pub max_augmentations: Option<u64>,
}

impl SolveBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            max_augmentations: None,
        }
    }

    pub fn max_augmentations(mut self, limit: u64) -> Self {
        self.max_augmentations = Some(limit);
        self
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Outcome of a completed solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxFlow {
    /// Maximum flow, vehicles/hour.
    pub value: u64,
    pub augmentations: u64,
    pub node_count: usize,
    pub edge_count: usize,
    /// Saturated edges separating the sources from the sinks, in edge
    /// insertion order. Their capacities sum to `value`.
    pub min_cut: Vec<EdgeKey>,
}

// ---------------------------------------------------------------------------
// Residual network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Arc {
    to: usize,
    residual: u64,
}

#[derive(Debug, Default)]
struct Residual {
    arcs: Vec<Arc>,
    /// Outgoing arc indices per node, in insertion order.
    heads: Vec<Vec<usize>>,
}

impl Residual {
    fn with_nodes(n: usize) -> Self {
        Self {
            arcs: Vec::new(),
            heads: vec![Vec::new(); n],
        }
    }

    /// Push a forward arc and its zero-capacity reverse. Returns the forward
    /// arc index.
    fn add_pair(&mut self, from: usize, to: usize, capacity: u64) -> usize {
        let forward = self.arcs.len();
        self.arcs.push(Arc {
            to,
            residual: capacity,
        });
        self.arcs.push(Arc {
            to: from,
            residual: 0,
        });
        self.heads[from].push(forward);
        self.heads[to].push(forward + 1);
        forward
    }

    /// Shortest augmenting path by BFS. Fills `parent` with the arc used to
    /// reach each node and returns whether `sink` was reached.
    fn bfs(&self, source: usize, sink: usize, parent: &mut [Option<usize>]) -> bool {
        parent.fill(None);
        let mut visited = vec![false; self.heads.len()];
        visited[source] = true;
        let mut queue = VecDeque::from([source]);
        while let Some(node) = queue.pop_front() {
            for &arc in &self.heads[node] {
                let Arc { to, residual } = self.arcs[arc];
                if residual == 0 || visited[to] {
                    continue;
                }
                visited[to] = true;
                parent[to] = Some(arc);
                if to == sink {
                    return true;
                }
                queue.push_back(to);
            }
        }
        false
    }

    /// Nodes reachable from `source` over arcs with residual capacity.
    fn reachable(&self, source: usize) -> Vec<bool> {
        let mut visited = vec![false; self.heads.len()];
        visited[source] = true;
        let mut queue = VecDeque::from([source]);
        while let Some(node) = queue.pop_front() {
            for &arc in &self.heads[node] {
                let Arc { to, residual } = self.arcs[arc];
                if residual > 0 && !visited[to] {
                    visited[to] = true;
                    queue.push_back(to);
                }
            }
        }
        visited
    }
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct MaxFlowSolver {
    budget: SolveBudget,
}

impl MaxFlowSolver {
    pub fn new(budget: SolveBudget) -> Self {
        Self { budget }
    }

    /// Compute the maximum flow from `terminals.sources` to
    /// `terminals.sinks`.
    ///
    /// Residuals from earlier solves are discarded first. Afterwards the
    /// graph's residuals describe the flow found, so
    /// [`FlowGraph::flow_on`] reports per-edge flow. That also holds for the
    /// partial flow behind [`SolverError::BudgetExceeded`].
    pub fn solve(
        &self,
        graph: &mut FlowGraph,
        terminals: &Terminals,
    ) -> Result<MaxFlow, SolverError> {
        let (sources, sinks) = check_terminals(graph, terminals)?;
        graph.reset_residuals();

        let mut index: SecondaryMap<NodeKey, usize> = SecondaryMap::new();
        for (i, (key, _)) in graph.nodes().enumerate() {
            index.insert(key, i);
        }
        let n = graph.node_count();
        let (super_source, super_sink) = (n, n + 1);
        let mut net = Residual::with_nodes(n + 2);

        for key in &sources {
            net.add_pair(super_source, index[*key], u64::MAX);
        }
        let mut edge_arcs: Vec<(EdgeKey, usize)> = Vec::with_capacity(graph.edge_count());
        for (key, edge) in graph.edges() {
            let arc = net.add_pair(index[edge.from], index[edge.to], edge.capacity);
            edge_arcs.push((key, arc));
        }
        for key in &sinks {
            net.add_pair(index[*key], super_sink, u64::MAX);
        }

        let mut parent = vec![None; n + 2];
        let mut value: u64 = 0;
        let mut augmentations: u64 = 0;

        loop {
            if self.budget.expired() {
                write_back(graph, &net, &edge_arcs);
                return Err(budget_exceeded(value, augmentations));
            }
            if !net.bfs(super_source, super_sink, &mut parent) {
                break;
            }
            if self
                .budget
                .max_augmentations
                .is_some_and(|limit| augmentations >= limit)
            {
                write_back(graph, &net, &edge_arcs);
                return Err(budget_exceeded(value, augmentations));
            }

            let mut bottleneck = u64::MAX;
            let mut node = super_sink;
            while let Some(arc) = parent[node] {
                bottleneck = bottleneck.min(net.arcs[arc].residual);
                node = net.arcs[arc ^ 1].to;
            }

            let mut node = super_sink;
            while let Some(arc) = parent[node] {
                net.arcs[arc].residual -= bottleneck;
                net.arcs[arc ^ 1].residual = net.arcs[arc ^ 1].residual.saturating_add(bottleneck);
                node = net.arcs[arc ^ 1].to;
            }

            value += bottleneck;
            augmentations += 1;
        }

        write_back(graph, &net, &edge_arcs);

        let reachable = net.reachable(super_source);
        let min_cut = graph
            .edges()
            .filter(|(_, e)| e.capacity > 0 && reachable[index[e.from]] && !reachable[index[e.to]])
            .map(|(key, _)| key)
            .collect();

        debug!(value, augmentations, nodes = n, edges = graph.edge_count(), "max flow solved");
        Ok(MaxFlow {
            value,
            augmentations,
            node_count: n,
            edge_count: graph.edge_count(),
            min_cut,
        })
    }
}

/// Validate terminals and map them to node keys.
fn check_terminals(
    graph: &FlowGraph,
    terminals: &Terminals,
) -> Result<(Vec<NodeKey>, Vec<NodeKey>), SolverError> {
    if terminals.sources.is_empty() {
        return Err(SolverError::EmptySources);
    }
    if terminals.sinks.is_empty() {
        return Err(SolverError::EmptySinks);
    }
    let sources = terminals
        .sources
        .iter()
        .map(|&id| graph.node_key(id).ok_or(SolverError::UnknownSource(id)))
        .collect::<Result<Vec<_>, _>>()?;
    let sinks = terminals
        .sinks
        .iter()
        .map(|&id| graph.node_key(id).ok_or(SolverError::UnknownSink(id)))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(&both) = terminals
        .sources
        .iter()
        .find(|id| terminals.sinks.contains(id))
    {
        return Err(SolverError::TerminalsOverlap(both));
    }
    Ok((sources, sinks))
}

fn write_back(graph: &mut FlowGraph, net: &Residual, edge_arcs: &[(EdgeKey, usize)]) {
    for &(key, arc) in edge_arcs {
        graph.set_residual(key, net.arcs[arc].residual);
    }
}

fn budget_exceeded(partial_flow: u64, augmentations: u64) -> SolverError {
    debug!(partial_flow, augmentations, "solve budget exceeded");
    SolverError::BudgetExceeded {
        partial_flow,
        augmentations,
    }
}
