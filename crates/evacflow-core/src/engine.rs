//! The simulation entry point.
//!
//! # Architecture
//!
//! The [`Engine`] owns:
//! - The read-only [`ScenarioTable`] and [`RegionTable`], shared via `Arc`
//! - A [`SegmentStore`] it reads road data and the dataset version from
//! - Two cache gateways: simulation results and built baseline graphs
//! - A [`SingleFlight`] table collapsing concurrent runs of the same key
//! - [`EngineStats`] counters
//!
//! # Pipeline
//!
//! Each [`Engine::simulate`] call runs:
//! 1. **Resolve** -- look up scenario and region; unknown ids are rejected
//! 2. **Version** -- read the dataset version (a store fault is fatal)
//! 3. **Result cache** -- return a cached result for the versioned key
//! 4. **Single-flight** -- join a concurrent run of the same key, or lead one
//! 5. **Graph** -- reuse the cached baseline graph for the region, or build it
//! 6. **Terminals** -- the region's policy picks sources and sinks
//! 7. **Contraflow** -- derive the scenario graph from the baseline
//! 8. **Solve** -- Edmonds-Karp under the configured budget
//! 9. **Metrics** -- clearance time and gridlock risk; cache and return
//!
//! Nothing but the caches and the stats counters is shared between runs.
//! Every run solves on its own graph copy.

use crate::builder::{BuildOutcome, GraphBuilder, RegionFilter};
use crate::cache::{CacheError, CacheGateway, CacheKey, GRAPH_TTL, NoCache, SIMULATION_TTL};
use crate::contraflow::{self, ContraflowError};
use crate::graph::GraphError;
use crate::maxflow::{MaxFlowSolver, SolveBudget, SolverError};
use crate::metrics::{ClearanceTime, GridlockRisk, derive_metrics};
use crate::policy::PolicyError;
use crate::scenario::{Region, RegionTable, Scenario, ScenarioTable};
use crate::singleflight::{Role, SingleFlight};
use crate::store::{DatasetVersion, SegmentStore, StoreError};
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),
    #[error("unknown region '{0}'")]
    UnknownRegion(String),
    #[error("terminal selection failed: {0}")]
    Terminals(#[from] PolicyError),
    #[error("solver rejected input: {0}")]
    Solver(SolverError),
    #[error("contraflow failed: {0}")]
    Contraflow(#[from] ContraflowError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("segment store failed: {0}")]
    Store(#[from] StoreError),
    /// The solver ran out of budget and no cached result was available.
    #[error("result unavailable: solve budget exhausted ({partial_flow} vph after {augmentations} augmentations)")]
    Degraded { partial_flow: u64, augmentations: u64 },
}

impl SimulationError {
    /// The request itself is wrong; retrying will not help.
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::UnknownScenario(_) | Self::UnknownRegion(_) | Self::Terminals(_) => true,
            Self::Solver(e) => !matches!(e, SolverError::BudgetExceeded { .. }),
            Self::Contraflow(ContraflowError::InvalidLaneShare(_)) => true,
            _ => false,
        }
    }

    /// A transient failure; a later attempt may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Wall-clock budget for one solve.
    pub solve_timeout: Duration,
    /// Optional cap on augmenting paths per solve.
    pub max_augmentations: Option<u64>,
    pub result_ttl: Duration,
    pub graph_ttl: Duration,
    /// How long a caller waits on a concurrent run of the same key before
    /// computing itself.
    pub follower_wait: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let solve_timeout = Duration::from_secs(5);
        Self {
            solve_timeout,
            max_augmentations: None,
            result_ttl: SIMULATION_TTL,
            graph_ttl: GRAPH_TTL,
            follower_wait: solve_timeout + Duration::from_secs(1),
        }
    }
}

/// Monotonic counters, readable while the engine is in use.
#[derive(Debug, Default)]
pub struct EngineStats {
    graph_builds: AtomicU64,
    solves: AtomicU64,
    result_cache_hits: AtomicU64,
    graph_cache_hits: AtomicU64,
    segments_skipped: AtomicU64,
    cache_errors: AtomicU64,
    degraded: AtomicU64,
    shared_results: AtomicU64,
    independent_runs: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub graph_builds: u64,
    pub solves: u64,
    pub result_cache_hits: u64,
    pub graph_cache_hits: u64,
    pub segments_skipped: u64,
    pub cache_errors: u64,
    pub degraded: u64,
    /// Calls answered by a concurrent run of the same key.
    pub shared_results: u64,
    /// Calls that computed alongside a concurrent run of the same key.
    pub independent_runs: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            graph_builds: get(&self.graph_builds),
            solves: get(&self.solves),
            result_cache_hits: get(&self.result_cache_hits),
            graph_cache_hits: get(&self.graph_cache_hits),
            segments_skipped: get(&self.segments_skipped),
            cache_errors: get(&self.cache_errors),
            degraded: get(&self.degraded),
            shared_results: get(&self.shared_results),
            independent_runs: get(&self.independent_runs),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSize {
    pub nodes: usize,
    pub edges: usize,
}

/// Outcome of one simulation run. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub scenario_id: String,
    pub region: String,
    pub dataset_version: DatasetVersion,
    pub max_throughput_vph: u64,
    pub clearance: ClearanceTime,
    pub gridlock_risk: GridlockRisk,
    pub graph_size: GraphSize,
    pub skipped_segments: usize,
    pub contraflow_edits: usize,
}

impl SimulationResult {
    /// The caller-facing response shape.
    pub fn to_response(&self) -> SimulationResponse<'_> {
        SimulationResponse {
            scenario_id: &self.scenario_id,
            region: &self.region,
            max_throughput_vph: self.max_throughput_vph,
            clearance_time_hours: ClearanceHours(self.clearance),
            gridlock_risk: self.gridlock_risk,
            graph_size: self.graph_size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResponse<'a> {
    pub scenario_id: &'a str,
    pub region: &'a str,
    pub max_throughput_vph: u64,
    pub clearance_time_hours: ClearanceHours,
    pub gridlock_risk: GridlockRisk,
    pub graph_size: GraphSize,
}

/// Hours as a number, or the string `"unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearanceHours(pub ClearanceTime);

impl Serialize for ClearanceHours {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            ClearanceTime::Hours(h) => serializer.serialize_f64(h),
            ClearanceTime::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

type Outcome = Result<SimulationResult, SimulationError>;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    scenarios: Arc<ScenarioTable>,
    regions: Arc<RegionTable>,
    store: Arc<dyn SegmentStore>,
    results: Arc<dyn CacheGateway<SimulationResult>>,
    graphs: Arc<dyn CacheGateway<BuildOutcome>>,
    config: EngineConfig,
    stats: EngineStats,
    flights: SingleFlight<CacheKey, Outcome>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scenarios", &self.scenarios.len())
            .field("regions", &self.regions.len())
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine without caches. See [`with_result_cache`](Self::with_result_cache)
    /// and [`with_graph_cache`](Self::with_graph_cache).
    pub fn new(
        scenarios: Arc<ScenarioTable>,
        regions: Arc<RegionTable>,
        store: Arc<dyn SegmentStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            scenarios,
            regions,
            store,
            results: Arc::new(NoCache),
            graphs: Arc::new(NoCache),
            config,
            stats: EngineStats::default(),
            flights: SingleFlight::new(),
        }
    }

    pub fn with_result_cache(mut self, cache: Arc<dyn CacheGateway<SimulationResult>>) -> Self {
        self.results = cache;
        self
    }

    pub fn with_graph_cache(mut self, cache: Arc<dyn CacheGateway<BuildOutcome>>) -> Self {
        self.graphs = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Loaded scenarios, in configuration order.
    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Run (or fetch) the simulation of `scenario_id` over `region`.
    ///
    /// A concurrent run of the same key is joined for up to
    /// [`EngineConfig::follower_wait`].
    pub fn simulate(&self, scenario_id: &str, region: &str) -> Outcome {
        self.simulate_with(scenario_id, region, Some(self.config.follower_wait))
    }

    /// Like [`simulate`](Self::simulate), for callers that cannot block. A
    /// concurrent run of the same key is not waited on; this call computes
    /// its own result instead.
    pub fn simulate_nowait(&self, scenario_id: &str, region: &str) -> Outcome {
        self.simulate_with(scenario_id, region, None)
    }

    fn simulate_with(&self, scenario_id: &str, region: &str, wait: Option<Duration>) -> Outcome {
        let scenario = self
            .scenarios
            .get(scenario_id)
            .ok_or_else(|| SimulationError::UnknownScenario(scenario_id.to_string()))?;
        let region = self
            .regions
            .get(region)
            .ok_or_else(|| SimulationError::UnknownRegion(region.to_string()))?;

        let span = info_span!("simulate", scenario = %scenario.id, region = %region.name);
        let _enter = span.enter();

        let version = self.store.dataset_version()?;
        let key = CacheKey::simulation(&scenario.id, &region.name, version.as_str());
        if let Some(hit) = self.cached(&*self.results, &key) {
            debug!(%key, "result cache hit");
            EngineStats::bump(&self.stats.result_cache_hits, 1);
            return Ok(hit);
        }

        let compute = || self.compute(scenario, region, &version, &key);
        let (outcome, role) = match wait {
            Some(wait) => self.flights.run(key.clone(), wait, compute),
            None => self.flights.run_nowait(key.clone(), compute),
        };
        match role {
            Role::Leader => {}
            Role::Follower => {
                debug!(%key, "joined concurrent run");
                EngineStats::bump(&self.stats.shared_results, 1);
            }
            Role::Independent => {
                debug!(%key, "computed alongside concurrent run");
                EngineStats::bump(&self.stats.independent_runs, 1);
            }
        }
        outcome
    }

    /// Simulate independent keys in parallel. Results are in request order.
    #[cfg(feature = "parallel")]
    pub fn simulate_batch<S: AsRef<str> + Sync>(&self, requests: &[(S, S)]) -> Vec<Outcome> {
        use rayon::prelude::*;
        requests
            .par_iter()
            .map(|(scenario, region)| self.simulate(scenario.as_ref(), region.as_ref()))
            .collect()
    }

    fn compute(
        &self,
        scenario: &Scenario,
        region: &Region,
        version: &DatasetVersion,
        key: &CacheKey,
    ) -> Outcome {
        let (baseline, version) = self.baseline_graph(region, version)?;
        let terminals = region.policy().select(&baseline.graph)?;
        let modified = contraflow::apply(&baseline.graph, scenario, region)?;
        let mut graph = modified.graph;

        let budget = SolveBudget {
            max_augmentations: self.config.max_augmentations,
            ..SolveBudget::with_timeout(self.config.solve_timeout)
        };
        EngineStats::bump(&self.stats.solves, 1);
        let flow = match MaxFlowSolver::new(budget).solve(&mut graph, &terminals) {
            Ok(flow) => flow,
            Err(SolverError::BudgetExceeded {
                partial_flow,
                augmentations,
            }) => {
                EngineStats::bump(&self.stats.degraded, 1);
                warn!(partial_flow, augmentations, "solve budget exhausted");
                // Another run may have published while this one was solving.
                if let Some(hit) = self.cached(&*self.results, key) {
                    return Ok(hit);
                }
                return Err(SimulationError::Degraded {
                    partial_flow,
                    augmentations,
                });
            }
            Err(err) => return Err(SimulationError::Solver(err)),
        };

        let metrics = derive_metrics(flow.value, region.population, &region.thresholds);
        let result = SimulationResult {
            scenario_id: scenario.id.clone(),
            region: region.name.clone(),
            dataset_version: version.clone(),
            max_throughput_vph: metrics.max_throughput_vph,
            clearance: metrics.clearance,
            gridlock_risk: metrics.gridlock_risk,
            graph_size: GraphSize {
                nodes: flow.node_count,
                edges: flow.edge_count,
            },
            skipped_segments: baseline.report.skip_count(),
            contraflow_edits: modified.edits.len(),
        };

        let key = CacheKey::simulation(&scenario.id, &region.name, version.as_str());
        self.store_cached(&*self.results, key, &result, self.config.result_ttl);

        info!(
            max_throughput_vph = result.max_throughput_vph,
            clearance = %result.clearance,
            gridlock_risk = %result.gridlock_risk,
            augmentations = flow.augmentations,
            "simulation complete"
        );
        Ok(result)
    }

    /// The region's baseline graph for `version`, from cache or freshly
    /// built. Returns the version the graph was actually built from.
    fn baseline_graph(
        &self,
        region: &Region,
        version: &DatasetVersion,
    ) -> Result<(BuildOutcome, DatasetVersion), SimulationError> {
        let key = CacheKey::graph(&region.name, version.as_str());
        if let Some(outcome) = self.cached(&*self.graphs, &key) {
            debug!(%key, "graph cache hit");
            EngineStats::bump(&self.stats.graph_cache_hits, 1);
            return Ok((outcome, version.clone()));
        }

        let filter = RegionFilter::only(region.name.clone());
        let (version, records) = self.store.snapshot(&filter)?;
        let outcome = GraphBuilder::new(filter).build(records)?;
        EngineStats::bump(&self.stats.graph_builds, 1);
        EngineStats::bump(
            &self.stats.segments_skipped,
            outcome.report.skip_count() as u64,
        );

        let key = CacheKey::graph(&region.name, version.as_str());
        self.store_cached(&*self.graphs, key, &outcome, self.config.graph_ttl);
        Ok((outcome, version))
    }

    /// Cache read; faults are logged and treated as a miss.
    fn cached<V>(&self, cache: &dyn CacheGateway<V>, key: &CacheKey) -> Option<V> {
        match cache.get(key) {
            Ok(hit) => hit,
            Err(err) => {
                self.cache_fault(key, &err);
                None
            }
        }
    }

    fn store_cached<V>(&self, cache: &dyn CacheGateway<V>, key: CacheKey, value: &V, ttl: Duration) {
        if let Err(err) = cache.put(key.clone(), value, ttl) {
            self.cache_fault(&key, &err);
        }
    }

    fn cache_fault(&self, key: &CacheKey, err: &CacheError) {
        EngineStats::bump(&self.stats.cache_errors, 1);
        warn!(%key, error = %err, "cache fault, falling through");
    }
}
