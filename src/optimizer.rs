//! Optimization orchestrator.
//!
//! Validates inputs, groups tasks across the fleet, sequences each group into
//! a route, and aggregates the routes into a scored solution. Per-group
//! sequencing is data-parallel; the only shared state is the read-only inputs
//! and the distance cache.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use tracing::info;

use crate::cluster::{ClusterConfig, TaskClusterer};
use crate::distance::DistanceProvider;
use crate::error::{OptimizeError, Result};
use crate::models::{Route, Solution, Task, Worker};
use crate::sequencer::{RouteSequencer, SequencerConfig};

/// Tolerance for the weight-sum check.
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Weight for priority coverage in the overall score.
    pub priority_weight: f64,
    /// Weight for path efficiency.
    pub distance_weight: f64,
    /// Weight for workload balance.
    pub balance_weight: f64,
    /// Include volume and priority in the grouping features.
    pub balance_workload: bool,
    pub cluster: ClusterConfig,
    pub sequencer: SequencerConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            priority_weight: 0.4,
            distance_weight: 0.4,
            balance_weight: 0.2,
            balance_workload: true,
            cluster: ClusterConfig::default(),
            sequencer: SequencerConfig::default(),
        }
    }
}

/// Solution quality breakdown, each score in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct QualityReport {
    pub overall_score: f64,
    pub priority_coverage_score: f64,
    pub distance_efficiency_score: f64,
    pub workload_balance_score: f64,
    pub capacity_utilization_score: f64,
}

/// Main optimization engine tying the pipeline together.
pub struct RouteOptimizer {
    provider: DistanceProvider,
    config: OptimizerConfig,
    sequencer: RouteSequencer,
}

impl RouteOptimizer {
    pub fn new(provider: DistanceProvider) -> Self {
        Self::with_config(provider, OptimizerConfig::default())
    }

    pub fn with_config(provider: DistanceProvider, config: OptimizerConfig) -> Self {
        let sequencer = RouteSequencer::new(config.sequencer.clone());
        Self {
            provider,
            config,
            sequencer,
        }
    }

    /// Optimize routes for the whole fleet.
    ///
    /// Fails fast on invalid weights or duplicate identifiers, before any
    /// clustering or sequencing. Empty task input yields an empty solution;
    /// tasks without workers is an error.
    pub fn optimize(&self, tasks: &[Task], workers: &[Worker]) -> Result<Solution> {
        self.validate(tasks, workers)?;

        if tasks.is_empty() {
            return Ok(self.empty_solution());
        }
        if workers.is_empty() {
            return Err(OptimizeError::NoWorkersAvailable);
        }

        info!(
            "optimizing routes for {} workers and {} tasks",
            workers.len(),
            tasks.len()
        );

        let clusterer = TaskClusterer::with_config(&self.provider, self.config.cluster.clone());
        let groups = clusterer.group_tasks(tasks, workers, self.config.balance_workload)?;

        let balance = TaskClusterer::analyze_balance(&groups);
        info!(
            "created {} groups with balance score {:.3}",
            groups.len(),
            balance.balance_score
        );

        let assignments: Vec<(&Worker, Vec<Task>)> = groups
            .into_iter()
            .filter_map(|(worker_idx, group)| workers.get(worker_idx).map(|w| (w, group)))
            .collect();

        // One worker's route never depends on another's; sequence in parallel.
        let routes: Vec<Route> = assignments
            .into_par_iter()
            .map(|(worker, group)| self.build_route(worker, &group))
            .collect();

        let solution = self.aggregate(routes);
        info!(
            "optimization complete: {:.1} km, {:.0} min, {} tasks covered",
            solution.total_distance_km, solution.total_time_min, solution.total_tasks_covered
        );
        Ok(solution)
    }

    /// Score an existing solution against the weights it was produced with.
    pub fn analyze_quality(&self, solution: &Solution) -> QualityReport {
        if solution.routes.is_empty() {
            return QualityReport::default();
        }

        let total_priority_value: usize = solution
            .routes
            .iter()
            .map(|route| route.high_stops * 3 + route.medium_stops * 2 + route.low_stops)
            .sum();
        let max_priority_value = solution.total_tasks_covered * 3;
        let priority_coverage_score =
            total_priority_value as f64 / (max_priority_value.max(1)) as f64;

        let route_count = solution.routes.len() as f64;
        let distance_efficiency_score = solution
            .routes
            .iter()
            .map(|route| route.efficiency_score)
            .sum::<f64>()
            / route_count;

        let workload_balance_score = solution.workload_balance_score();

        let capacity_utilization_score = solution
            .routes
            .iter()
            .map(Route::capacity_utilization)
            .sum::<f64>()
            / route_count
            / 100.0;

        let overall_score = priority_coverage_score * solution.priority_weight
            + distance_efficiency_score * solution.distance_weight
            + workload_balance_score * solution.balance_weight;

        QualityReport {
            overall_score,
            priority_coverage_score,
            distance_efficiency_score,
            workload_balance_score,
            capacity_utilization_score,
        }
    }

    /// Preview worker assignments without sequencing routes.
    pub fn suggest_assignments(
        &self,
        tasks: &[Task],
        workers: &[Worker],
    ) -> Result<BTreeMap<String, Vec<String>>> {
        if tasks.is_empty() || workers.is_empty() {
            return Ok(BTreeMap::new());
        }

        let clusterer = TaskClusterer::with_config(&self.provider, self.config.cluster.clone());
        let groups = clusterer.group_tasks(tasks, workers, self.config.balance_workload)?;

        Ok(groups
            .into_iter()
            .filter_map(|(worker_idx, group)| {
                workers.get(worker_idx).map(|worker| {
                    let task_ids = group.into_iter().map(|task| task.id).collect();
                    (worker.id.clone(), task_ids)
                })
            })
            .collect())
    }

    fn validate(&self, tasks: &[Task], workers: &[Worker]) -> Result<()> {
        let weights = [
            self.config.priority_weight,
            self.config.distance_weight,
            self.config.balance_weight,
        ];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(OptimizeError::InvalidWeights(format!(
                "all weights must be in [0, 1], got {weights:?}"
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(OptimizeError::InvalidWeights(format!(
                "weights must sum to 1.0, got {sum}"
            )));
        }

        let mut task_ids = HashSet::new();
        for task in tasks {
            if !task_ids.insert(task.id.as_str()) {
                return Err(OptimizeError::DuplicateIdentifier(format!(
                    "task id {}",
                    task.id
                )));
            }
        }
        let mut worker_ids = HashSet::new();
        for worker in workers {
            if !worker_ids.insert(worker.id.as_str()) {
                return Err(OptimizeError::DuplicateIdentifier(format!(
                    "worker id {}",
                    worker.id
                )));
            }
        }
        Ok(())
    }

    fn build_route(&self, worker: &Worker, group: &[Task]) -> Route {
        let sequenced = self.sequencer.solve_route(&self.provider, group, worker);
        let metrics = sequenced.metrics;

        let total_stops = sequenced.stops.len();
        let workload_score = (metrics.total_volume / worker.max_capacity).min(1.0);
        let priority_score = if total_stops > 0 {
            (metrics.high_stops * 3 + metrics.medium_stops * 2 + metrics.low_stops) as f64
                / (total_stops * 3) as f64
        } else {
            0.0
        };

        Route {
            worker: worker.clone(),
            stops: sequenced.stops,
            total_distance_km: metrics.total_distance_km,
            total_time_min: metrics.total_time_min,
            total_volume: metrics.total_volume,
            high_stops: metrics.high_stops,
            medium_stops: metrics.medium_stops,
            low_stops: metrics.low_stops,
            workload_score,
            efficiency_score: metrics.efficiency_score,
            priority_score,
        }
    }

    fn aggregate(&self, routes: Vec<Route>) -> Solution {
        if routes.is_empty() {
            return self.empty_solution();
        }

        let workloads: Vec<f64> = routes.iter().map(|route| route.total_volume).collect();
        let average_workload = workloads.iter().sum::<f64>() / workloads.len() as f64;
        let workload_std_deviation = sample_stddev(&workloads);

        Solution {
            total_distance_km: routes.iter().map(|r| r.total_distance_km).sum(),
            total_time_min: routes.iter().map(|r| r.total_time_min).sum(),
            total_tasks_covered: routes.iter().map(Route::total_stops).sum(),
            total_high_covered: routes.iter().map(|r| r.high_stops).sum(),
            total_medium_covered: routes.iter().map(|r| r.medium_stops).sum(),
            total_low_covered: routes.iter().map(|r| r.low_stops).sum(),
            average_workload,
            workload_std_deviation,
            priority_weight: self.config.priority_weight,
            distance_weight: self.config.distance_weight,
            balance_weight: self.config.balance_weight,
            routes,
        }
    }

    fn empty_solution(&self) -> Solution {
        Solution {
            routes: Vec::new(),
            total_distance_km: 0.0,
            total_time_min: 0.0,
            total_tasks_covered: 0,
            average_workload: 0.0,
            workload_std_deviation: 0.0,
            total_high_covered: 0,
            total_medium_covered: 0,
            total_low_covered: 0,
            priority_weight: self.config.priority_weight,
            distance_weight: self.config.distance_weight,
            balance_weight: self.config.balance_weight,
        }
    }
}

/// Sample standard deviation; 0 for fewer than two values.
fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
