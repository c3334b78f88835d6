//! Route sequencing for a single worker's task group.
//!
//! Two interchangeable strategies order the stops: a nearest-neighbor
//! heuristic that strictly honors priority precedence, and an exact-style
//! constrained solver with capacity limits and per-task skip penalties. The
//! sequencer always keeps the heuristic as a guaranteed fallback and
//! substitutes it on any strategy failure, so callers never see the
//! distinction.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::distance::{DistanceProvider, haversine_km};
use crate::models::{Priority, Stop, Task, Worker};

/// Base cost charged by the exact solver for omitting a task.
const SKIP_PENALTY_BASE: i64 = 1_000_000;

/// Demand and capacity are scaled to integers for the constrained solver.
const VOLUME_SCALE: f64 = 100.0;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("solver unavailable: {0}")]
    Unavailable(String),
    #[error("solver failed: {0}")]
    Failed(String),
}

/// Aggregated metrics for a sequenced route.
///
/// `efficiency_score` is a path-straightness proxy in [0, 1]. The heuristic
/// strategy scores shortest over longest leg; the exact strategy scores
/// straight-line endpoint distance over total route distance. The two are not
/// numerically comparable across strategies.
#[derive(Debug, Clone, Default)]
pub struct RouteMetrics {
    pub total_distance_km: f64,
    pub total_time_min: f64,
    pub total_volume: f64,
    pub high_stops: usize,
    pub medium_stops: usize,
    pub low_stops: usize,
    pub efficiency_score: f64,
}

/// Orders a task group into a visiting sequence for one worker.
pub trait RouteStrategy: Send + Sync {
    fn solve(
        &self,
        provider: &DistanceProvider,
        tasks: &[Task],
        worker: &Worker,
    ) -> Result<Vec<Stop>, StrategyError>;

    fn metrics(&self, stops: &[Stop]) -> RouteMetrics;
}

/// Nearest-neighbor sequencing within strict priority buckets.
///
/// Always available. High tasks are all visited before any Medium task, and
/// Medium before Low, regardless of distance.
#[derive(Debug, Clone, Default)]
pub struct HeuristicStrategy;

impl RouteStrategy for HeuristicStrategy {
    fn solve(
        &self,
        provider: &DistanceProvider,
        tasks: &[Task],
        worker: &Worker,
    ) -> Result<Vec<Stop>, StrategyError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let mut ordered = Vec::with_capacity(tasks.len());
        let mut position = worker.base_location();

        for priority in Priority::ORDERED {
            let mut bucket: Vec<&Task> =
                tasks.iter().filter(|task| task.priority == priority).collect();
            // Larger loads first as the tie-break when distances are equal.
            bucket.sort_by(|a, b| b.volume.total_cmp(&a.volume));

            while !bucket.is_empty() {
                let mut nearest = 0;
                let mut nearest_km = f64::INFINITY;
                for (i, task) in bucket.iter().enumerate() {
                    let km = haversine_km(position, task.location());
                    if km < nearest_km {
                        nearest_km = km;
                        nearest = i;
                    }
                }
                let task = bucket.remove(nearest);
                position = task.location();
                ordered.push(task.clone());
            }
        }

        Ok(annotate_stops(provider, ordered, worker))
    }

    fn metrics(&self, stops: &[Stop]) -> RouteMetrics {
        let mut metrics = base_metrics(stops);
        metrics.efficiency_score = if stops.len() > 1 {
            let legs: Vec<f64> = stops.iter().map(|s| s.distance_from_previous_km).collect();
            let shortest = legs.iter().copied().fold(f64::INFINITY, f64::min);
            let longest = legs.iter().copied().fold(0.0, f64::max);
            (shortest / longest.max(0.1)).min(1.0)
        } else if stops.len() == 1 {
            1.0
        } else {
            0.0
        };
        metrics
    }
}

/// Constrained single-vehicle routing solver contract.
///
/// `matrix` is depot-rooted (depot at index 0, task `i` at node `i + 1`).
/// Returns visited task indices in order; tasks may be dropped, each drop
/// costing its penalty. Must terminate within `time_limit`.
pub trait ConstrainedSolver: Send + Sync {
    fn solve(
        &self,
        matrix: &[Vec<f64>],
        capacity: i64,
        demands: &[i64],
        penalties: &[i64],
        time_limit: Duration,
    ) -> Result<Vec<usize>, StrategyError>;
}

/// Built-in time-bounded solver: cheapest-arc construction followed by 2-opt
/// improvement, honoring capacity by dropping the cheapest-penalty tasks.
#[derive(Debug, Clone, Default)]
pub struct LocalSearchSolver;

impl ConstrainedSolver for LocalSearchSolver {
    fn solve(
        &self,
        matrix: &[Vec<f64>],
        capacity: i64,
        demands: &[i64],
        penalties: &[i64],
        time_limit: Duration,
    ) -> Result<Vec<usize>, StrategyError> {
        let n = demands.len();
        if matrix.len() != n + 1 || matrix.iter().any(|row| row.len() != n + 1) {
            return Err(StrategyError::Failed(format!(
                "distance matrix must be {}x{}",
                n + 1,
                n + 1
            )));
        }
        let deadline = Instant::now() + time_limit;

        // Select the task set first: keep the highest penalties when capacity
        // cannot cover everything.
        let mut by_penalty: Vec<usize> = (0..n).collect();
        by_penalty.sort_by(|&a, &b| penalties[b].cmp(&penalties[a]).then(a.cmp(&b)));

        let mut selected = Vec::with_capacity(n);
        let mut load = 0i64;
        for index in by_penalty {
            if load + demands[index] <= capacity {
                load += demands[index];
                selected.push(index);
            }
        }

        // Cheapest-arc construction from the depot.
        let mut route = Vec::with_capacity(selected.len());
        let mut remaining = selected;
        let mut current = 0usize; // depot node
        while !remaining.is_empty() {
            let mut best = 0;
            let mut best_km = f64::INFINITY;
            for (i, &task_index) in remaining.iter().enumerate() {
                let km = matrix[current][task_index + 1];
                if km < best_km {
                    best_km = km;
                    best = i;
                }
            }
            let task_index = remaining.swap_remove(best);
            current = task_index + 1;
            route.push(task_index);
        }

        two_opt(&mut route, matrix, deadline);
        Ok(route)
    }
}

/// 2-opt segment reversal until no improvement or the deadline passes.
/// The delta only considers boundary edges, which assumes a symmetric matrix.
fn two_opt(route: &mut Vec<usize>, matrix: &[Vec<f64>], deadline: Instant) {
    let node = |route: &[usize], i: isize| -> usize {
        if i < 0 { 0 } else { route[i as usize] + 1 }
    };

    let n = route.len();
    if n < 3 {
        return;
    }

    let mut improved = true;
    while improved {
        improved = false;
        for i in 0..n - 1 {
            for j in i + 1..n {
                if Instant::now() >= deadline {
                    return;
                }
                let before = node(route, i as isize - 1);
                let seg_start = route[i] + 1;
                let seg_end = route[j] + 1;
                let after = if j + 1 < n { route[j + 1] + 1 } else { 0 };

                let current = matrix[before][seg_start]
                    + if j + 1 < n { matrix[seg_end][after] } else { 0.0 };
                let reversed = matrix[before][seg_end]
                    + if j + 1 < n { matrix[seg_start][after] } else { 0.0 };

                if reversed + 1e-9 < current {
                    route[i..=j].reverse();
                    improved = true;
                }
            }
        }
    }
}

/// Capacity- and penalty-aware sequencing through a [`ConstrainedSolver`].
pub struct ExactStrategy {
    solver: Box<dyn ConstrainedSolver>,
    time_limit: Duration,
}

impl ExactStrategy {
    pub fn new(solver: Box<dyn ConstrainedSolver>, time_limit: Duration) -> Self {
        Self { solver, time_limit }
    }

    fn skip_penalty(task: &Task) -> i64 {
        let multiplier = match task.priority {
            Priority::High => 10,
            Priority::Medium => 5,
            Priority::Low => 1,
        };
        SKIP_PENALTY_BASE * multiplier
    }
}

impl RouteStrategy for ExactStrategy {
    fn solve(
        &self,
        provider: &DistanceProvider,
        tasks: &[Task],
        worker: &Worker,
    ) -> Result<Vec<Stop>, StrategyError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let mut locations = Vec::with_capacity(tasks.len() + 1);
        locations.push(worker.base_location());
        locations.extend(tasks.iter().map(Task::location));
        let matrix = provider.batch_distances_km(&locations, &locations);

        let demands: Vec<i64> = tasks
            .iter()
            .map(|task| (task.volume * VOLUME_SCALE).round() as i64)
            .collect();
        let penalties: Vec<i64> = tasks.iter().map(Self::skip_penalty).collect();
        let capacity = (worker.max_capacity * VOLUME_SCALE).round() as i64;

        let order = self
            .solver
            .solve(&matrix, capacity, &demands, &penalties, self.time_limit)?;

        let ordered: Vec<Task> = order
            .into_iter()
            .filter_map(|index| tasks.get(index).cloned())
            .collect();
        Ok(annotate_stops(provider, ordered, worker))
    }

    fn metrics(&self, stops: &[Stop]) -> RouteMetrics {
        let mut metrics = base_metrics(stops);
        metrics.efficiency_score = if stops.len() > 1 {
            let first = stops[0].task.location();
            let last = stops[stops.len() - 1].task.location();
            let straight = haversine_km(first, last);
            (straight / metrics.total_distance_km.max(0.1)).min(1.0)
        } else if stops.len() == 1 {
            1.0
        } else {
            0.0
        };
        metrics
    }
}

/// Annotate an ordered task list with per-leg distance and travel time.
fn annotate_stops(provider: &DistanceProvider, ordered: Vec<Task>, worker: &Worker) -> Vec<Stop> {
    let mut stops = Vec::with_capacity(ordered.len());
    let mut previous = worker.base_location();

    for (order, task) in ordered.into_iter().enumerate() {
        let distance_km = provider.road_distance_km(previous, task.location());
        let travel_time_min = provider.estimate_travel_time_min(distance_km);
        previous = task.location();
        stops.push(Stop {
            task,
            order,
            distance_from_previous_km: distance_km,
            travel_time_min,
        });
    }

    stops
}

fn base_metrics(stops: &[Stop]) -> RouteMetrics {
    let mut metrics = RouteMetrics {
        total_distance_km: stops.iter().map(|s| s.distance_from_previous_km).sum(),
        total_time_min: stops.iter().map(|s| s.travel_time_min).sum(),
        total_volume: stops.iter().map(|s| s.task.volume).sum(),
        ..RouteMetrics::default()
    };
    for stop in stops {
        match stop.task.priority {
            Priority::High => metrics.high_stops += 1,
            Priority::Medium => metrics.medium_stops += 1,
            Priority::Low => metrics.low_stops += 1,
        }
    }
    metrics
}

#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Route through the exact constrained solver when true; the heuristic
    /// remains the fallback either way.
    pub use_exact_solver: bool,
    /// Wall-clock budget for the exact solver.
    pub exact_time_limit: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            use_exact_solver: false,
            exact_time_limit: Duration::from_secs(30),
        }
    }
}

/// A sequenced route: ordered stops plus the metrics of the strategy that
/// produced them.
#[derive(Debug, Clone)]
pub struct SequencedRoute {
    pub stops: Vec<Stop>,
    pub metrics: RouteMetrics,
}

/// Holds the active strategy and a guaranteed-available heuristic fallback.
pub struct RouteSequencer {
    active: Box<dyn RouteStrategy>,
    fallback: HeuristicStrategy,
}

impl RouteSequencer {
    /// Resolve the strategy once from configuration. Availability is decided
    /// here, not re-probed per call.
    pub fn new(config: SequencerConfig) -> Self {
        let active: Box<dyn RouteStrategy> = if config.use_exact_solver {
            Box::new(ExactStrategy::new(
                Box::new(LocalSearchSolver),
                config.exact_time_limit,
            ))
        } else {
            Box::new(HeuristicStrategy)
        };
        Self::with_strategy(active)
    }

    /// Use a caller-supplied strategy (e.g. an external solver adapter).
    pub fn with_strategy(active: Box<dyn RouteStrategy>) -> Self {
        Self {
            active,
            fallback: HeuristicStrategy,
        }
    }

    /// Sequence one worker's task group.
    ///
    /// Any failure of the active strategy substitutes the heuristic; this
    /// never fails.
    pub fn solve_route(
        &self,
        provider: &DistanceProvider,
        tasks: &[Task],
        worker: &Worker,
    ) -> SequencedRoute {
        match self.active.solve(provider, tasks, worker) {
            Ok(stops) => {
                let metrics = self.active.metrics(&stops);
                SequencedRoute { stops, metrics }
            }
            Err(err) => {
                warn!(
                    "route strategy failed for worker {}, substituting heuristic: {err}",
                    worker.id
                );
                let stops = self
                    .fallback
                    .solve(provider, tasks, worker)
                    .unwrap_or_default();
                let metrics = self.fallback.metrics(&stops);
                SequencedRoute { stops, metrics }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceProvider;
    use crate::error::OptimizeError;

    fn task(id: &str, lat: f64, lng: f64, priority: Priority, volume: f64) -> Task {
        Task::new(id, lat, lng, priority, volume).unwrap()
    }

    fn worker() -> Worker {
        Worker::new("w1", 28.6130, 77.2080).unwrap()
    }

    #[test]
    fn heuristic_keeps_priority_precedence() {
        let provider = DistanceProvider::analytic();
        // The Low task is nearest the base; it must still come last.
        let tasks = vec![
            task("low", 28.6131, 77.2081, Priority::Low, 1.0),
            task("high", 28.7000, 77.3000, Priority::High, 1.0),
            task("medium", 28.6500, 77.2500, Priority::Medium, 1.0),
        ];

        let stops = HeuristicStrategy
            .solve(&provider, &tasks, &worker())
            .unwrap();
        let order: Vec<&str> = stops.iter().map(|s| s.task.id.as_str()).collect();
        assert_eq!(order, vec!["high", "medium", "low"]);
    }

    #[test]
    fn heuristic_never_drops_tasks() {
        let provider = DistanceProvider::analytic();
        let tasks: Vec<Task> = (0..10)
            .map(|i| {
                task(
                    &format!("t{i}"),
                    28.6 + i as f64 * 0.01,
                    77.2,
                    Priority::Medium,
                    100.0, // far above worker capacity
                )
            })
            .collect();

        let stops = HeuristicStrategy
            .solve(&provider, &tasks, &worker())
            .unwrap();
        assert_eq!(stops.len(), tasks.len());
    }

    #[test]
    fn heuristic_orders_stops_sequentially() {
        let provider = DistanceProvider::analytic();
        let tasks = vec![
            task("a", 28.62, 77.21, Priority::High, 1.0),
            task("b", 28.63, 77.22, Priority::High, 1.0),
            task("c", 28.64, 77.23, Priority::Low, 1.0),
        ];
        let stops = HeuristicStrategy
            .solve(&provider, &tasks, &worker())
            .unwrap();
        for (expected, stop) in stops.iter().enumerate() {
            assert_eq!(stop.order, expected);
        }
    }

    #[test]
    fn single_stop_efficiency_is_one() {
        let provider = DistanceProvider::analytic();
        let tasks = vec![task("only", 28.62, 77.21, Priority::Medium, 2.0)];
        let stops = HeuristicStrategy
            .solve(&provider, &tasks, &worker())
            .unwrap();
        let metrics = HeuristicStrategy.metrics(&stops);
        assert_eq!(metrics.efficiency_score, 1.0);
    }

    #[test]
    fn exact_strategy_drops_overflow_by_lowest_penalty() {
        let provider = DistanceProvider::analytic();
        let strategy = ExactStrategy::new(Box::new(LocalSearchSolver), Duration::from_secs(5));
        let tight_worker = Worker::with_capacity("w1", 28.6130, 77.2080, 3.0).unwrap();
        let tasks = vec![
            task("high", 28.62, 77.21, Priority::High, 2.0),
            task("low", 28.63, 77.22, Priority::Low, 2.0),
        ];

        let stops = strategy.solve(&provider, &tasks, &tight_worker).unwrap();
        let ids: Vec<&str> = stops.iter().map(|s| s.task.id.as_str()).collect();
        assert_eq!(ids, vec!["high"]);
    }

    #[test]
    fn exact_strategy_covers_all_when_capacity_allows() {
        let provider = DistanceProvider::analytic();
        let strategy = ExactStrategy::new(Box::new(LocalSearchSolver), Duration::from_secs(5));
        let tasks = vec![
            task("a", 28.62, 77.21, Priority::High, 2.0),
            task("b", 28.63, 77.22, Priority::Low, 2.0),
            task("c", 28.64, 77.20, Priority::Medium, 2.0),
        ];

        let stops = strategy.solve(&provider, &tasks, &worker()).unwrap();
        assert_eq!(stops.len(), 3);
    }

    struct AlwaysFails;

    impl RouteStrategy for AlwaysFails {
        fn solve(
            &self,
            _: &DistanceProvider,
            _: &[Task],
            _: &Worker,
        ) -> Result<Vec<Stop>, StrategyError> {
            Err(StrategyError::Unavailable("not installed".to_string()))
        }

        fn metrics(&self, _: &[Stop]) -> RouteMetrics {
            RouteMetrics::default()
        }
    }

    #[test]
    fn sequencer_substitutes_heuristic_on_failure() {
        let provider = DistanceProvider::analytic();
        let sequencer = RouteSequencer::with_strategy(Box::new(AlwaysFails));
        let tasks = vec![
            task("a", 28.62, 77.21, Priority::High, 1.0),
            task("b", 28.63, 77.22, Priority::Low, 1.0),
        ];

        let route = sequencer.solve_route(&provider, &tasks, &worker());
        assert_eq!(route.stops.len(), 2);
        assert_eq!(route.stops[0].task.id, "a");
    }

    #[test]
    fn invalid_task_is_rejected_not_clamped() {
        let err = Task::new("bad", 95.0, 77.0, Priority::High, 1.0).unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidEntity(_)));
    }
}
