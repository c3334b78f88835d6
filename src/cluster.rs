//! Geographic task grouping.
//!
//! Partitions tasks into one group per worker using k-means over normalized
//! features (coordinates, optionally volume and priority weight), then matches
//! groups to workers by proximity of group centroids to worker bases.

use std::collections::BTreeMap;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::distance::DistanceProvider;
use crate::error::{OptimizeError, Result};
use crate::models::{Priority, Task, Worker};

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Independent clustering attempts; the best silhouette score wins.
    pub attempts: usize,
    /// k-means restarts per attempt.
    pub restarts: usize,
    /// Lloyd iteration cap per restart.
    pub max_iterations: usize,
    /// Base RNG seed; fixed seed makes grouping deterministic.
    pub base_seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            restarts: 10,
            max_iterations: 300,
            base_seed: 0,
        }
    }
}

/// Workload balance statistics across groups.
#[derive(Debug, Clone, Default)]
pub struct ClusterBalance {
    pub total_points: usize,
    pub total_volume: f64,
    pub average_points_per_group: f64,
    pub average_volume_per_group: f64,
    pub points_std_deviation: f64,
    pub volume_std_deviation: f64,
    /// High/medium/low task counts across all groups.
    pub priority_distribution: (usize, usize, usize),
    /// Product of per-metric `max(0, 1 - CV)` factors, in [0, 1].
    pub balance_score: f64,
}

/// Groups tasks geographically and assigns groups to workers.
pub struct TaskClusterer<'a> {
    provider: &'a DistanceProvider,
    config: ClusterConfig,
}

impl<'a> TaskClusterer<'a> {
    pub fn new(provider: &'a DistanceProvider) -> Self {
        Self::with_config(provider, ClusterConfig::default())
    }

    pub fn with_config(provider: &'a DistanceProvider, config: ClusterConfig) -> Self {
        Self { provider, config }
    }

    /// Partition `tasks` into up to `workers.len()` groups and map each group
    /// to a worker index.
    ///
    /// When the group count matches the worker count, groups are reassigned so
    /// each worker gets the group nearest its base; otherwise groups keep
    /// their raw indices.
    pub fn group_tasks(
        &self,
        tasks: &[Task],
        workers: &[Worker],
        balance_workload: bool,
    ) -> Result<BTreeMap<usize, Vec<Task>>> {
        if tasks.is_empty() {
            return Ok(BTreeMap::new());
        }
        if workers.is_empty() {
            return Err(OptimizeError::NoWorkersAvailable);
        }

        let group_count = workers.len().min(tasks.len());
        if group_count == 1 {
            let mut groups = BTreeMap::new();
            groups.insert(0, tasks.to_vec());
            return Ok(groups);
        }

        let features = prepare_features(tasks, balance_workload);
        let labels = self.cluster_labels(&features, group_count);

        let mut grouped: BTreeMap<usize, Vec<Task>> = BTreeMap::new();
        for (task, label) in tasks.iter().zip(&labels) {
            grouped.entry(*label).or_default().push(task.clone());
        }

        Ok(self.assign_to_workers(grouped, workers))
    }

    /// Run seeded clustering attempts and keep the partition with the best
    /// mean silhouette score. Falls back to round-robin labels if every
    /// attempt degenerates.
    fn cluster_labels(&self, features: &[Vec<f64>], k: usize) -> Vec<usize> {
        let n = features.len();
        if k >= n {
            // One point per group.
            return (0..n).collect();
        }

        let mut best: Option<(Vec<usize>, f64)> = None;
        for attempt in 0..self.config.attempts {
            let Some(labels) = self.kmeans(features, k, attempt as u64) else {
                debug!("clustering attempt {attempt} degenerated, skipping");
                continue;
            };
            let score = silhouette_score(features, &labels, k);
            if best.as_ref().is_none_or(|(_, best_score)| score > *best_score) {
                best = Some((labels, score));
            }
        }

        match best {
            Some((labels, score)) => {
                debug!("selected clustering with silhouette score {score:.3}");
                labels
            }
            None => {
                warn!("all clustering attempts failed, falling back to round-robin grouping");
                (0..n).map(|i| i % k).collect()
            }
        }
    }

    /// Lloyd's algorithm with k-means++ seeding, best of `restarts` runs by
    /// inertia. Returns `None` when no restart yields `k` non-empty clusters.
    fn kmeans(&self, features: &[Vec<f64>], k: usize, attempt: u64) -> Option<Vec<usize>> {
        let mut best: Option<(Vec<usize>, f64)> = None;

        for restart in 0..self.config.restarts {
            let seed = self
                .config
                .base_seed
                .wrapping_add(attempt.wrapping_mul(self.config.restarts as u64))
                .wrapping_add(restart as u64);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);

            let mut centroids = seed_centroids(features, k, &mut rng);
            let mut labels = vec![0usize; features.len()];

            for _ in 0..self.config.max_iterations {
                let mut changed = false;
                for (i, point) in features.iter().enumerate() {
                    let nearest = nearest_centroid(point, &centroids);
                    if labels[i] != nearest {
                        labels[i] = nearest;
                        changed = true;
                    }
                }

                recompute_centroids(features, &labels, &mut centroids);
                if !changed {
                    break;
                }
            }

            let mut occupied = vec![false; k];
            for &label in &labels {
                occupied[label] = true;
            }
            if occupied.iter().any(|filled| !filled) {
                continue;
            }

            let inertia: f64 = features
                .iter()
                .zip(&labels)
                .map(|(point, &label)| squared_distance(point, &centroids[label]))
                .sum();
            if best.as_ref().is_none_or(|(_, best_inertia)| inertia < *best_inertia) {
                best = Some((labels, inertia));
            }
        }

        best.map(|(labels, _)| labels)
    }

    /// Match groups to workers by centroid proximity.
    ///
    /// Greedy nearest-pair-first assignment: repeatedly take the globally
    /// smallest remaining (worker, group) distance where both sides are still
    /// free. Not globally optimal, but deterministic and O(n^2 log n).
    fn assign_to_workers(
        &self,
        grouped: BTreeMap<usize, Vec<Task>>,
        workers: &[Worker],
    ) -> BTreeMap<usize, Vec<Task>> {
        if grouped.len() != workers.len() {
            return grouped
                .into_values()
                .enumerate()
                .collect();
        }

        let groups: Vec<Vec<Task>> = grouped.into_values().collect();
        let centroids: Vec<(f64, f64)> = groups.iter().map(|group| centroid(group)).collect();
        let bases: Vec<(f64, f64)> = workers.iter().map(Worker::base_location).collect();
        let matrix = self.provider.batch_distances_km(&bases, &centroids);

        let assignments = greedy_assignment(&matrix);

        let mut result = BTreeMap::new();
        for (worker_idx, group_idx) in assignments.into_iter().enumerate() {
            result.insert(worker_idx, groups[group_idx].clone());
        }
        result
    }

    /// Point-count and volume balance statistics for a grouping.
    pub fn analyze_balance(groups: &BTreeMap<usize, Vec<Task>>) -> ClusterBalance {
        if groups.is_empty() {
            return ClusterBalance::default();
        }

        let points_per_group: Vec<f64> = groups.values().map(|g| g.len() as f64).collect();
        let volume_per_group: Vec<f64> = groups
            .values()
            .map(|g| g.iter().map(|task| task.volume).sum())
            .collect();

        let mut distribution = (0usize, 0usize, 0usize);
        for task in groups.values().flatten() {
            match task.priority {
                Priority::High => distribution.0 += 1,
                Priority::Medium => distribution.1 += 1,
                Priority::Low => distribution.2 += 1,
            }
        }

        let avg_points = mean(&points_per_group);
        let avg_volume = mean(&volume_per_group);
        let points_std = population_stddev(&points_per_group);
        let volume_std = population_stddev(&volume_per_group);

        let mut balance_score = 1.0;
        if avg_points > 0.0 {
            balance_score *= (1.0 - points_std / avg_points).max(0.0);
        }
        if avg_volume > 0.0 {
            balance_score *= (1.0 - volume_std / avg_volume).max(0.0);
        }

        ClusterBalance {
            total_points: points_per_group.iter().sum::<f64>() as usize,
            total_volume: volume_per_group.iter().sum(),
            average_points_per_group: avg_points,
            average_volume_per_group: avg_volume,
            points_std_deviation: points_std,
            volume_std_deviation: volume_std,
            priority_distribution: distribution,
            balance_score,
        }
    }
}

/// Feature matrix: coordinates always, volume and priority weight when
/// balancing workload, z-score normalized per column.
fn prepare_features(tasks: &[Task], balance_workload: bool) -> Vec<Vec<f64>> {
    let mut features: Vec<Vec<f64>> = tasks
        .iter()
        .map(|task| {
            let mut row = vec![task.lat, task.lng];
            if balance_workload {
                row.push(task.volume);
                row.push(f64::from(task.priority.weight()));
            }
            row
        })
        .collect();

    let columns = features[0].len();
    for col in 0..columns {
        let values: Vec<f64> = features.iter().map(|row| row[col]).collect();
        let col_mean = mean(&values);
        let col_std = population_stddev(&values);
        for row in features.iter_mut() {
            // Constant columns carry no information; zero them out.
            row[col] = if col_std > 0.0 {
                (row[col] - col_mean) / col_std
            } else {
                0.0
            };
        }
    }

    features
}

/// k-means++ seeding: later centroids are sampled proportionally to their
/// squared distance from the nearest already-chosen centroid.
fn seed_centroids(features: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(features[rng.gen_range(0..features.len())].clone());

    while centroids.len() < k {
        let weights: Vec<f64> = features
            .iter()
            .map(|point| {
                centroids
                    .iter()
                    .map(|centroid| squared_distance(point, centroid))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();

        let total: f64 = weights.iter().sum();
        let index = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = weights.len() - 1;
            for (i, weight) in weights.iter().enumerate() {
                target -= weight;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..features.len())
        };
        centroids.push(features[index].clone());
    }

    centroids
}

fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut nearest = 0;
    let mut nearest_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < nearest_distance {
            nearest_distance = distance;
            nearest = i;
        }
    }
    nearest
}

fn recompute_centroids(features: &[Vec<f64>], labels: &[usize], centroids: &mut [Vec<f64>]) {
    let columns = features[0].len();
    let mut counts = vec![0usize; centroids.len()];
    let mut sums = vec![vec![0.0; columns]; centroids.len()];

    for (point, &label) in features.iter().zip(labels) {
        counts[label] += 1;
        for (col, value) in point.iter().enumerate() {
            sums[label][col] += value;
        }
    }

    for (i, centroid) in centroids.iter_mut().enumerate() {
        if counts[i] == 0 {
            continue;
        }
        for (col, sum) in sums[i].iter().enumerate() {
            centroid[col] = sum / counts[i] as f64;
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Mean silhouette coefficient over all points; higher means better
/// separated clusters. Singleton-cluster points score 0.
fn silhouette_score(features: &[Vec<f64>], labels: &[usize], k: usize) -> f64 {
    let n = features.len();
    let mut total = 0.0;

    for i in 0..n {
        let own = labels[i];

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for j in 0..n {
            if i == j {
                continue;
            }
            let distance = squared_distance(&features[i], &features[j]).sqrt();
            sums[labels[j]] += distance;
            counts[labels[j]] += 1;
        }

        if counts[own] == 0 {
            continue;
        }

        let a = sums[own] / counts[own] as f64;
        let b = (0..k)
            .filter(|&cluster| cluster != own && counts[cluster] > 0)
            .map(|cluster| sums[cluster] / counts[cluster] as f64)
            .fold(f64::INFINITY, f64::min);

        if b.is_finite() {
            total += (b - a) / a.max(b);
        }
    }

    total / n as f64
}

fn centroid(tasks: &[Task]) -> (f64, f64) {
    let n = tasks.len() as f64;
    let lat = tasks.iter().map(|task| task.lat).sum::<f64>() / n;
    let lng = tasks.iter().map(|task| task.lng).sum::<f64>() / n;
    (lat, lng)
}

/// Greedy assignment over a workers-by-groups distance matrix. Returns the
/// group index chosen for each worker.
fn greedy_assignment(matrix: &[Vec<f64>]) -> Vec<usize> {
    let worker_count = matrix.len();
    let group_count = matrix.first().map_or(0, Vec::len);
    if worker_count == 0 || group_count == 0 {
        return Vec::new();
    }

    let mut pairs: Vec<(f64, usize, usize)> = Vec::with_capacity(worker_count * group_count);
    for (worker_idx, row) in matrix.iter().enumerate() {
        for (group_idx, &distance) in row.iter().enumerate() {
            pairs.push((distance, worker_idx, group_idx));
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut assignments = vec![usize::MAX; worker_count];
    let mut used_groups = vec![false; group_count];
    let mut assigned = 0;

    for (_, worker_idx, group_idx) in pairs {
        if assignments[worker_idx] == usize::MAX && !used_groups[group_idx] {
            assignments[worker_idx] = group_idx;
            used_groups[group_idx] = true;
            assigned += 1;
            if assigned == worker_count {
                break;
            }
        }
    }

    // Leftover workers take the nearest still-unassigned group.
    for worker_idx in 0..worker_count {
        if assignments[worker_idx] != usize::MAX {
            continue;
        }
        let mut best_group = 0;
        let mut best_distance = f64::INFINITY;
        for group_idx in 0..group_count {
            if !used_groups[group_idx] && matrix[worker_idx][group_idx] < best_distance {
                best_distance = matrix[worker_idx][group_idx];
                best_group = group_idx;
            }
        }
        assignments[worker_idx] = best_group;
        used_groups[best_group] = true;
    }

    assignments
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
