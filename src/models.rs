//! Core entity and value types for the pickup routing pipeline.
//!
//! Tasks and workers are validated at construction and immutable afterwards.
//! Stops, routes, and solutions are produced fresh by each optimization run.

use serde::{Deserialize, Serialize};

use crate::error::OptimizeError;

/// Urgency class for a pickup task. Ordering is a hard precedence constraint
/// for sequencing: no Medium stop before all High stops, no Low before all
/// Medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Numeric weight used by coverage scores and skip penalties.
    pub fn weight(self) -> u32 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    /// Visiting order, highest urgency first.
    pub const ORDERED: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];
}

/// A single pickup point to be visited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub priority: Priority,
    /// Workload volume in cubic meters.
    pub volume: f64,
    pub description: Option<String>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        lat: f64,
        lng: f64,
        priority: Priority,
        volume: f64,
    ) -> Result<Self, OptimizeError> {
        let id = id.into();
        validate_coordinate(&id, lat, lng)?;
        if volume < 0.0 || !volume.is_finite() {
            return Err(OptimizeError::InvalidEntity(format!(
                "task {id}: volume cannot be negative: {volume}"
            )));
        }
        Ok(Self {
            id,
            lat,
            lng,
            priority,
            volume,
            description: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn location(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

/// Default worker capacity in cubic meters.
pub const DEFAULT_CAPACITY: f64 = 50.0;

/// A driver/vehicle with a home base and a capacity limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub base_lat: f64,
    pub base_lng: f64,
    pub max_capacity: f64,
    pub name: Option<String>,
}

impl Worker {
    pub fn new(id: impl Into<String>, base_lat: f64, base_lng: f64) -> Result<Self, OptimizeError> {
        Self::with_capacity(id, base_lat, base_lng, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(
        id: impl Into<String>,
        base_lat: f64,
        base_lng: f64,
        max_capacity: f64,
    ) -> Result<Self, OptimizeError> {
        let id = id.into();
        validate_coordinate(&id, base_lat, base_lng)?;
        if max_capacity <= 0.0 || !max_capacity.is_finite() {
            return Err(OptimizeError::InvalidEntity(format!(
                "worker {id}: capacity must be positive: {max_capacity}"
            )));
        }
        Ok(Self {
            id,
            base_lat,
            base_lng,
            max_capacity,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn base_location(&self) -> (f64, f64) {
        (self.base_lat, self.base_lng)
    }
}

fn validate_coordinate(id: &str, lat: f64, lng: f64) -> Result<(), OptimizeError> {
    if !(-90.0..=90.0).contains(&lat) || !lat.is_finite() {
        return Err(OptimizeError::InvalidEntity(format!(
            "{id}: invalid latitude: {lat}"
        )));
    }
    if !(-180.0..=180.0).contains(&lng) || !lng.is_finite() {
        return Err(OptimizeError::InvalidEntity(format!(
            "{id}: invalid longitude: {lng}"
        )));
    }
    Ok(())
}

/// One task placed at a position within a worker's route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub task: Task,
    /// Zero-based position in the route.
    pub order: usize,
    /// Distance from the previous stop (worker base for the first stop), km.
    pub distance_from_previous_km: f64,
    /// Estimated travel time from the previous stop, minutes.
    pub travel_time_min: f64,
}

/// One worker's ordered route plus aggregated metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub worker: Worker,
    pub stops: Vec<Stop>,
    pub total_distance_km: f64,
    pub total_time_min: f64,
    pub total_volume: f64,
    pub high_stops: usize,
    pub medium_stops: usize,
    pub low_stops: usize,
    /// Volume over capacity, capped at 1.0.
    pub workload_score: f64,
    /// Path straightness proxy in [0, 1].
    pub efficiency_score: f64,
    /// Priority coverage in [0, 1].
    pub priority_score: f64,
}

impl Route {
    // Derived, never stored: must stay consistent with the stop list.
    pub fn total_stops(&self) -> usize {
        self.stops.len()
    }

    /// Capacity utilization as a percentage.
    pub fn capacity_utilization(&self) -> f64 {
        (self.total_volume / self.worker.max_capacity) * 100.0
    }
}

/// Complete optimization result across the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub routes: Vec<Route>,
    pub total_distance_km: f64,
    pub total_time_min: f64,
    pub total_tasks_covered: usize,
    pub average_workload: f64,
    pub workload_std_deviation: f64,
    pub total_high_covered: usize,
    pub total_medium_covered: usize,
    pub total_low_covered: usize,
    pub priority_weight: f64,
    pub distance_weight: f64,
    pub balance_weight: f64,
}

impl Solution {
    /// Workload balance in [0, 1]; lower volume spread scores higher.
    /// Defined as 0 when the mean workload is 0.
    pub fn workload_balance_score(&self) -> f64 {
        if self.average_workload == 0.0 {
            return 0.0;
        }
        (1.0 - self.workload_std_deviation / self.average_workload).max(0.0)
    }

    pub fn route_for(&self, worker_id: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.worker.id == worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_latitude() {
        assert!(Task::new("t1", 91.0, 77.0, Priority::High, 1.0).is_err());
        assert!(Task::new("t1", -91.0, 77.0, Priority::High, 1.0).is_err());
    }

    #[test]
    fn rejects_out_of_range_longitude() {
        assert!(Task::new("t1", 28.0, 181.0, Priority::High, 1.0).is_err());
        assert!(Worker::new("w1", 28.0, -181.0).is_err());
    }

    #[test]
    fn rejects_negative_volume() {
        assert!(Task::new("t1", 28.0, 77.0, Priority::Low, -0.5).is_err());
    }

    #[test]
    fn rejects_non_positive_capacity() {
        assert!(Worker::with_capacity("w1", 28.0, 77.0, 0.0).is_err());
        assert!(Worker::with_capacity("w1", 28.0, 77.0, -3.0).is_err());
    }

    #[test]
    fn default_capacity_applies() {
        let worker = Worker::new("w1", 28.0, 77.0).unwrap();
        assert_eq!(worker.max_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn priority_weights_are_ordered() {
        assert!(Priority::High.weight() > Priority::Medium.weight());
        assert!(Priority::Medium.weight() > Priority::Low.weight());
    }

    #[test]
    fn balance_score_zero_when_no_workload() {
        let solution = Solution {
            routes: Vec::new(),
            total_distance_km: 0.0,
            total_time_min: 0.0,
            total_tasks_covered: 0,
            average_workload: 0.0,
            workload_std_deviation: 0.0,
            total_high_covered: 0,
            total_medium_covered: 0,
            total_low_covered: 0,
            priority_weight: 0.4,
            distance_weight: 0.4,
            balance_weight: 0.2,
        };
        assert_eq!(solution.workload_balance_score(), 0.0);
    }
}
