//! pickup-planner core
//!
//! Assigns prioritized pickup tasks to a fleet of capacity-limited workers
//! and orders each worker's tasks into an annotated route.

pub mod cluster;
pub mod distance;
pub mod error;
pub mod models;
pub mod optimizer;
pub mod sequencer;
