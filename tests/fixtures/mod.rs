//! Test fixtures for pickup-planner.
//!
//! Provides realistic test data: real Delhi pickup sites and municipal
//! transfer stations used as worker depots.

pub mod delhi_locations;

pub use delhi_locations::*;
