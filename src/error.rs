//! Error taxonomy for the optimization pipeline.
//!
//! Only input problems are fatal. Degraded modes (external distance source
//! down, exact solver failing) are recovered in place and surfaced as
//! `tracing` warnings rather than errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizeError {
    /// A task or worker failed construction-time validation.
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    /// Objective weights out of range or not summing to 1.0.
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    /// The same task or worker id appeared more than once.
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// Tasks were supplied but the worker list is empty.
    #[error("no workers available for assignment")]
    NoWorkersAvailable,
}

pub type Result<T> = std::result::Result<T, OptimizeError>;
