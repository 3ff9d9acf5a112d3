//! Error types for the stochastic solvers

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Errors raised while integrating a single trajectory.
///
/// These are fatal to the trajectory that raised them, but never to
/// its siblings.
#[derive(Error, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TrajectoryError {
    /// The state norm (or trace) left the accepted band around one
    #[error("state norm {norm} diverged at t = {time}")]
    NumericalInstability { time: f64, norm: f64 },

    /// The implicit step matrix `I - dt A` could not be factorized
    #[error("implicit step matrix is singular at t = {time}")]
    SingularStep { time: f64 },

    /// Stopped because a sibling trajectory aborted the ensemble
    #[error("trajectory cancelled")]
    Cancelled,
}

/// Errors raised by the stochastic solvers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The problem itself is malformed
    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    /// Unknown integrator or incompatible options
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A trajectory diverged and the failure policy surfaced it
    #[error("trajectory {trajectory} (seed {seed}) failed: {source}")]
    NumericalInstability {
        trajectory: usize,
        seed: u64,
        #[source]
        source: TrajectoryError,
    },
}

/// Result type for the stochastic solvers
pub type Result<T> = std::result::Result<T, SolverError>;
