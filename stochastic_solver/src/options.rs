#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SolverError},
    solvers::Method,
};

/// How trajectories are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum MapKind {
    #[default]
    Serial,
    Parallel,
}

/// What happens to the ensemble when a trajectory fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum FailurePolicy {
    /// Cancel the remaining trajectories and return the first failure
    #[default]
    Abort,
    /// Record the failure and average over the remaining trajectories
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct Options {
    pub method: Method,
    /// The largest internal step, each requested interval is split into equal steps no larger than this
    pub dt: f64,
    pub map: MapKind,
    /// Size of the thread pool used by the parallel map, or rayon's global pool if None
    pub num_threads: Option<usize>,
    /// Store the measurement record, wiener process and increments of each trajectory
    pub store_measurement: bool,
    pub store_final_state: bool,
    pub store_states: bool,
    pub keep_runs_results: bool,
    /// Normalize states before computing expectations and storing them
    pub normalize_output: bool,
    pub failure_policy: FailurePolicy,
    /// The largest accepted deviation of the norm (or trace) from one
    pub norm_tolerance: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            method: Method::default(),
            dt: 0.001,
            map: MapKind::default(),
            num_threads: None,
            store_measurement: false,
            store_final_state: false,
            store_states: false,
            keep_runs_results: false,
            normalize_output: true,
            failure_policy: FailurePolicy::default(),
            norm_tolerance: 0.25,
        }
    }
}

impl Options {
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    #[must_use]
    pub fn with_map(mut self, map: MapKind) -> Self {
        self.map = map;
        self
    }

    #[must_use]
    pub fn with_num_threads(mut self, num_threads: Option<usize>) -> Self {
        self.num_threads = num_threads;
        self
    }

    #[must_use]
    pub fn with_store_measurement(mut self, store_measurement: bool) -> Self {
        self.store_measurement = store_measurement;
        self
    }

    #[must_use]
    pub fn with_store_final_state(mut self, store_final_state: bool) -> Self {
        self.store_final_state = store_final_state;
        self
    }

    #[must_use]
    pub fn with_store_states(mut self, store_states: bool) -> Self {
        self.store_states = store_states;
        self
    }

    #[must_use]
    pub fn with_keep_runs_results(mut self, keep_runs_results: bool) -> Self {
        self.keep_runs_results = keep_runs_results;
        self
    }

    #[must_use]
    pub fn with_normalize_output(mut self, normalize_output: bool) -> Self {
        self.normalize_output = normalize_output;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    #[must_use]
    pub fn with_norm_tolerance(mut self, norm_tolerance: f64) -> Self {
        self.norm_tolerance = norm_tolerance;
        self
    }

    /// # Errors
    ///
    /// Returns `Configuration` if the step or tolerance is not positive,
    /// or if a thread pool of zero threads is requested
    pub fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(SolverError::Configuration(format!(
                "dt must be positive, got {}",
                self.dt
            )));
        }
        if !(self.norm_tolerance > 0.0) {
            return Err(SolverError::Configuration(format!(
                "norm_tolerance must be positive, got {}",
                self.norm_tolerance
            )));
        }
        if self.num_threads == Some(0) {
            return Err(SolverError::Configuration(
                "num_threads must be at least one".to_owned(),
            ));
        }
        Ok(())
    }
}
