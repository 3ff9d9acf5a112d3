//! Seeding and dispatch of an ensemble of trajectories

use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use ndarray::Array1;
use num_complex::Complex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SolverError, TrajectoryError},
    options::{FailurePolicy, MapKind, Options},
    problem::Problem,
    result::{ResultBuilder, StochasticResult},
    system::SDESystem,
    trajectory::run_trajectory,
};

/// The seeds used for each trajectory of an ensemble
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Seeds {
    /// Derive the seeds from a root seed drawn from the OS
    #[default]
    Entropy,
    /// Derive the seeds from a root seed
    Single(u64),
    /// Use these seeds, one per trajectory
    List(Vec<u64>),
}

impl From<u64> for Seeds {
    fn from(value: u64) -> Self {
        Seeds::Single(value)
    }
}

impl From<Vec<u64>> for Seeds {
    fn from(value: Vec<u64>) -> Self {
        Seeds::List(value)
    }
}

/// Reuse the seeds of a previous run, reproducing its trajectories exactly
impl From<&StochasticResult> for Seeds {
    fn from(value: &StochasticResult) -> Self {
        Seeds::List(value.seeds.clone())
    }
}

/// `ntraj` distinct seeds drawn from a generator seeded with `root`
fn derive_seeds(root: u64, ntraj: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(root);
    let mut seen = HashSet::with_capacity(ntraj);
    let mut out = Vec::with_capacity(ntraj);
    while out.len() < ntraj {
        let seed = rng.gen::<u64>();
        if seen.insert(seed) {
            out.push(seed);
        }
    }
    out
}

impl Seeds {
    /// The seed of each of `ntraj` trajectories.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a list has fewer than `ntraj` seeds
    pub fn resolve(&self, ntraj: usize) -> Result<Vec<u64>> {
        match self {
            Seeds::Entropy => {
                let root = StdRng::from_entropy().gen::<u64>();
                debug!(root, "drew root seed from entropy");
                Ok(derive_seeds(root, ntraj))
            }
            Seeds::Single(root) => Ok(derive_seeds(*root, ntraj)),
            Seeds::List(seeds) => {
                if seeds.len() < ntraj {
                    return Err(SolverError::Configuration(format!(
                        "{} seeds given for {ntraj} trajectories",
                        seeds.len()
                    )));
                }
                Ok(seeds[..ntraj].to_vec())
            }
        }
    }
}

/// A strategy for running each trajectory of an ensemble
pub trait TrajectoryMap {
    /// Call `f` for each index in `0..n`, returning the outputs in index order
    fn map<O, F>(&self, n: usize, f: F) -> Vec<O>
    where
        O: Send,
        F: Fn(usize) -> O + Send + Sync;
}

/// Runs every trajectory on the calling thread
pub struct SerialMap;

impl TrajectoryMap for SerialMap {
    fn map<O, F>(&self, n: usize, f: F) -> Vec<O>
    where
        O: Send,
        F: Fn(usize) -> O + Send + Sync,
    {
        (0..n).map(f).collect()
    }
}

/// Runs trajectories on a rayon thread pool
pub struct ParallelMap {
    pool: Option<rayon::ThreadPool>,
}

impl ParallelMap {
    /// Use a dedicated pool of `num_threads`, or rayon's global pool if None
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the pool cannot be built
    pub fn new(num_threads: Option<usize>) -> Result<Self> {
        let pool = num_threads
            .map(|n| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| SolverError::Configuration(e.to_string()))
            })
            .transpose()?;
        Ok(Self { pool })
    }
}

impl TrajectoryMap for ParallelMap {
    fn map<O, F>(&self, n: usize, f: F) -> Vec<O>
    where
        O: Send,
        F: Fn(usize) -> O + Send + Sync,
    {
        let run = || (0..n).into_par_iter().map(&f).collect::<Vec<_>>();
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

/// Run an ensemble of trajectories of `system`, one per seed.
///
/// # Errors
///
/// Returns an error if the thread pool cannot be built, or if
/// trajectories fail according to the failure policy
pub(crate) fn run_ensemble<T: SDESystem + Sync>(
    system: &T,
    initial_state: &Array1<Complex<f64>>,
    problem: &Problem,
    options: &Options,
    seeds: &[u64],
) -> Result<StochasticResult> {
    let start = Instant::now();
    info!(
        method = %options.method,
        ntraj = seeds.len(),
        map = ?options.map,
        "starting ensemble"
    );

    let cancelled = AtomicBool::new(false);
    let run = |index: usize| {
        let output = run_trajectory(
            system,
            initial_state,
            problem,
            options,
            seeds[index],
            &cancelled,
        );
        match &output {
            Ok(_) => debug!(trajectory = index, seed = seeds[index], "trajectory finished"),
            Err(TrajectoryError::Cancelled) => {}
            Err(error) => {
                warn!(trajectory = index, seed = seeds[index], %error, "trajectory failed");
                if options.failure_policy == FailurePolicy::Abort {
                    cancelled.store(true, Ordering::Relaxed);
                }
            }
        }
        output
    };

    let outputs = match options.map {
        MapKind::Serial => SerialMap.map(seeds.len(), run),
        MapKind::Parallel => ParallelMap::new(options.num_threads)?.map(seeds.len(), run),
    };

    let mut builder = ResultBuilder::new(options, &problem.times, seeds, problem.observables.len());
    for (index, output) in outputs.into_iter().enumerate() {
        builder.add(index, output);
    }
    let result = builder.finish(options.method, start.elapsed())?;

    info!(
        elapsed = ?result.stats.run_time,
        n_failed = result.stats.n_failed,
        "finished ensemble"
    );
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::{ParallelMap, SerialMap, Seeds, TrajectoryMap};
    use crate::error::SolverError;

    #[test]
    fn test_seed_derivation_is_deterministic_and_distinct() {
        let seeds = Seeds::Single(42).resolve(50).unwrap();
        assert_eq!(seeds, Seeds::from(42_u64).resolve(50).unwrap());
        let mut sorted = seeds.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 50);

        // A longer ensemble extends a shorter one
        assert_eq!(&Seeds::Single(42).resolve(60).unwrap()[..50], seeds.as_slice());
        assert_ne!(Seeds::Single(43).resolve(50).unwrap(), seeds);
        assert_eq!(Seeds::Entropy.resolve(5).unwrap().len(), 5);
    }

    #[test]
    fn test_seed_list() {
        let seeds = Seeds::from(vec![3_u64, 1, 2]);
        assert_eq!(seeds.resolve(2).unwrap(), vec![3, 1]);
        assert!(matches!(
            seeds.resolve(4),
            Err(SolverError::Configuration(_))
        ));
    }

    #[test]
    fn test_maps_preserve_order() {
        let serial = SerialMap.map(100, |i| i * i);
        let parallel = ParallelMap::new(Some(3)).unwrap().map(100, |i| i * i);
        let global = ParallelMap::new(None).unwrap().map(100, |i| i * i);
        assert_eq!(serial, parallel);
        assert_eq!(serial, global);
    }
}
