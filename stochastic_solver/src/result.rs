//! Aggregation of trajectory outputs into a [`StochasticResult`]

use std::{collections::BTreeMap, time::Duration};

use ndarray::{Array1, Array2, ArrayD};
use num_complex::Complex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SolverError, TrajectoryError},
    operator::ket_to_density_matrix,
    options::{FailurePolicy, Options},
    solvers::Method,
    trajectory::TrajectoryOutput,
};

/// A state vector `|\psi>` or a density matrix `\rho`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QuantumState {
    Ket(Array1<Complex<f64>>),
    Operator(Array2<Complex<f64>>),
}

impl QuantumState {
    #[must_use]
    pub fn dimension(&self) -> usize {
        match self {
            QuantumState::Ket(k) => k.len(),
            QuantumState::Operator(o) => o.nrows(),
        }
    }

    #[must_use]
    pub fn is_ket(&self) -> bool {
        matches!(self, QuantumState::Ket(_))
    }

    /// `|\psi><\psi|` for a ket, or the density matrix itself
    #[must_use]
    pub fn to_density_matrix(&self) -> Array2<Complex<f64>> {
        match self {
            QuantumState::Ket(k) => ket_to_density_matrix(k),
            QuantumState::Operator(o) => o.clone(),
        }
    }
}

impl From<Array1<Complex<f64>>> for QuantumState {
    fn from(value: Array1<Complex<f64>>) -> Self {
        QuantumState::Ket(value)
    }
}

impl From<Array2<Complex<f64>>> for QuantumState {
    fn from(value: Array2<Complex<f64>>) -> Self {
        QuantumState::Operator(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunStats {
    pub method: Method,
    pub n_trajectories: usize,
    pub n_failed: usize,
    pub run_time: Duration,
}

/// The result of a stochastic solve.
///
/// Per trajectory fields are keyed by trajectory index, and only contain
/// the trajectories that completed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StochasticResult {
    pub times: Vec<f64>,
    /// The seed of each trajectory, in index order
    pub seeds: Vec<u64>,
    /// The average of each observable, with shape `(n_observables, n_times)`
    pub expect: Array2<Complex<f64>>,
    /// `\sqrt{<|x - <x>|^2>}` for each observable, with shape `(n_observables, n_times)`
    pub std_expect: Array2<f64>,
    pub runs_expect: Option<BTreeMap<usize, Array2<Complex<f64>>>>,
    pub final_states: Option<BTreeMap<usize, QuantumState>>,
    pub average_final_state: Option<Array2<Complex<f64>>>,
    pub runs_states: Option<BTreeMap<usize, Vec<QuantumState>>>,
    pub measurement: Option<BTreeMap<usize, ArrayD<f64>>>,
    pub wiener_process: Option<BTreeMap<usize, ArrayD<f64>>>,
    pub dw: Option<BTreeMap<usize, ArrayD<f64>>>,
    pub failures: BTreeMap<usize, TrajectoryError>,
    pub stats: RunStats,
}

impl StochasticResult {
    #[must_use]
    pub fn n_trajectories(&self) -> usize {
        self.stats.n_trajectories
    }

    /// The average expectation of the observable with index `idx`
    #[must_use]
    pub fn average_expect(&self, idx: usize) -> Array1<Complex<f64>> {
        self.expect.row(idx).to_owned()
    }
}

/// Folds trajectory outputs, in index order, into a [`StochasticResult`]
pub(crate) struct ResultBuilder<'a> {
    options: &'a Options,
    times: Vec<f64>,
    seeds: Vec<u64>,
    n_completed: usize,
    sum: Array2<Complex<f64>>,
    sum_sqr: Array2<f64>,
    sum_final_state: Option<Array2<Complex<f64>>>,
    runs_expect: BTreeMap<usize, Array2<Complex<f64>>>,
    final_states: BTreeMap<usize, QuantumState>,
    runs_states: BTreeMap<usize, Vec<QuantumState>>,
    measurement: BTreeMap<usize, ArrayD<f64>>,
    wiener_process: BTreeMap<usize, ArrayD<f64>>,
    dw: BTreeMap<usize, ArrayD<f64>>,
    failures: BTreeMap<usize, TrajectoryError>,
    n_cancelled: usize,
}

impl<'a> ResultBuilder<'a> {
    pub fn new(options: &'a Options, times: &[f64], seeds: &[u64], n_observables: usize) -> Self {
        Self {
            options,
            times: times.to_vec(),
            seeds: seeds.to_vec(),
            n_completed: 0,
            sum: Array2::zeros([n_observables, times.len()]),
            sum_sqr: Array2::zeros([n_observables, times.len()]),
            sum_final_state: None,
            runs_expect: BTreeMap::new(),
            final_states: BTreeMap::new(),
            runs_states: BTreeMap::new(),
            measurement: BTreeMap::new(),
            wiener_process: BTreeMap::new(),
            dw: BTreeMap::new(),
            failures: BTreeMap::new(),
            n_cancelled: 0,
        }
    }

    pub fn add(&mut self, index: usize, output: std::result::Result<TrajectoryOutput, TrajectoryError>) {
        let output = match output {
            Ok(output) => output,
            Err(TrajectoryError::Cancelled) => {
                self.n_cancelled += 1;
                return;
            }
            Err(error) => {
                self.failures.insert(index, error);
                return;
            }
        };

        self.n_completed += 1;
        self.sum += &output.expect;
        self.sum_sqr += &output.expect.mapv(|x| x.norm_sqr());

        if self.options.store_final_state {
            let density_matrix = output.final_state.to_density_matrix();
            match &mut self.sum_final_state {
                Some(sum) => *sum += &density_matrix,
                None => self.sum_final_state = Some(density_matrix),
            }
            self.final_states.insert(index, output.final_state);
        }
        if self.options.keep_runs_results {
            self.runs_expect.insert(index, output.expect);
        }
        if let Some(states) = output.states {
            self.runs_states.insert(index, states);
        }
        if let Some(noise) = output.noise {
            self.measurement.insert(index, noise.measurement);
            self.wiener_process.insert(index, noise.wiener_process);
            self.dw.insert(index, noise.dw);
        }
    }

    fn first_failure(&self) -> Option<SolverError> {
        self.failures
            .iter()
            .next()
            .map(|(&index, error)| SolverError::NumericalInstability {
                trajectory: index,
                seed: self.seeds[index],
                source: error.clone(),
            })
    }

    /// # Errors
    ///
    /// Returns the failure with the lowest index if the failure policy is abort,
    /// or if no trajectory completed
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(self, method: Method, run_time: Duration) -> Result<StochasticResult> {
        if self.options.failure_policy == FailurePolicy::Abort || self.n_completed == 0 {
            if let Some(error) = self.first_failure() {
                return Err(error);
            }
        }
        if self.n_completed == 0 {
            return Err(SolverError::Configuration(format!(
                "all {} trajectories were cancelled",
                self.n_cancelled
            )));
        }

        let n = self.n_completed as f64;
        let expect = self.sum * (1.0 / n);
        let std_expect = ndarray::Zip::from(&self.sum_sqr)
            .and(&expect)
            .map_collect(|sqr, mean| (sqr / n - mean.norm_sqr()).max(0.0).sqrt());

        Ok(StochasticResult {
            times: self.times,
            seeds: self.seeds,
            expect,
            std_expect,
            runs_expect: self.options.keep_runs_results.then_some(self.runs_expect),
            average_final_state: self.sum_final_state.map(|sum| sum * (1.0 / n)),
            final_states: self.options.store_final_state.then_some(self.final_states),
            runs_states: self.options.store_states.then_some(self.runs_states),
            measurement: self.options.store_measurement.then_some(self.measurement),
            wiener_process: self.options.store_measurement.then_some(self.wiener_process),
            dw: self.options.store_measurement.then_some(self.dw),
            stats: RunStats {
                method,
                n_trajectories: self.n_completed + self.failures.len(),
                n_failed: self.failures.len(),
                run_time,
            },
            failures: self.failures,
        })
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use approx::assert_relative_eq;
    use ndarray::{array, Array2};
    use num_complex::Complex;

    use super::{QuantumState, ResultBuilder};
    use crate::{
        error::{SolverError, TrajectoryError},
        options::{FailurePolicy, Options},
        solvers::Method,
        trajectory::TrajectoryOutput,
    };

    fn get_output(value: f64) -> TrajectoryOutput {
        TrajectoryOutput {
            expect: array![[Complex { re: value, im: 0.0 }]],
            final_state: QuantumState::Ket(array![
                Complex { re: 1.0, im: 0.0 },
                Complex::default()
            ]),
            states: None,
            noise: None,
        }
    }

    #[test]
    fn test_mean_and_std() {
        let options = Options::default()
            .with_store_final_state(true)
            .with_keep_runs_results(true);
        let mut builder = ResultBuilder::new(&options, &[0.0], &[1, 2], 1);
        builder.add(0, Ok(get_output(1.0)));
        builder.add(1, Ok(get_output(3.0)));
        let result = builder.finish(Method::Euler, Duration::ZERO).unwrap();

        assert_relative_eq!(result.expect[[0, 0]].re, 2.0);
        assert_relative_eq!(result.std_expect[[0, 0]], 1.0, epsilon = 1e-12);
        assert_eq!(result.runs_expect.as_ref().map(|r| r.len()), Some(2));
        let average = result.average_final_state.unwrap();
        assert_relative_eq!(average[[0, 0]].re, 1.0);
        assert_eq!(average.shape(), &[2, 2]);
        assert!(result.runs_states.is_none());
        assert!(result.measurement.is_none());
    }

    #[test]
    fn test_abort_reports_lowest_failure() {
        let options = Options::default();
        let mut builder = ResultBuilder::new(&options, &[0.0], &[10, 11, 12], 1);
        builder.add(0, Ok(get_output(1.0)));
        builder.add(1, Err(TrajectoryError::NumericalInstability { time: 0.5, norm: 2.0 }));
        builder.add(2, Err(TrajectoryError::Cancelled));

        let error = builder.finish(Method::Euler, Duration::ZERO).unwrap_err();
        assert!(matches!(
            error,
            SolverError::NumericalInstability {
                trajectory: 1,
                seed: 11,
                ..
            }
        ));
    }

    #[test]
    fn test_continue_excludes_failures() {
        let options = Options::default().with_failure_policy(FailurePolicy::Continue);
        let mut builder = ResultBuilder::new(&options, &[0.0], &[10, 11, 12], 1);
        builder.add(0, Ok(get_output(1.0)));
        builder.add(1, Err(TrajectoryError::SingularStep { time: 0.5 }));
        builder.add(2, Ok(get_output(2.0)));

        let result = builder.finish(Method::Euler, Duration::ZERO).unwrap();
        assert_relative_eq!(result.expect[[0, 0]].re, 1.5);
        assert_eq!(result.stats.n_failed, 1);
        assert_eq!(result.stats.n_trajectories, 3);
        assert!(result.failures.contains_key(&1));
    }

    #[test]
    fn test_continue_with_no_successes_is_error() {
        let options = Options::default().with_failure_policy(FailurePolicy::Continue);
        let mut builder = ResultBuilder::new(&options, &[0.0], &[10], 1);
        builder.add(0, Err(TrajectoryError::SingularStep { time: 0.5 }));
        assert!(builder.finish(Method::Euler, Duration::ZERO).is_err());
    }

    #[test]
    fn test_density_matrix_of_ket() {
        let state = QuantumState::Ket(array![
            Complex { re: 0.0, im: 1.0 },
            Complex::default()
        ]);
        let expected: Array2<Complex<f64>> = array![
            [Complex { re: 1.0, im: 0.0 }, Complex::default()],
            [Complex::default(), Complex::default()]
        ];
        assert_eq!(state.to_density_matrix(), expected);
        assert_eq!(state.dimension(), 2);
    }
}
