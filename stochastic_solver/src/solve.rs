//! Entry points for the stochastic master and schrodinger equations

use ndarray_linalg::Norm;
use tracing::debug;

use crate::{
    ensemble::{run_ensemble, Seeds},
    error::{Result, SolverError},
    linalg::vectorize,
    options::Options,
    problem::Problem,
    result::{QuantumState, StochasticResult},
    solvers::Method,
    system::{sme::SMESystem, sse::SSESystem},
};

/// Check the inputs shared by both equations, and resolve the seed of each trajectory
fn prepare(options: &Options, problem: &Problem, ntraj: usize, seeds: &Seeds) -> Result<Vec<u64>> {
    options.validate()?;
    problem.validate()?;
    if ntraj == 0 {
        return Err(SolverError::Configuration(
            "at least one trajectory is required".to_owned(),
        ));
    }
    seeds.resolve(ntraj)
}

/// Solves the stochastic master equation for a density matrix `\rho`.
///
/// ```latex
/// d\rho = L(\rho) dt + \sum_k (c_k \rho + \rho c_k^\dagger - <c_k + c_k^\dagger> \rho) dW_k
/// ```
#[derive(Debug, Clone, Default)]
pub struct SMESolver {
    options: Options,
}

impl SMESolver {
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The integrators accepted by [`Options::method`]
    #[must_use]
    pub fn avail_integrators() -> &'static [Method] {
        &Method::ALL
    }

    /// Run `ntraj` trajectories of `problem`.
    ///
    /// A ket initial state is converted to `|\psi><\psi|`, and the initial
    /// density matrix is normalized to unit trace.
    ///
    /// # Errors
    ///
    /// Returns an error if the problem or options are invalid, or if a
    /// trajectory fails according to the failure policy
    pub fn run(
        &self,
        problem: &Problem,
        ntraj: usize,
        seeds: impl Into<Seeds>,
    ) -> Result<StochasticResult> {
        let seeds = prepare(&self.options, problem, ntraj, &seeds.into())?;

        let mut rho = problem.initial_state.to_density_matrix();
        let trace = rho.diag().iter().map(|d| d.re).sum::<f64>();
        rho.mapv_inplace(|x| x / trace);

        let system = SMESystem::new(
            &problem.hamiltonian,
            &problem.collapse,
            &problem.channels(),
            &problem.parameters,
        );
        debug!(
            dimension = problem.dimension(),
            n_collapse = problem.collapse.len(),
            n_channels = problem.n_channels(),
            "built stochastic master equation"
        );
        run_ensemble(&system, &vectorize(&rho), problem, &self.options, &seeds)
    }
}

/// Solves the stochastic schrodinger equation for a state vector `|\psi>`.
///
/// ```latex
/// d|\psi> = (-iH - 1/2 \sum_k (c_k^\dagger c_k - e_k c_k + e_k^2 / 4))|\psi> dt
///     + \sum_k (c_k - e_k / 2)|\psi> dW_k
/// ```
#[derive(Debug, Clone, Default)]
pub struct SSESolver {
    options: Options,
}

impl SSESolver {
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The integrators accepted by [`Options::method`]
    #[must_use]
    pub fn avail_integrators() -> &'static [Method] {
        &Method::ALL
    }

    /// Run `ntraj` trajectories of `problem`, starting from the normalized initial ket.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the problem has collapse operators which are
    /// not measured, `InvalidSpecification` if the initial state is a density
    /// matrix, or any error of [`SMESolver::run`]
    pub fn run(
        &self,
        problem: &Problem,
        ntraj: usize,
        seeds: impl Into<Seeds>,
    ) -> Result<StochasticResult> {
        if !problem.collapse.is_empty() {
            return Err(SolverError::Configuration(format!(
                "the stochastic schrodinger equation has no unmeasured collapse operators, got {}",
                problem.collapse.len()
            )));
        }
        let seeds = prepare(&self.options, problem, ntraj, &seeds.into())?;
        let QuantumState::Ket(psi) = &problem.initial_state else {
            return Err(SolverError::InvalidSpecification(
                "the stochastic schrodinger equation requires a ket initial state".to_owned(),
            ));
        };
        let norm = psi.norm_l2();

        let system = SSESystem::new(&problem.hamiltonian, &problem.channels(), &problem.parameters);
        debug!(
            dimension = problem.dimension(),
            n_channels = problem.n_channels(),
            "built stochastic schrodinger equation"
        );
        run_ensemble(&system, &(psi / norm), problem, &self.options, &seeds)
    }
}

/// Solve the stochastic master equation, see [`SMESolver::run`].
///
/// # Errors
///
/// Returns an error if the problem or options are invalid, or if a
/// trajectory fails according to the failure policy
pub fn smesolve(
    problem: &Problem,
    ntraj: usize,
    seeds: impl Into<Seeds>,
    options: &Options,
) -> Result<StochasticResult> {
    SMESolver::new(options.clone()).run(problem, ntraj, seeds)
}

/// Solve the stochastic schrodinger equation, see [`SSESolver::run`].
///
/// # Errors
///
/// Returns an error if the problem or options are invalid, or if a
/// trajectory fails according to the failure policy
pub fn ssesolve(
    problem: &Problem,
    ntraj: usize,
    seeds: impl Into<Seeds>,
    options: &Options,
) -> Result<StochasticResult> {
    SSESolver::new(options.clone()).run(problem, ntraj, seeds)
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use ndarray::{Array2, Ix2};
    use num_complex::Complex;

    use super::{smesolve, ssesolve, SMESolver, SSESolver};
    use crate::{
        ensemble::Seeds,
        error::{SolverError, TrajectoryError},
        operator::{
            basis, dagger, destroy, ket_to_density_matrix, number, TimeDependentOperator,
        },
        options::{FailurePolicy, MapKind, Options},
        problem::{Detection, Problem},
        reference::evolve,
        result::QuantumState,
        solvers::Method,
        tests::{assert_allclose, get_oscillator_problem, Scenario, N_LEVELS},
    };

    fn get_reference(problem: &Problem, collapse: &[TimeDependentOperator]) -> Array2<Complex<f64>> {
        evolve(
            &problem.hamiltonian,
            &problem.initial_state,
            &problem.times,
            collapse,
            &problem.observables,
            &problem.parameters,
            1e-3,
        )
        .unwrap()
    }

    fn get_sme_reference(problem: &Problem) -> Array2<Complex<f64>> {
        let collapse = problem
            .collapse
            .iter()
            .chain(&problem.stochastic)
            .cloned()
            .collect::<Vec<_>>();
        get_reference(problem, &collapse)
    }

    fn with_damping(problem: Problem) -> Problem {
        problem.with_collapse(vec![TimeDependentOperator::constant(destroy(N_LEVELS))])
    }

    #[test]
    fn test_avail_integrators() {
        let names = SMESolver::avail_integrators()
            .iter()
            .map(|m| m.name())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            ["euler", "milstein", "milstein_imp", "platen", "pred_corr", "rouchon"]
        );
        assert_eq!(SSESolver::avail_integrators(), SMESolver::avail_integrators());
    }

    #[test]
    fn test_sme_matches_reference() {
        for scenario in Scenario::ALL {
            for detection in [Detection::Homodyne, Detection::Heterodyne] {
                let problem = with_damping(scenario.problem()).with_detection(detection);
                let result = smesolve(&problem, 20, 1_u64, &Options::default()).unwrap();

                assert_allclose(&result.expect, &get_sme_reference(&problem), 0.05);
                assert_eq!(result.n_trajectories(), 20);
                assert!(result.measurement.is_none());
                assert!(result.wiener_process.is_none());
                assert!(result.dw.is_none());
            }
        }
    }

    #[test]
    fn test_sse_matches_reference() {
        for scenario in Scenario::ALL {
            for detection in [Detection::Homodyne, Detection::Heterodyne] {
                let problem = scenario.problem().with_detection(detection);
                let result = ssesolve(&problem, 20, 1_u64, &Options::default()).unwrap();

                assert_allclose(&result.expect, &get_reference(&problem, &problem.stochastic), 0.1);
            }
        }
    }

    #[test]
    fn test_every_method_matches_reference() {
        for method in Method::ALL {
            for detection in [Detection::Homodyne, Detection::Heterodyne] {
                let options = Options::default().with_method(method);

                let problem = with_damping(Scenario::TimeDependentHamiltonian.problem())
                    .with_detection(detection);
                let result = smesolve(&problem, 20, 1_u64, &options).unwrap();
                assert_allclose(&result.expect, &get_sme_reference(&problem), 0.05);
                assert_eq!(result.stats.method, method);

                let problem = Scenario::TwoOperators.problem().with_detection(detection);
                let result = ssesolve(&problem, 20, 1_u64, &options).unwrap();
                assert_allclose(
                    &result.expect,
                    &get_reference(&problem, &problem.stochastic),
                    0.1,
                );
            }
        }
    }

    #[test]
    fn test_measured_superposition_matches_reference() {
        let mut problem = get_oscillator_problem();
        let superposition = (basis(N_LEVELS, 0) + basis(N_LEVELS, 1)) * std::f64::consts::FRAC_1_SQRT_2;
        problem.initial_state = QuantumState::Ket(superposition.clone());
        let reference = get_reference(&problem, &problem.stochastic);

        let result = ssesolve(&problem, 100, 5_u64, &Options::default()).unwrap();
        assert_allclose(&result.expect, &reference, 0.1);

        problem.initial_state = QuantumState::Operator(ket_to_density_matrix(&superposition));
        let result = smesolve(&problem, 100, 5_u64, &Options::default()).unwrap();
        assert_allclose(&result.expect, &reference, 0.1);
    }

    #[test]
    fn test_measurement_shapes() {
        let options = Options::default().with_store_measurement(true);
        let problem = Scenario::TwoOperators.problem();
        let n_times = problem.times.len();

        for (detection, wiener_shape, dw_shape) in [
            (Detection::Homodyne, vec![2, n_times], vec![2, n_times - 1]),
            (
                Detection::Heterodyne,
                vec![2, 2, n_times],
                vec![2, 2, n_times - 1],
            ),
        ] {
            let problem = problem.clone().with_detection(detection);
            for result in [
                smesolve(&problem, 3, 1_u64, &options).unwrap(),
                ssesolve(&problem, 3, 1_u64, &options).unwrap(),
            ] {
                for index in 0..3 {
                    let wiener = &result.wiener_process.as_ref().unwrap()[&index];
                    let dw = &result.dw.as_ref().unwrap()[&index];
                    let measurement = &result.measurement.as_ref().unwrap()[&index];
                    assert_eq!(wiener.shape(), wiener_shape.as_slice());
                    assert_eq!(dw.shape(), dw_shape.as_slice());
                    assert_eq!(measurement.shape(), dw_shape.as_slice());
                }
            }
        }
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_recorded_increments_are_wiener() {
        let mut problem = Scenario::TwoOperators
            .problem()
            .with_detection(Detection::Heterodyne);
        // Intervals of 10 and 20 internal steps
        problem.times = vec![0.0, 0.01, 0.03];
        let intervals: [f64; 2] = [0.01, 0.02];
        let n_traj = 2000;
        let options = Options::default().with_store_measurement(true);
        let result = ssesolve(&problem, n_traj, 11_u64, &options).unwrap();
        let dw = result.dw.unwrap();

        // dW / sqrt(dt), with the (operator, quadrature) axes flattened into 4 channels
        let samples = (0..n_traj)
            .map(|i| {
                let record = dw[&i].clone().into_shape([4, 2]).unwrap();
                Array2::from_shape_fn([4, 2], |(k, n)| record[[k, n]] / intervals[n].sqrt())
            })
            .collect::<Vec<_>>();
        let average = |f: &dyn Fn(&Array2<f64>) -> f64| {
            samples.iter().map(f).sum::<f64>() / n_traj as f64
        };

        for n in 0..2 {
            for k in 0..4 {
                let mean = average(&|s: &Array2<f64>| s[[k, n]]);
                let variance = average(&|s: &Array2<f64>| s[[k, n]].powi(2));
                assert!(mean.abs() < 0.1, "channel {k} has mean {mean}");
                assert!((variance - 1.0).abs() < 0.15, "channel {k} has variance {variance}");
                for j in 0..k {
                    let correlation = average(&|s: &Array2<f64>| s[[j, n]] * s[[k, n]]);
                    assert!(
                        correlation.abs() < 0.1,
                        "channels {j} and {k} have correlation {correlation}"
                    );
                }
            }
        }

        let pooled = average(&|s: &Array2<f64>| s.iter().map(|x| x * x).sum::<f64>()) / 8.0;
        assert!((pooled - 1.0).abs() < 0.05, "pooled variance {pooled}");
    }

    #[test]
    fn test_measurement_is_expectation_plus_noise() {
        let options = Options::default()
            .with_store_measurement(true)
            .with_store_states(true);
        let problem = Scenario::TwoOperators.problem();
        let sme_problem = with_damping(problem.clone());

        for (problem, result) in [
            (&problem, ssesolve(&problem, 3, 2_u64, &options).unwrap()),
            (&sme_problem, smesolve(&sme_problem, 3, 2_u64, &options).unwrap()),
        ] {
            for index in 0..3 {
                let states = &result.runs_states.as_ref().unwrap()[&index];
                let dw = result.dw.as_ref().unwrap()[&index]
                    .view()
                    .into_dimensionality::<Ix2>()
                    .unwrap();
                let measurement = result.measurement.as_ref().unwrap()[&index]
                    .view()
                    .into_dimensionality::<Ix2>()
                    .unwrap();

                for (k, operator) in problem.stochastic.iter().enumerate() {
                    for n in 0..problem.times.len() - 1 {
                        let t = problem.times[n + 1];
                        let c = operator.evaluate(t, &problem.parameters);
                        let quadrature = &c + &dagger(&c);
                        let expectation = match &states[n + 1] {
                            QuantumState::Ket(psi) => {
                                psi.map(Complex::conj).dot(&quadrature.dot(psi)).re
                            }
                            QuantumState::Operator(rho) => quadrature.dot(rho).diag().sum().re,
                        };
                        let expected = expectation + dw[[k, n]] / (t - problem.times[n]);
                        assert_relative_eq!(measurement[[k, n]], expected, epsilon = 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn test_reused_seeds_are_identical() {
        let options = Options::default()
            .with_store_final_state(true)
            .with_keep_runs_results(true);
        let mut problem = with_damping(get_oscillator_problem());
        problem.times = vec![0.0, 0.1];

        let first = smesolve(&problem, 5, Seeds::Entropy, &options).unwrap();
        let second = smesolve(&problem, 5, &first, &options).unwrap();
        assert_eq!(first.seeds, second.seeds);
        assert_eq!(first.final_states, second.final_states);
        assert_eq!(first.expect, second.expect);
        assert_eq!(first.runs_expect, second.runs_expect);
    }

    #[test]
    fn test_serial_and_parallel_are_identical() {
        let problem = Scenario::DrivenHamiltonian.problem();
        let serial = ssesolve(&problem, 8, 3_u64, &Options::default().with_store_final_state(true))
            .unwrap();
        for num_threads in [None, Some(2)] {
            let options = Options::default()
                .with_store_final_state(true)
                .with_map(MapKind::Parallel)
                .with_num_threads(num_threads);
            let parallel = ssesolve(&problem, 8, 3_u64, &options).unwrap();
            assert_eq!(serial.expect, parallel.expect);
            assert_eq!(serial.final_states, parallel.final_states);
        }
    }

    #[test]
    fn test_no_stochastic_operators_is_deterministic() {
        let problem = with_damping(Scenario::TimeDependentHamiltonian.problem()).with_stochastic(vec![]);
        let reference = get_sme_reference(&problem);
        for method in Method::ALL {
            let options = Options::default()
                .with_method(method)
                .with_store_measurement(true);
            let result = smesolve(&problem, 3, 1_u64, &options).unwrap();
            assert_allclose(&result.expect, &reference, 2e-3);
            assert!(result.std_expect.iter().all(|s| *s < 1e-6));
            assert_eq!(
                result.dw.as_ref().unwrap()[&0].shape(),
                &[0, problem.times.len() - 1]
            );
        }
    }

    #[test]
    fn test_stored_states_are_normalized() {
        let options = Options::default()
            .with_store_states(true)
            .with_store_final_state(true);
        let problem = Scenario::Simple.problem();
        let result = ssesolve(&problem, 2, 1_u64, &options).unwrap();

        let states = &result.runs_states.as_ref().unwrap()[&1];
        assert_eq!(states.len(), problem.times.len());
        for state in states {
            let QuantumState::Ket(psi) = state else {
                panic!("expected a ket")
            };
            let norm = psi.iter().map(Complex::norm_sqr).sum::<f64>();
            assert!((norm - 1.0).abs() < 1e-12);
        }
        let average = result.average_final_state.unwrap();
        let trace = average.diag().iter().map(|d| d.re).sum::<f64>();
        assert!((trace - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_runs_are_rejected() {
        let problem = get_oscillator_problem();
        let options = Options::default();

        assert!(matches!(
            ssesolve(&with_damping(problem.clone()), 1, 1_u64, &options),
            Err(SolverError::Configuration(_))
        ));
        assert!(matches!(
            smesolve(&problem, 0, 1_u64, &options),
            Err(SolverError::Configuration(_))
        ));
        assert!(matches!(
            smesolve(&problem, 3, vec![1_u64, 2], &options),
            Err(SolverError::Configuration(_))
        ));
        assert!(matches!(
            smesolve(&problem, 3, 1_u64, &options.clone().with_dt(-1.0)),
            Err(SolverError::Configuration(_))
        ));

        let mut density_matrix = problem.clone();
        density_matrix.initial_state =
            QuantumState::Operator(ket_to_density_matrix(&basis(N_LEVELS, 0)));
        assert!(matches!(
            ssesolve(&density_matrix, 1, 1_u64, &options),
            Err(SolverError::InvalidSpecification(_))
        ));

        let mut unordered = problem;
        unordered.times = vec![0.0, 0.2, 0.1];
        assert!(matches!(
            smesolve(&unordered, 1, 1_u64, &options),
            Err(SolverError::InvalidSpecification(_))
        ));
    }

    #[test]
    fn test_non_square_hamiltonian_is_rejected() {
        let problem = Problem::new(
            Array2::<Complex<f64>>::zeros([2, 3]),
            basis(2, 0),
            vec![0.0, 0.1],
        );
        assert!(matches!(
            smesolve(&problem, 1, 1_u64, &Options::default()),
            Err(SolverError::InvalidSpecification(_))
        ));
        assert!(matches!(
            ssesolve(&problem, 1, 1_u64, &Options::default()),
            Err(SolverError::InvalidSpecification(_))
        ));
    }

    #[test]
    fn test_divergent_density_matrix_is_reported() {
        // The trace of rho stays at one as the |0><3| coherence grows
        let superposition =
            (basis(N_LEVELS, 0) + basis(N_LEVELS, 3)) * std::f64::consts::FRAC_1_SQRT_2;
        let mut coherence = Array2::<Complex<f64>>::zeros([N_LEVELS, N_LEVELS]);
        coherence[[0, 3]] = Complex { re: 1.0, im: 0.0 };
        coherence[[3, 0]] = Complex { re: 1.0, im: 0.0 };

        let problem = Problem::new(
            &number(N_LEVELS) * 100.0,
            ket_to_density_matrix(&superposition),
            vec![0.0, 0.1],
        )
        .with_stochastic(vec![TimeDependentOperator::constant(&destroy(N_LEVELS) * 0.5)])
        .with_observables(vec![coherence]);
        let options = Options::default().with_method(Method::Euler).with_dt(0.01);

        let error = smesolve(&problem, 2, vec![5_u64, 6], &options).unwrap_err();
        let SolverError::NumericalInstability {
            trajectory: 0,
            seed: 5,
            source: TrajectoryError::NumericalInstability { norm, .. },
        } = &error
        else {
            panic!("expected the first trajectory to diverge, got {error}")
        };
        assert!(*norm > 1.25);

        let options = options.with_method(Method::Rouchon);
        assert!(smesolve(&problem, 2, vec![5_u64, 6], &options).is_ok());
    }

    #[test]
    fn test_divergent_trajectories_are_reported() {
        let problem = Problem::new(
            &number(N_LEVELS) * 1000.0,
            basis(N_LEVELS, 3),
            vec![0.0, 0.1],
        )
        .with_stochastic(vec![TimeDependentOperator::constant(destroy(N_LEVELS))])
        .with_observables(vec![number(N_LEVELS)]);
        let options = Options::default().with_method(Method::Euler).with_dt(0.01);

        let error = ssesolve(&problem, 4, vec![5_u64, 6, 7, 8], &options).unwrap_err();
        assert!(matches!(
            error,
            SolverError::NumericalInstability {
                trajectory: 0,
                seed: 5,
                ..
            }
        ));

        // Every trajectory fails, so there is nothing to average
        let options = options.with_failure_policy(FailurePolicy::Continue);
        assert!(matches!(
            ssesolve(&problem, 4, 1_u64, &options),
            Err(SolverError::NumericalInstability { .. })
        ));

        let options = options.with_method(Method::MilsteinImplicit);
        let result = ssesolve(&get_oscillator_problem(), 4, 1_u64, &options).unwrap();
        assert!(result.failures.is_empty());
        assert_eq!(result.stats.n_failed, 0);
    }
}
