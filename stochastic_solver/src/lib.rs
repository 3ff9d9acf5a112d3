#![warn(clippy::pedantic)]

pub mod distribution;
pub mod ensemble;
pub mod error;
pub mod linalg;
pub mod operator;
pub mod options;
pub mod problem;
pub mod reference;
pub mod result;
pub mod solve;
pub mod solvers;
pub mod system;
pub mod trajectory;

pub use ensemble::Seeds;
pub use error::{Result, SolverError, TrajectoryError};
pub use operator::{OperatorTerm, Parameters, TimeDependentOperator};
pub use options::{FailurePolicy, MapKind, Options};
pub use problem::{Detection, Problem};
pub use result::{QuantumState, StochasticResult};
pub use solve::{smesolve, ssesolve, SMESolver, SSESolver};
pub use solvers::Method;

#[cfg(test)]
pub(crate) mod tests {
    use ndarray::{Array1, Array2};
    use num_complex::Complex;

    use crate::{
        operator::{coherent, dagger, destroy, number, Parameters, TimeDependentOperator},
        problem::Problem,
    };

    pub(crate) const N_LEVELS: usize = 4;
    pub(crate) const GAMMA: f64 = 0.25;

    pub(crate) fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
        Array1::linspace(start, end, n).to_vec()
    }

    /// `w t`, with `w` read from the parameters
    fn ramp(t: f64, parameters: &Parameters) -> Complex<f64> {
        Complex {
            re: parameters.get_or("w", 0.0) * t,
            im: 0.0,
        }
    }

    /// Variations on a weakly measured oscillator
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Scenario {
        /// `H = a^\dagger a`, measuring `\sqrt{\gamma} a`
        Simple,
        /// Also measuring `\gamma a^2`
        TwoOperators,
        /// `H = w t a^\dagger a`
        TimeDependentHamiltonian,
        /// `H = a^\dagger a + a^\dagger + a`, measuring `\sqrt{\gamma} a` and `\gamma a^2`
        DrivenHamiltonian,
        /// Measuring `w t \sqrt{\gamma} a`
        TimeDependentStochastic,
    }

    impl Scenario {
        pub(crate) const ALL: [Scenario; 5] = [
            Scenario::Simple,
            Scenario::TwoOperators,
            Scenario::TimeDependentHamiltonian,
            Scenario::DrivenHamiltonian,
            Scenario::TimeDependentStochastic,
        ];

        pub(crate) fn problem(self) -> Problem {
            let a = destroy(N_LEVELS);
            let measured = TimeDependentOperator::constant(&a * GAMMA.sqrt());
            let squared = TimeDependentOperator::constant(a.dot(&a) * GAMMA);

            let (hamiltonian, stochastic): (TimeDependentOperator, _) = match self {
                Scenario::Simple => (number(N_LEVELS).into(), vec![measured]),
                Scenario::TwoOperators => (number(N_LEVELS).into(), vec![measured, squared]),
                Scenario::TimeDependentHamiltonian => (
                    TimeDependentOperator::with_coefficient(number(N_LEVELS), ramp),
                    vec![measured],
                ),
                Scenario::DrivenHamiltonian => (
                    (number(N_LEVELS) + &a + &dagger(&a)).into(),
                    vec![measured, squared],
                ),
                Scenario::TimeDependentStochastic => (
                    number(N_LEVELS).into(),
                    vec![TimeDependentOperator::with_coefficient(
                        &a * GAMMA.sqrt(),
                        ramp,
                    )],
                ),
            };

            Problem::new(
                hamiltonian,
                coherent(N_LEVELS, Complex { re: 0.5, im: 0.0 }),
                linspace(0.0, 0.1, 21),
            )
            .with_stochastic(stochastic)
            .with_observables(get_quadratures())
            .with_parameters(Parameters::from([("w", 2.0)]))
        }
    }

    /// `a^\dagger a`, `a + a^\dagger` and `-i(a - a^\dagger)`
    pub(crate) fn get_quadratures() -> Vec<Array2<Complex<f64>>> {
        let a = destroy(N_LEVELS);
        let a_dagger = dagger(&a);
        vec![
            number(N_LEVELS),
            &a + &a_dagger,
            (&a - &a_dagger) * Complex { re: 0.0, im: -1.0 },
        ]
    }

    pub(crate) fn get_oscillator_problem() -> Problem {
        Scenario::Simple.problem()
    }

    /// Assert `|actual - expected| <= tolerance (1 + |expected|)` elementwise
    pub(crate) fn assert_allclose(
        actual: &Array2<Complex<f64>>,
        expected: &Array2<Complex<f64>>,
        tolerance: f64,
    ) {
        assert_eq!(actual.shape(), expected.shape());
        for ((idx, a), e) in actual.indexed_iter().zip(expected) {
            assert!(
                (a - e).norm() <= tolerance * (1.0 + e.norm()),
                "{a} differs from {e} at {idx:?}"
            );
        }
    }
}
