use std::borrow::Cow;

use ndarray::{Array1, Array2};
use num_complex::Complex;

use crate::{
    operator::{dagger, BoundOperator, Parameters, TimeDependentOperator},
    problem::Detection,
    result::QuantumState,
};

pub mod sme;
pub mod sse;

pub struct SDEStep<'a> {
    pub coherent: f64,
    pub incoherent: &'a [f64],
}

pub struct SDEOperators {
    pub coherent: Array1<Complex<f64>>,
    pub incoherent: Vec<Array1<Complex<f64>>>,
}

/// Represents a SDE System, seperated into a 'coherent' term and a series of 'incoherent' terms
///
/// ```latex
/// X_t = X_{t0} + \int_{t0}^{t} a(s,X) ds + \sum_1^m \int_{t0}^{t} b^j(s, X_s) dW_s^j
/// ```
///
/// Where a(t,X) is the coherent part at time T, and `B(s,X_s)` is the incoherent part at time T.
/// The noise `dW^j` is real, with `<dW^j dW^k> = \delta_{jk} dt`.
#[allow(clippy::module_name_repetitions)]
pub trait SDESystem {
    /// Type used to store a cache of 'Parts' required to calculate a SDE step.
    type Parts<'a>
    where
        Self: 'a;

    /// Get the parts used to calculate an SDE step.
    /// This is useful if multiple separate steps are required, ie for supporting value calculations
    fn get_parts<'a>(&'a self, state: &'a Array1<Complex<f64>>, t: f64) -> Self::Parts<'a>;

    /// Get the resulting step from the cached parts
    /// `coherent_step * a(s,X_s) + \sum_j steps[j] * b^j(s, X_s)`
    fn get_step_from_parts(parts: &Self::Parts<'_>, step: &SDEStep) -> Array1<Complex<f64>>;

    /// Get the resulting step
    /// `coherent_step * a(s,X_s) + \sum_j steps[j] * b^j(s, X_s)`
    #[inline]
    fn get_step(
        &self,
        step: &SDEStep,
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Array1<Complex<f64>> {
        let parts = self.get_parts(state, t);
        Self::get_step_from_parts(&parts, step)
    }

    /// Get the coherent step, `step * a(s,X_s)`
    fn get_coherent_step(
        &self,
        step: f64,
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Array1<Complex<f64>>;

    /// Get a single incoherent step `step * b^j(s, X_s)`
    fn get_incoherent_step(
        &self,
        idx: usize,
        step: f64,
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Array1<Complex<f64>>;

    /// Get the incoherent steps `\sum_j steps[j] * b^j(s, X_s)`
    #[inline]
    fn get_incoherent_steps(
        &self,
        steps: &[f64],
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Array1<Complex<f64>> {
        let mut out = Array1::zeros([state.len()]);
        for (idx, step) in steps.iter().enumerate() {
            out += &self.get_incoherent_step(idx, *step, state, t);
        }
        out
    }

    /// Get the individual operators `a(s,X_s)` and `b^j(s, X_s)`
    fn get_operators_from_parts(parts: &Self::Parts<'_>) -> SDEOperators;

    #[inline]
    fn get_operators(&self, state: &Array1<Complex<f64>>, t: f64) -> SDEOperators {
        let parts = self.get_parts(state, t);
        Self::get_operators_from_parts(&parts)
    }

    /// The total number of incoherent terms
    fn n_incoherent(&self) -> usize;

    /// Whether any term of the system depends on time
    fn is_time_dependent(&self) -> bool;

    /// The linear part `A(t)` of the coherent term, `a(t, X) = A(t) X + (nonlinear)`
    fn linear_coherent(&self, t: f64) -> Array2<Complex<f64>>;

    /// The step produced by the completely positive measurement map of
    /// Rouchon and Ralph <https://doi.org/10.1103/PhysRevA.91.012118>,
    /// given the noise increments of the step
    fn get_positive_map_step(
        &self,
        state: &Array1<Complex<f64>>,
        t: f64,
        dt: f64,
        dw: &[f64],
    ) -> Array1<Complex<f64>>;

    /// `<c_j + c_j^\dagger>` for each incoherent channel
    fn measured_expectations(&self, state: &Array1<Complex<f64>>, t: f64) -> Vec<f64>;

    /// The expectation of an observable in the (unnormalized) state
    fn expect(
        &self,
        operator: &Array2<Complex<f64>>,
        state: &Array1<Complex<f64>>,
    ) -> Complex<f64>;

    /// The norm of the state, `||\psi||` or `tr \rho`
    fn norm(&self, state: &Array1<Complex<f64>>) -> f64;

    /// A size of the state which is at most one for a physical state, and which
    /// grows without bound as a trajectory diverges
    #[inline]
    fn magnitude(&self, state: &Array1<Complex<f64>>) -> f64 {
        self.norm(state)
    }

    #[inline]
    fn normalized(&self, state: &Array1<Complex<f64>>) -> Array1<Complex<f64>> {
        state
            / Complex {
                re: self.norm(state),
                im: 0.0,
            }
    }

    fn to_quantum_state(&self, state: &Array1<Complex<f64>>) -> QuantumState;
}

/// Split the stochastic operators into measured channels.
///
/// Heterodyne detection measures two orthogonal quadratures of each operator,
/// `c / \sqrt{2}` and `-i c / \sqrt{2}`.
#[must_use]
pub fn expand_channels(
    stochastic: &[TimeDependentOperator],
    detection: Detection,
) -> Vec<TimeDependentOperator> {
    match detection {
        Detection::Homodyne => stochastic.to_vec(),
        Detection::Heterodyne => {
            let scale = std::f64::consts::FRAC_1_SQRT_2;
            stochastic
                .iter()
                .flat_map(|c| {
                    [
                        c.scaled(Complex { re: scale, im: 0.0 }),
                        c.scaled(Complex { re: 0.0, im: -scale }),
                    ]
                })
                .collect()
        }
    }
}

/// An operator `c` at a fixed time, with `c^\dagger` and `c^\dagger c`
#[derive(Clone)]
pub(crate) struct ChannelOperators {
    pub operator: Array2<Complex<f64>>,
    pub adjoint: Array2<Complex<f64>>,
    pub adjoint_product: Array2<Complex<f64>>,
}

impl ChannelOperators {
    fn new(operator: Array2<Complex<f64>>) -> Self {
        let adjoint = dagger(&operator);
        let adjoint_product = adjoint.dot(&operator);
        Self {
            operator,
            adjoint,
            adjoint_product,
        }
    }
}

/// All operators of a system at a fixed time
#[derive(Clone)]
pub(crate) struct OperatorSnapshot {
    pub hamiltonian: Array2<Complex<f64>>,
    pub collapse: Vec<ChannelOperators>,
    pub stochastic: Vec<ChannelOperators>,
}

impl OperatorSnapshot {
    /// `-i H - 1/2 \sum_c c^\dagger c` over all collapse and stochastic channels
    pub fn effective_hamiltonian(&self) -> Array2<Complex<f64>> {
        let mut out = &self.hamiltonian * Complex { re: 0.0, im: -1.0 };
        for c in self.collapse.iter().chain(&self.stochastic) {
            out -= &(&c.adjoint_product * 0.5);
        }
        out
    }
}

/// The operators of a system, with their parameters bound
pub(crate) struct SystemOperators {
    hamiltonian: BoundOperator,
    collapse: Vec<BoundOperator>,
    stochastic: Vec<BoundOperator>,
    constant: Option<OperatorSnapshot>,
}

impl SystemOperators {
    pub fn new(
        hamiltonian: &TimeDependentOperator,
        collapse: &[TimeDependentOperator],
        stochastic: &[TimeDependentOperator],
        parameters: &Parameters,
    ) -> Self {
        let mut out = Self {
            hamiltonian: hamiltonian.bind(parameters),
            collapse: collapse.iter().map(|c| c.bind(parameters)).collect(),
            stochastic: stochastic.iter().map(|c| c.bind(parameters)).collect(),
            constant: None,
        };
        if !out.is_time_dependent() {
            out.constant = Some(out.evaluate(0.0));
        }
        out
    }

    pub fn is_time_dependent(&self) -> bool {
        !(self.hamiltonian.is_constant()
            && self.collapse.iter().all(BoundOperator::is_constant)
            && self.stochastic.iter().all(BoundOperator::is_constant))
    }

    pub fn n_stochastic(&self) -> usize {
        self.stochastic.len()
    }

    fn evaluate(&self, t: f64) -> OperatorSnapshot {
        OperatorSnapshot {
            hamiltonian: self.hamiltonian.at(t),
            collapse: self
                .collapse
                .iter()
                .map(|c| ChannelOperators::new(c.at(t)))
                .collect(),
            stochastic: self
                .stochastic
                .iter()
                .map(|c| ChannelOperators::new(c.at(t)))
                .collect(),
        }
    }

    pub fn at(&self, t: f64) -> Cow<'_, OperatorSnapshot> {
        match &self.constant {
            Some(snapshot) => Cow::Borrowed(snapshot),
            None => Cow::Owned(self.evaluate(t)),
        }
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use num_complex::Complex;

    use super::expand_channels;
    use crate::{
        operator::{destroy, Parameters, TimeDependentOperator},
        problem::Detection,
    };

    #[test]
    fn test_heterodyne_doubles_channels() {
        let sc_ops = vec![
            TimeDependentOperator::constant(destroy(3)),
            TimeDependentOperator::constant(destroy(3).dot(&destroy(3))),
        ];
        assert_eq!(expand_channels(&sc_ops, Detection::Homodyne).len(), 2);

        let expanded = expand_channels(&sc_ops, Detection::Heterodyne);
        assert_eq!(expanded.len(), 4);

        let parameters = Parameters::new();
        let in_phase = expanded[0].evaluate(0.0, &parameters);
        let quadrature = expanded[1].evaluate(0.0, &parameters);
        assert_relative_eq!(in_phase[[0, 1]].re, std::f64::consts::FRAC_1_SQRT_2);
        assert_relative_eq!(quadrature[[0, 1]].im, -std::f64::consts::FRAC_1_SQRT_2);

        // c_x^\dagger c_x + c_y^\dagger c_y = c^\dagger c
        let sum = in_phase.t().mapv(|z| z.conj()).dot(&in_phase)
            + quadrature.t().mapv(|z| z.conj()).dot(&quadrature);
        assert_relative_eq!(sum[[1, 1]].re, 1.0, epsilon = 1e-12);
        assert_eq!(sum[[0, 0]], Complex::default());
    }
}
