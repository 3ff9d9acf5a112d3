use ndarray::{Array1, Array2};
use ndarray_linalg::Norm;
use num_complex::Complex;

use crate::{
    operator::{Parameters, TimeDependentOperator},
    result::QuantumState,
    system::{SDEOperators, SDEStep, SDESystem, SystemOperators},
};

#[inline]
pub(crate) fn inner_product(bra: &Array1<Complex<f64>>, ket: &Array1<Complex<f64>>) -> Complex<f64> {
    bra.map(Complex::conj).dot(ket)
}

/// `<L + L^\dagger> = 2 Re <\psi|L|\psi> / <\psi|\psi>`
#[inline]
fn measured_expectation(state: &Array1<Complex<f64>>, l_state: &Array1<Complex<f64>>) -> f64 {
    2.0 * inner_product(state, l_state).re / inner_product(state, state).re
}

#[derive(Clone)]
pub struct SSEParts<'a> {
    state: &'a Array1<Complex<f64>>,
    /// H |\psi>
    hamiltonian: Array1<Complex<f64>>,
    /// Parts from a the stochastic terms
    stochastic: Vec<SSEStochasticPart>,
}

#[derive(Clone)]
pub struct SSEStochasticPart {
    /// <L + L^\dagger>
    expectation: f64,
    /// L |\psi>
    l_state: Array1<Complex<f64>>,
    /// L^\dagger L |\psi>
    l_dagger_l_state: Array1<Complex<f64>>,
}

/// Represents The Stochastic Shrodinger SDE System, for a homodyne
/// measurement of each of the stochastic operators `L_j`
///
/// ```latex
/// X_t = X_{t0} + \int_{t0}^{t} a(s,X_s) ds + \sum_1^m \int_{t0}^{t} b^j(s, X_s) dW_s^j
/// ```
///
/// The coherent term
/// ```latex
/// a(s,X) = -i H |X> - 1/2 \sum_j (L_j^\dagger L_j - e_j L_j + e_j^2 / 4) |X>
/// ```
///
/// The incoherent term
/// ```latex
/// b^j(s, X) = (L_j - e_j / 2)|X> where e_j = <L_j + L_j^\dagger>
/// ```
pub struct SSESystem {
    operators: SystemOperators,
}

impl SSESystem {
    /// Build the system from already expanded measurement channels
    #[must_use]
    pub fn new(
        hamiltonian: &TimeDependentOperator,
        stochastic: &[TimeDependentOperator],
        parameters: &Parameters,
    ) -> Self {
        Self {
            operators: SystemOperators::new(hamiltonian, &[], stochastic, parameters),
        }
    }
}

impl SDESystem for SSESystem {
    type Parts<'a> = SSEParts<'a>;

    #[inline]
    fn get_parts<'a>(&'a self, state: &'a Array1<Complex<f64>>, t: f64) -> Self::Parts<'a> {
        let snapshot = self.operators.at(t);
        SSEParts {
            state,
            hamiltonian: snapshot.hamiltonian.dot(state),
            stochastic: snapshot
                .stochastic
                .iter()
                .map(|c| {
                    let l_state = c.operator.dot(state);
                    SSEStochasticPart {
                        expectation: measured_expectation(state, &l_state),
                        l_dagger_l_state: c.adjoint.dot(&l_state),
                        l_state,
                    }
                })
                .collect(),
        }
    }

    #[inline]
    fn get_step_from_parts(parts: &Self::Parts<'_>, step: &SDEStep) -> Array1<Complex<f64>> {
        debug_assert_eq!(parts.stochastic.len(), step.incoherent.len());
        let mut diagonal = 0.0;
        let mut out = &parts.hamiltonian
            * Complex {
                re: 0.0,
                im: -step.coherent,
            };

        for (part, &dw) in parts.stochastic.iter().zip(step.incoherent) {
            // Terms involving the collapse operator contribute to both the coherent and incoherent part
            // (dw + dt e / 2) L |\psi> - (dt / 2) L^\dagger L |\psi>
            out += &(&part.l_state * (dw + 0.5 * step.coherent * part.expectation));
            out -= &(&part.l_dagger_l_state * (0.5 * step.coherent));

            // - (dt e^2 / 8 + dw e / 2) |\psi>
            diagonal -= 0.125 * step.coherent * part.expectation.powi(2) + 0.5 * dw * part.expectation;
        }

        out += &(parts.state * diagonal);
        out
    }

    #[inline]
    fn get_coherent_step(
        &self,
        step: f64,
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Array1<Complex<f64>> {
        let parts = self.get_parts(state, t);
        Self::get_step_from_parts(
            &parts,
            &SDEStep {
                coherent: step,
                incoherent: &vec![0.0; parts.stochastic.len()],
            },
        )
    }

    #[inline]
    fn get_incoherent_step(
        &self,
        idx: usize,
        step: f64,
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Array1<Complex<f64>> {
        let snapshot = self.operators.at(t);
        let l_state = snapshot.stochastic[idx].operator.dot(state);
        let expectation = measured_expectation(state, &l_state);
        // (L - e / 2) * step |\psi>
        (l_state - &(state * (0.5 * expectation))) * step
    }

    fn get_operators_from_parts(parts: &Self::Parts<'_>) -> SDEOperators {
        SDEOperators {
            coherent: Self::get_step_from_parts(
                parts,
                &SDEStep {
                    coherent: 1.0,
                    incoherent: &vec![0.0; parts.stochastic.len()],
                },
            ),
            incoherent: parts
                .stochastic
                .iter()
                .map(|part| &part.l_state - &(parts.state * (0.5 * part.expectation)))
                .collect(),
        }
    }

    #[inline]
    fn n_incoherent(&self) -> usize {
        self.operators.n_stochastic()
    }

    #[inline]
    fn is_time_dependent(&self) -> bool {
        self.operators.is_time_dependent()
    }

    /// `-i H - 1/2 \sum_j L_j^\dagger L_j`
    fn linear_coherent(&self, t: f64) -> Array2<Complex<f64>> {
        self.operators.at(t).effective_hamiltonian()
    }

    /// ```latex
    /// M = 1 + (-i H - 1/2 \sum_j L_j^\dagger L_j) dt + \sum_j L_j dY_j
    ///     + 1/2 \sum_{jk} L_j L_k (dY_j dY_k - \delta_{jk} dt)
    /// ```
    /// where `dY_j = e_j dt + dW_j`, and the state `M|\psi>` is renormalized
    fn get_positive_map_step(
        &self,
        state: &Array1<Complex<f64>>,
        t: f64,
        dt: f64,
        dw: &[f64],
    ) -> Array1<Complex<f64>> {
        let snapshot = self.operators.at(t);
        let l_states = snapshot
            .stochastic
            .iter()
            .map(|c| c.operator.dot(state))
            .collect::<Vec<_>>();
        let dy = l_states
            .iter()
            .zip(dw)
            .map(|(l_state, dw)| measured_expectation(state, l_state) * dt + dw)
            .collect::<Vec<_>>();

        let mut next = state + &(snapshot.effective_hamiltonian().dot(state) * dt);
        for (j, c_j) in snapshot.stochastic.iter().enumerate() {
            next += &(&l_states[j] * dy[j]);
            for (k, l_state) in l_states.iter().enumerate() {
                let ito = if j == k { dt } else { 0.0 };
                next += &(c_j.operator.dot(l_state) * (0.5 * (dy[j] * dy[k] - ito)));
            }
        }

        let norm = next.norm_l2();
        next * (1.0 / norm) - state
    }

    fn measured_expectations(&self, state: &Array1<Complex<f64>>, t: f64) -> Vec<f64> {
        self.operators
            .at(t)
            .stochastic
            .iter()
            .map(|c| measured_expectation(state, &c.operator.dot(state)))
            .collect()
    }

    /// `<\psi|O|\psi>`, without normalizing the state
    fn expect(
        &self,
        operator: &Array2<Complex<f64>>,
        state: &Array1<Complex<f64>>,
    ) -> Complex<f64> {
        inner_product(state, &operator.dot(state))
    }

    fn norm(&self, state: &Array1<Complex<f64>>) -> f64 {
        state.norm_l2()
    }

    fn to_quantum_state(&self, state: &Array1<Complex<f64>>) -> QuantumState {
        QuantumState::Ket(state.clone())
    }
}
