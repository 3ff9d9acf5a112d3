use ndarray::{Array1, Array2};
use ndarray_linalg::Norm;
use num_complex::Complex;

use crate::{
    linalg::{sandwich, trace_of_product, unvectorize, vectorize, vectorized_trace},
    operator::{dagger, identity, Parameters, TimeDependentOperator},
    result::QuantumState,
    system::{OperatorSnapshot, SDEOperators, SDEStep, SDESystem, SystemOperators},
};

pub struct SMEParts<'a> {
    state: &'a Array1<Complex<f64>>,
    rho: Array2<Complex<f64>>,
    /// L(\rho)
    liouvillian: Array2<Complex<f64>>,
    stochastic: Vec<SMEStochasticPart>,
}

pub struct SMEStochasticPart {
    /// <L + L^\dagger>
    expectation: f64,
    /// L \rho + \rho L^\dagger
    measured: Array2<Complex<f64>>,
}

impl SMEStochasticPart {
    /// `L \rho + \rho L^\dagger - <L + L^\dagger> \rho`
    fn incoherent(&self, rho: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
        &self.measured - &(rho * self.expectation)
    }
}

/// Represents the Stochastic Master Equation, acting on the
/// row-major vectorisation of the density matrix
///
/// The coherent term
/// ```latex
/// a(s,\rho) = -i[H, \rho] + \sum_{c} (c \rho c^\dagger - 1/2 \{c^\dagger c, \rho\})
/// ```
/// where the sum runs over both the collapse and the stochastic operators.
///
/// The incoherent term
/// ```latex
/// b^j(s, \rho) = L_j \rho + \rho L_j^\dagger - <L_j + L_j^\dagger> \rho
/// ```
pub struct SMESystem {
    operators: SystemOperators,
    dimension: usize,
    /// The superoperator of the coherent term, when it does not depend on time
    liouvillian: Option<Array2<Complex<f64>>>,
}

fn build_liouvillian(snapshot: &OperatorSnapshot, dimension: usize) -> Array2<Complex<f64>> {
    let effective = snapshot.effective_hamiltonian();
    let eye = identity(dimension);
    let mut out = sandwich(&effective, &eye) + sandwich(&eye, &dagger(&effective));
    for c in snapshot.collapse.iter().chain(&snapshot.stochastic) {
        out += &sandwich(&c.operator, &c.adjoint);
    }
    out
}

fn measured_expectation(measured: &Array2<Complex<f64>>, rho: &Array2<Complex<f64>>) -> f64 {
    let trace = (0..rho.nrows()).map(|i| measured[[i, i]]).sum::<Complex<f64>>();
    trace.re / (0..rho.nrows()).map(|i| rho[[i, i]].re).sum::<f64>()
}

impl SMESystem {
    /// Build the system from already expanded measurement channels
    #[must_use]
    pub fn new(
        hamiltonian: &TimeDependentOperator,
        collapse: &[TimeDependentOperator],
        stochastic: &[TimeDependentOperator],
        parameters: &Parameters,
    ) -> Self {
        let operators = SystemOperators::new(hamiltonian, collapse, stochastic, parameters);
        let dimension = hamiltonian.dimension();
        let liouvillian = if operators.is_time_dependent() {
            None
        } else {
            Some(build_liouvillian(&operators.at(0.0), dimension))
        };
        Self {
            operators,
            dimension,
            liouvillian,
        }
    }

    fn stochastic_part(
        operator: &Array2<Complex<f64>>,
        adjoint: &Array2<Complex<f64>>,
        rho: &Array2<Complex<f64>>,
    ) -> SMEStochasticPart {
        let measured = operator.dot(rho) + rho.dot(adjoint);
        SMEStochasticPart {
            expectation: measured_expectation(&measured, rho),
            measured,
        }
    }
}

impl SDESystem for SMESystem {
    type Parts<'a> = SMEParts<'a>;

    fn get_parts<'a>(&'a self, state: &'a Array1<Complex<f64>>, t: f64) -> Self::Parts<'a> {
        let snapshot = self.operators.at(t);
        let rho = unvectorize(state, self.dimension);

        // A \rho + \rho A^\dagger + \sum_c c \rho c^\dagger, with A = -iH - 1/2 \sum_c c^\dagger c
        let effective = snapshot.effective_hamiltonian();
        let mut liouvillian = effective.dot(&rho) + rho.dot(&dagger(&effective));
        for c in snapshot.collapse.iter().chain(&snapshot.stochastic) {
            liouvillian += &c.operator.dot(&rho).dot(&c.adjoint);
        }

        let stochastic = snapshot
            .stochastic
            .iter()
            .map(|c| Self::stochastic_part(&c.operator, &c.adjoint, &rho))
            .collect();

        SMEParts {
            state,
            rho,
            liouvillian,
            stochastic,
        }
    }

    fn get_step_from_parts(parts: &Self::Parts<'_>, step: &SDEStep) -> Array1<Complex<f64>> {
        debug_assert_eq!(parts.stochastic.len(), step.incoherent.len());
        debug_assert_eq!(parts.state.len(), parts.rho.len());
        let mut out = &parts.liouvillian * step.coherent;
        for (part, &dw) in parts.stochastic.iter().zip(step.incoherent) {
            out += &(part.incoherent(&parts.rho) * dw);
        }
        vectorize(&out)
    }

    fn get_coherent_step(
        &self,
        step: f64,
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Array1<Complex<f64>> {
        match &self.liouvillian {
            Some(liouvillian) => liouvillian.dot(state) * step,
            None => build_liouvillian(&self.operators.at(t), self.dimension).dot(state) * step,
        }
    }

    fn get_incoherent_step(
        &self,
        idx: usize,
        step: f64,
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Array1<Complex<f64>> {
        let snapshot = self.operators.at(t);
        let channel = &snapshot.stochastic[idx];
        let rho = unvectorize(state, self.dimension);
        let part = Self::stochastic_part(&channel.operator, &channel.adjoint, &rho);
        vectorize(&(part.incoherent(&rho) * step))
    }

    fn get_operators_from_parts(parts: &Self::Parts<'_>) -> SDEOperators {
        SDEOperators {
            coherent: vectorize(&parts.liouvillian),
            incoherent: parts
                .stochastic
                .iter()
                .map(|part| vectorize(&part.incoherent(&parts.rho)))
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

    /// The master equation is linear, so this is the full coherent superoperator
    fn linear_coherent(&self, t: f64) -> Array2<Complex<f64>> {
        match &self.liouvillian {
            Some(liouvillian) => liouvillian.clone(),
            None => build_liouvillian(&self.operators.at(t), self.dimension),
        }
    }

    /// ```latex
    /// \rho' = M \rho M^\dagger + \sum_{c} c \rho c^\dagger dt
    /// ```
    /// with `M` the measurement operator of the stochastic channels and the
    /// sum over the collapse operators only. `\rho'` is renormalized.
    fn get_positive_map_step(
        &self,
        state: &Array1<Complex<f64>>,
        t: f64,
        dt: f64,
        dw: &[f64],
    ) -> Array1<Complex<f64>> {
        let snapshot = self.operators.at(t);
        let rho = unvectorize(state, self.dimension);
        let dy = snapshot
            .stochastic
            .iter()
            .zip(dw)
            .map(|(c, dw)| {
                let measured = c.operator.dot(&rho) + rho.dot(&c.adjoint);
                measured_expectation(&measured, &rho) * dt + dw
            })
            .collect::<Vec<_>>();

        let mut m = identity(self.dimension) + &(snapshot.effective_hamiltonian() * dt);
        for (j, c_j) in snapshot.stochastic.iter().enumerate() {
            m += &(&c_j.operator * dy[j]);
            for (k, c_k) in snapshot.stochastic.iter().enumerate() {
                let ito = if j == k { dt } else { 0.0 };
                m += &(c_j.operator.dot(&c_k.operator) * (0.5 * (dy[j] * dy[k] - ito)));
            }
        }

        let mut next = m.dot(&rho).dot(&dagger(&m));
        for c in &snapshot.collapse {
            next += &(c.operator.dot(&rho).dot(&c.adjoint) * dt);
        }
        let trace = (0..self.dimension).map(|i| next[[i, i]].re).sum::<f64>();
        vectorize(&(next * (1.0 / trace))) - state
    }

    fn measured_expectations(&self, state: &Array1<Complex<f64>>, t: f64) -> Vec<f64> {
        let rho = unvectorize(state, self.dimension);
        self.operators
            .at(t)
            .stochastic
            .iter()
            .map(|c| Self::stochastic_part(&c.operator, &c.adjoint, &rho).expectation)
            .collect()
    }

    /// `tr(O \rho)`, without normalizing the state
    fn expect(
        &self,
        operator: &Array2<Complex<f64>>,
        state: &Array1<Complex<f64>>,
    ) -> Complex<f64> {
        trace_of_product(operator, &unvectorize(state, self.dimension))
    }

    /// `Re tr \rho`
    fn norm(&self, state: &Array1<Complex<f64>>) -> f64 {
        vectorized_trace(state, self.dimension).re
    }

    /// `||\rho||_F = \sqrt{tr \rho^2}`, since the trace is kept at one even as `\rho` diverges
    fn magnitude(&self, state: &Array1<Complex<f64>>) -> f64 {
        state.norm_l2()
    }

    fn to_quantum_state(&self, state: &Array1<Complex<f64>>) -> QuantumState {
        QuantumState::Operator(unvectorize(state, self.dimension))
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use ndarray::Array1;
    use num_complex::Complex;

    use super::SMESystem;
    use crate::{
        linalg::vectorize,
        operator::{
            coherent, dagger, destroy, ket_to_density_matrix, number, OperatorTerm, Parameters,
            TimeDependentOperator,
        },
        system::{SDEStep, SDESystem},
    };

    fn get_state() -> Array1<Complex<f64>> {
        vectorize(&ket_to_density_matrix(&coherent(
            4,
            Complex { re: 0.5, im: 0.2 },
        )))
    }

    fn assert_close(a: &Array1<Complex<f64>>, b: &Array1<Complex<f64>>) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
        }
    }

    fn get_system(time_dependent: bool) -> SMESystem {
        let hamiltonian = if time_dependent {
            TimeDependentOperator::constant(number(4))
                .add_term(OperatorTerm::coefficient(
                    destroy(4) + &dagger(&destroy(4)),
                    |t, p| Complex {
                        re: p.get_or("w", 0.0) * t,
                        im: 0.0,
                    },
                ))
                .unwrap()
        } else {
            TimeDependentOperator::constant(number(4))
        };
        SMESystem::new(
            &hamiltonian,
            &[TimeDependentOperator::constant(destroy(4))],
            &[TimeDependentOperator::constant(&destroy(4) * 0.5)],
            &Parameters::from([("w", 2.0)]),
        )
    }

    #[test]
    fn test_liouvillian_matches_direct_drift() {
        for time_dependent in [false, true] {
            let system = get_system(time_dependent);
            let state = get_state();
            let direct = system.get_coherent_step(1.0, &state, 0.3);
            let from_parts = system.get_operators(&state, 0.3).coherent;
            let superoperator = system.linear_coherent(0.3).dot(&state);

            assert_close(&direct, &from_parts);
            assert_close(&direct, &superoperator);
        }
    }

    #[test]
    fn test_steps_preserve_trace() {
        let system = get_system(true);
        let state = get_state();

        let step = system.get_step(
            &SDEStep {
                coherent: 0.01,
                incoherent: &[0.07],
            },
            &state,
            0.1,
        );
        assert_relative_eq!(system.norm(&(&state + &step)), 1.0, epsilon = 1e-12);

        let rouchon = system.get_positive_map_step(&state, 0.1, 0.01, &[0.07]);
        assert_relative_eq!(system.norm(&(&state + &rouchon)), 1.0, epsilon = 1e-12);

        // A pure state has unit purity
        assert_relative_eq!(system.magnitude(&state), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_measured_expectation() {
        let system = get_system(false);
        let state = get_state();
        // <0.5 (a + a^\dagger)> ~ Re(alpha) for a lightly truncated coherent state
        let expectations = system.measured_expectations(&state, 0.0);
        assert_eq!(expectations.len(), 1);
        assert_relative_eq!(expectations[0], 0.5, epsilon = 1e-2);

        let n = system.expect(&number(4), &state);
        assert_relative_eq!(n.re, 0.29, epsilon = 1e-2);
        assert_relative_eq!(n.im, 0.0, epsilon = 1e-12);
    }
}
