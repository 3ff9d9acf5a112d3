use ndarray::Array2;
use num_complex::Complex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SolverError},
    operator::{Parameters, TimeDependentOperator},
    result::QuantumState,
    system::expand_channels,
};

/// The measurement scheme applied to every stochastic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Detection {
    /// A single real measurement record per operator
    #[default]
    Homodyne,
    /// Two records per operator, for the in phase and quadrature components
    Heterodyne,
}

impl Detection {
    /// The number of measured channels for each stochastic operator
    #[must_use]
    pub fn channels_per_operator(self) -> usize {
        match self {
            Detection::Homodyne => 1,
            Detection::Heterodyne => 2,
        }
    }
}

/// A stochastic master (or schrodinger) equation to solve
#[derive(Clone, Debug)]
pub struct Problem {
    pub hamiltonian: TimeDependentOperator,
    /// Collapse operators which are not measured, they only enter the coherent term
    pub collapse: Vec<TimeDependentOperator>,
    /// Collapse operators which are continuously measured
    pub stochastic: Vec<TimeDependentOperator>,
    pub initial_state: QuantumState,
    pub times: Vec<f64>,
    pub observables: Vec<Array2<Complex<f64>>>,
    pub parameters: Parameters,
    pub detection: Detection,
}

impl Problem {
    #[must_use]
    pub fn new(
        hamiltonian: impl Into<TimeDependentOperator>,
        initial_state: impl Into<QuantumState>,
        times: Vec<f64>,
    ) -> Self {
        Self {
            hamiltonian: hamiltonian.into(),
            collapse: Vec::new(),
            stochastic: Vec::new(),
            initial_state: initial_state.into(),
            times,
            observables: Vec::new(),
            parameters: Parameters::new(),
            detection: Detection::default(),
        }
    }

    #[must_use]
    pub fn with_collapse(mut self, collapse: Vec<TimeDependentOperator>) -> Self {
        self.collapse = collapse;
        self
    }

    #[must_use]
    pub fn with_stochastic(mut self, stochastic: Vec<TimeDependentOperator>) -> Self {
        self.stochastic = stochastic;
        self
    }

    #[must_use]
    pub fn with_observables(mut self, observables: Vec<Array2<Complex<f64>>>) -> Self {
        self.observables = observables;
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_detection(mut self, detection: Detection) -> Self {
        self.detection = detection;
        self
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.hamiltonian.dimension()
    }

    /// The number of measured channels, after the heterodyne expansion
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.stochastic.len() * self.detection.channels_per_operator()
    }

    pub(crate) fn channels(&self) -> Vec<TimeDependentOperator> {
        expand_channels(&self.stochastic, self.detection)
    }

    /// `H(t)` must be hermitian at each requested time
    fn check_hermitian_hamiltonian(&self) -> Result<()> {
        for &t in &self.times {
            let hamiltonian = self.hamiltonian.evaluate(t, &self.parameters);
            let scale = hamiltonian.iter().map(|z| z.norm()).fold(1.0, f64::max);
            let hermitian = hamiltonian
                .indexed_iter()
                .all(|((i, j), h)| (h - hamiltonian[[j, i]].conj()).norm() <= 1e-10 * scale);
            if !hermitian {
                return Err(SolverError::InvalidSpecification(format!(
                    "hamiltonian is not hermitian at t = {t}"
                )));
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `InvalidSpecification` if the times are empty or not strictly increasing,
    /// if any operator or the initial state has the wrong dimension,
    /// if the hamiltonian is not hermitian at a requested time,
    /// or if the initial state has no norm
    pub fn validate(&self) -> Result<()> {
        let n = self.dimension();
        if self.times.is_empty() {
            return Err(SolverError::InvalidSpecification(
                "at least one time is required".to_owned(),
            ));
        }
        if self.times.iter().any(|t| !t.is_finite()) {
            return Err(SolverError::InvalidSpecification(
                "times must be finite".to_owned(),
            ));
        }
        if self.times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SolverError::InvalidSpecification(
                "times must be strictly increasing".to_owned(),
            ));
        }

        self.hamiltonian.validate()?;
        let operators = self
            .collapse
            .iter()
            .map(|c| ("collapse operator", c))
            .chain(self.stochastic.iter().map(|c| ("stochastic operator", c)));
        for (name, operator) in operators {
            operator.validate()?;
            if operator.dimension() != n {
                return Err(SolverError::InvalidSpecification(format!(
                    "{name} has dimension {}, expected {n}",
                    operator.dimension()
                )));
            }
        }
        self.check_hermitian_hamiltonian()?;
        for observable in &self.observables {
            if observable.shape() != [n, n] {
                return Err(SolverError::InvalidSpecification(format!(
                    "observable has shape {:?}, expected [{n}, {n}]",
                    observable.shape()
                )));
            }
        }

        let norm = match &self.initial_state {
            QuantumState::Ket(k) => k.iter().map(Complex::norm_sqr).sum::<f64>(),
            QuantumState::Operator(o) => {
                if !o.is_square() {
                    return Err(SolverError::InvalidSpecification(format!(
                        "initial density matrix has shape {:?}",
                        o.shape()
                    )));
                }
                o.diag().iter().map(|d| d.re).sum::<f64>()
            }
        };
        if self.initial_state.dimension() != n {
            return Err(SolverError::InvalidSpecification(format!(
                "initial state has dimension {}, expected {n}",
                self.initial_state.dimension()
            )));
        }
        if !(norm.is_finite() && norm > 0.0) {
            return Err(SolverError::InvalidSpecification(format!(
                "initial state has norm {norm}"
            )));
        }
        Ok(())
    }
}
