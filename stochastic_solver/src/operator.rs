//! Dense operators, possibly carrying a time dependence
//!
//! A time dependent operator is written as a sum of terms
//! ```latex
//! O(t) = \sum_i f_i(t, p) O_i
//! ```
//! where each `f_i` is either one (a constant term) or a user supplied
//! coefficient evaluated with the problem's named parameters `p`.

use std::{collections::BTreeMap, fmt, sync::Arc};

use ndarray::{Array1, Array2};
use ndarray_linalg::Norm;
use num_complex::Complex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

/// Named parameters consumed by time dependent coefficients
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Parameters(BTreeMap<String, f64>);

impl Parameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Get a parameter, falling back to `default` when it is not set
    #[must_use]
    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.0.insert(name.into(), value)
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }
}

impl<S: Into<String>, const N: usize> From<[(S, f64); N]> for Parameters {
    fn from(value: [(S, f64); N]) -> Self {
        Self(value.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

pub type CoefficientFn = dyn Fn(f64, &Parameters) -> Complex<f64> + Send + Sync;

/// A single term of a time dependent operator
#[derive(Clone)]
pub enum OperatorTerm {
    Constant(Array2<Complex<f64>>),
    Coefficient(Array2<Complex<f64>>, Arc<CoefficientFn>),
}

impl OperatorTerm {
    #[must_use]
    pub fn coefficient<F>(operator: Array2<Complex<f64>>, coefficient: F) -> Self
    where
        F: Fn(f64, &Parameters) -> Complex<f64> + Send + Sync + 'static,
    {
        Self::Coefficient(operator, Arc::new(coefficient))
    }

    fn operator(&self) -> &Array2<Complex<f64>> {
        match self {
            OperatorTerm::Constant(o) | OperatorTerm::Coefficient(o, _) => o,
        }
    }

    fn scaled(&self, factor: Complex<f64>) -> Self {
        match self {
            OperatorTerm::Constant(o) => OperatorTerm::Constant(o * factor),
            OperatorTerm::Coefficient(o, f) => OperatorTerm::Coefficient(o * factor, f.clone()),
        }
    }
}

impl fmt::Debug for OperatorTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorTerm::Constant(o) => f.debug_tuple("Constant").field(&o.shape()).finish(),
            OperatorTerm::Coefficient(o, _) => {
                f.debug_tuple("Coefficient").field(&o.shape()).finish()
            }
        }
    }
}

/// An operator `O(t) = \sum_i f_i(t, p) O_i`
#[derive(Clone, Debug)]
pub struct TimeDependentOperator {
    terms: Vec<OperatorTerm>,
    dimension: usize,
}

impl TimeDependentOperator {
    /// Build an operator from its terms.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpecification` if there are no terms, or
    /// if the terms are not all square matrices of the same size.
    pub fn from_terms(terms: Vec<OperatorTerm>) -> Result<Self> {
        let Some(first) = terms.first() else {
            return Err(SolverError::InvalidSpecification(
                "a time dependent operator needs at least one term".to_owned(),
            ));
        };
        let out = Self {
            dimension: first.operator().nrows(),
            terms,
        };
        out.validate()?;
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns `InvalidSpecification` if the terms are not all square matrices of the same size.
    pub fn validate(&self) -> Result<()> {
        let dimension = self.dimension;
        for term in &self.terms {
            let shape = term.operator().shape();
            if shape != [dimension, dimension] {
                return Err(SolverError::InvalidSpecification(format!(
                    "operator term has shape {shape:?}, expected [{dimension}, {dimension}]"
                )));
            }
        }
        Ok(())
    }

    /// A single constant term, checked by [`TimeDependentOperator::validate`]
    #[must_use]
    pub fn constant(operator: Array2<Complex<f64>>) -> Self {
        Self {
            dimension: operator.nrows(),
            terms: vec![OperatorTerm::Constant(operator)],
        }
    }

    #[must_use]
    pub fn with_coefficient<F>(operator: Array2<Complex<f64>>, coefficient: F) -> Self
    where
        F: Fn(f64, &Parameters) -> Complex<f64> + Send + Sync + 'static,
    {
        Self {
            dimension: operator.nrows(),
            terms: vec![OperatorTerm::coefficient(operator, coefficient)],
        }
    }

    /// Add a further term to the operator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpecification` if the term has a different size.
    pub fn add_term(mut self, term: OperatorTerm) -> Result<Self> {
        if term.operator().shape() != [self.dimension, self.dimension] {
            return Err(SolverError::InvalidSpecification(format!(
                "operator term has shape {:?}, expected [{}, {}]",
                term.operator().shape(),
                self.dimension,
                self.dimension
            )));
        }
        self.terms.push(term);
        Ok(self)
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn terms(&self) -> &[OperatorTerm] {
        &self.terms
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.terms
            .iter()
            .all(|t| matches!(t, OperatorTerm::Constant(_)))
    }

    /// Multiply every term by a constant factor
    #[must_use]
    pub fn scaled(&self, factor: Complex<f64>) -> Self {
        Self {
            terms: self.terms.iter().map(|t| t.scaled(factor)).collect(),
            dimension: self.dimension,
        }
    }

    /// Evaluate `O(t)` with the given parameters
    #[must_use]
    pub fn evaluate(&self, t: f64, parameters: &Parameters) -> Array2<Complex<f64>> {
        let mut out = Array2::zeros([self.dimension, self.dimension]);
        for term in &self.terms {
            match term {
                OperatorTerm::Constant(o) => out += o,
                OperatorTerm::Coefficient(o, f) => out += &(o * f(t, parameters)),
            }
        }
        out
    }

    /// Fix the parameters, folding all constant terms together
    #[must_use]
    pub fn bind(&self, parameters: &Parameters) -> BoundOperator {
        let mut constant = Array2::zeros([self.dimension, self.dimension]);
        let mut varying = Vec::new();
        for term in &self.terms {
            match term {
                OperatorTerm::Constant(o) => constant += o,
                OperatorTerm::Coefficient(o, f) => varying.push((o.clone(), f.clone())),
            }
        }
        BoundOperator {
            constant,
            varying,
            parameters: parameters.clone(),
        }
    }
}

impl From<Array2<Complex<f64>>> for TimeDependentOperator {
    fn from(value: Array2<Complex<f64>>) -> Self {
        Self::constant(value)
    }
}

/// A time dependent operator with its parameters fixed, `O(t)`
#[derive(Clone)]
pub struct BoundOperator {
    constant: Array2<Complex<f64>>,
    varying: Vec<(Array2<Complex<f64>>, Arc<CoefficientFn>)>,
    parameters: Parameters,
}

impl BoundOperator {
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.varying.is_empty()
    }

    #[must_use]
    pub fn at(&self, t: f64) -> Array2<Complex<f64>> {
        let mut out = self.constant.clone();
        for (operator, coefficient) in &self.varying {
            out += &(operator * coefficient(t, &self.parameters));
        }
        out
    }
}

/// The conjugate transpose `O^\dagger`
#[must_use]
pub fn dagger(operator: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    operator.t().mapv(|z| z.conj())
}

#[must_use]
pub fn identity(n: usize) -> Array2<Complex<f64>> {
    Array2::eye(n)
}

/// The truncated annihilation operator `a` on n levels
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn destroy(n: usize) -> Array2<Complex<f64>> {
    let mut out = Array2::zeros([n, n]);
    for i in 1..n {
        out[[i - 1, i]] = Complex {
            re: (i as f64).sqrt(),
            im: 0.0,
        };
    }
    out
}

/// The number operator `a^\dagger a` on n levels
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn number(n: usize) -> Array2<Complex<f64>> {
    Array2::from_diag(&Array1::from_iter((0..n).map(|i| Complex {
        re: i as f64,
        im: 0.0,
    })))
}

/// The fock state `|i>` on n levels
///
/// # Panics
///
/// Will panic if i >= n
#[must_use]
pub fn basis(n: usize, i: usize) -> Array1<Complex<f64>> {
    assert!(i < n, "basis index {i} out of range for {n} levels");
    let mut out = Array1::zeros([n]);
    out[i] = Complex { re: 1.0, im: 0.0 };
    out
}

/// The coherent state `|\alpha>` truncated to n levels and renormalized
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coherent(n: usize, alpha: Complex<f64>) -> Array1<Complex<f64>> {
    let mut out = Array1::zeros([n]);
    let mut amplitude = Complex { re: 1.0, im: 0.0 };
    for k in 0..n {
        if k > 0 {
            amplitude = amplitude * alpha / (k as f64).sqrt();
        }
        out[k] = amplitude;
    }
    let norm = out.norm_l2();
    out.mapv_inplace(|z| z / norm);
    out
}

/// The projector `|\psi><\psi|`
#[must_use]
pub fn ket_to_density_matrix(state: &Array1<Complex<f64>>) -> Array2<Complex<f64>> {
    let n = state.len();
    Array2::from_shape_fn([n, n], |(i, j)| state[i] * state[j].conj())
}
