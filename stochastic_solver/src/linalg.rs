//! Small dense helpers used by the density matrix system.
//!
//! Density matrices are stored as their row-major vectorisation, so that
//! ```latex
//! vec(A \rho B) = (A \otimes B^T) vec(\rho)
//! ```

use ndarray::{linalg::kron, Array1, Array2};
use num_complex::Complex;

/// Row-major vectorisation of a matrix
#[must_use]
pub fn vectorize(matrix: &Array2<Complex<f64>>) -> Array1<Complex<f64>> {
    matrix.iter().copied().collect()
}

/// Inverse of [`vectorize`] for an n x n matrix
#[must_use]
pub fn unvectorize(state: &Array1<Complex<f64>>, n: usize) -> Array2<Complex<f64>> {
    debug_assert_eq!(state.len(), n * n);
    Array2::from_shape_fn([n, n], |(i, j)| state[i * n + j])
}

/// Trace of the matrix whose row-major vectorisation is `state`
#[must_use]
pub fn vectorized_trace(state: &Array1<Complex<f64>>, n: usize) -> Complex<f64> {
    (0..n).map(|i| state[i * n + i]).sum()
}

/// `tr(A B)`, without forming the product
#[must_use]
pub fn trace_of_product(a: &Array2<Complex<f64>>, b: &Array2<Complex<f64>>) -> Complex<f64> {
    let mut out = Complex::default();
    for ((i, j), a_ij) in a.indexed_iter() {
        out += a_ij * b[[j, i]];
    }
    out
}

/// Superoperator for `\rho \to A \rho B`
#[must_use]
pub fn sandwich(a: &Array2<Complex<f64>>, b: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    kron(a, &b.t())
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use num_complex::Complex;

    use super::{sandwich, unvectorize, vectorize};
    use crate::operator::{destroy, number};

    fn c(re: f64, im: f64) -> Complex<f64> {
        Complex { re, im }
    }

    #[test]
    fn test_sandwich_matches_matrix_product() {
        let a = destroy(3);
        let b = number(3) + &destroy(3).t();
        let rho = Array2::from_shape_fn([3, 3], |(i, j)| c(i as f64, j as f64 - 1.0));

        let expected = a.dot(&rho).dot(&b);
        let actual = unvectorize(&sandwich(&a, &b).dot(&vectorize(&rho)), 3);
        for (x, y) in expected.iter().zip(actual.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
        }
        assert_eq!(sandwich(&a, &b).shape(), &[9, 9]);
    }
}
