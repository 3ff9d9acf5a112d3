//! RK4 integrator for the deterministic master equation.
//!
//! Integrates `d\rho/dt = -i[H(t), \rho] + \sum_c D[c](\rho)`, the ensemble
//! average of the stochastic master equation. It is independent of the
//! stochastic systems, and is used to check them.

use ndarray::Array2;
use num_complex::Complex;

use crate::{
    error::{Result, SolverError},
    linalg::trace_of_product,
    operator::{dagger, BoundOperator, Parameters, TimeDependentOperator},
    problem::Problem,
    result::QuantumState,
};

/// `-i[H, \rho] + \sum_c (c \rho c^\dagger - 1/2 \{c^\dagger c, \rho\})`
fn lindblad_rhs(
    hamiltonian: &Array2<Complex<f64>>,
    collapse: &[Array2<Complex<f64>>],
    rho: &Array2<Complex<f64>>,
) -> Array2<Complex<f64>> {
    let commutator = hamiltonian.dot(rho) - rho.dot(hamiltonian);
    let mut out = commutator * Complex { re: 0.0, im: -1.0 };
    for c in collapse {
        let c_dagger = dagger(c);
        let c_dagger_c = c_dagger.dot(c);
        out += &c.dot(rho).dot(&c_dagger);
        out -= &((c_dagger_c.dot(rho) + rho.dot(&c_dagger_c)) * 0.5);
    }
    out
}

fn rhs_at(
    hamiltonian: &BoundOperator,
    collapse: &[BoundOperator],
    rho: &Array2<Complex<f64>>,
    t: f64,
) -> Array2<Complex<f64>> {
    let collapse = collapse.iter().map(|c| c.at(t)).collect::<Vec<_>>();
    lindblad_rhs(&hamiltonian.at(t), &collapse, rho)
}

/// Single RK4 step, evaluating the operators at `t`, `t + dt / 2` and `t + dt`.
fn rk4_step(
    hamiltonian: &BoundOperator,
    collapse: &[BoundOperator],
    rho: &Array2<Complex<f64>>,
    t: f64,
    dt: f64,
) -> Array2<Complex<f64>> {
    let k1 = rhs_at(hamiltonian, collapse, rho, t);
    let rho2 = rho + &(&k1 * (0.5 * dt));
    let k2 = rhs_at(hamiltonian, collapse, &rho2, t + 0.5 * dt);
    let rho3 = rho + &(&k2 * (0.5 * dt));
    let k3 = rhs_at(hamiltonian, collapse, &rho3, t + 0.5 * dt);
    let rho4 = rho + &(&k3 * dt);
    let k4 = rhs_at(hamiltonian, collapse, &rho4, t + dt);

    rho + &((k1 + &(k2 * 2.0) + &(k3 * 2.0) + &k4) * (dt / 6.0))
}

/// Solve the master equation, returning `tr(O \rho(t))` for each observable,
/// with shape `(n_observables, n_times)`.
///
/// Each interval between the requested times is split into equal steps no larger than `dt`.
///
/// # Errors
///
/// Returns `InvalidSpecification` if the operators or times are malformed,
/// or `Configuration` if `dt` is not positive.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn evolve(
    hamiltonian: &TimeDependentOperator,
    initial_state: &QuantumState,
    times: &[f64],
    collapse: &[TimeDependentOperator],
    observables: &[Array2<Complex<f64>>],
    parameters: &Parameters,
    dt: f64,
) -> Result<Array2<Complex<f64>>> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(SolverError::Configuration(format!(
            "dt must be positive, got {dt}"
        )));
    }
    Problem::new(hamiltonian.clone(), initial_state.clone(), times.to_vec())
        .with_collapse(collapse.to_vec())
        .with_observables(observables.to_vec())
        .validate()?;

    let hamiltonian = hamiltonian.bind(parameters);
    let collapse = collapse
        .iter()
        .map(|c| c.bind(parameters))
        .collect::<Vec<_>>();

    let mut rho = initial_state.to_density_matrix();
    let trace = rho.diag().iter().map(|d| d.re).sum::<f64>();
    rho.mapv_inplace(|x| x / trace);

    let mut out = Array2::zeros([observables.len(), times.len()]);
    for (n, window) in std::iter::once(None)
        .chain(times.windows(2).map(Some))
        .enumerate()
    {
        if let Some(&[t_start, t_end]) = window {
            let n_step = ((t_end - t_start) / dt - 1e-9).ceil().max(1.0) as usize;
            let step = (t_end - t_start) / n_step as f64;
            for i in 0..n_step {
                rho = rk4_step(&hamiltonian, &collapse, &rho, t_start + i as f64 * step, step);
            }
        }
        for (i, observable) in observables.iter().enumerate() {
            out[[i, n]] = trace_of_product(observable, &rho);
        }
    }
    Ok(out)
}
