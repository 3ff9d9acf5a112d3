use std::cell::RefCell;

use ndarray::{Array1, Array2, OwnedRepr};
use ndarray_linalg::{FactorizeInto, LUFactorized, Solve};
use num_complex::Complex;
use rand::Rng;

use crate::{error::TrajectoryError, system::SDESystem};

use super::{order_1::milstein_incoherent_step, Stepper};

/// The drift implicit milstein scheme, 12.2.3 in <https://doi.org/10.1007/978-3-662-12616-5>,
/// where only the linear part of the drift `a(t, Y) = A(t) Y + (nonlinear)` is taken implicitly
///
/// ```latex
/// (1 - A(t + dt) dt) Y(n+1) = Y(n) + (a(Y(n)) - A(t) Y(n)) dt + (milstein incoherent step)
/// ```
///
/// The factorization of `1 - A dt` is kept between steps when the system does not depend on time,
/// so a stepper should not be shared between systems.
#[derive(Default)]
pub struct ImplicitMilsteinStepper {
    factorization: RefCell<Option<(u64, Factorization)>>,
}

type Factorization = LUFactorized<OwnedRepr<Complex<f64>>>;

impl ImplicitMilsteinStepper {
    fn factorize<T: SDESystem>(
        system: &T,
        t: f64,
        dt: f64,
    ) -> Result<Factorization, TrajectoryError> {
        let linear = system.linear_coherent(t);
        let matrix = Array2::<Complex<f64>>::eye(linear.nrows()) - linear * dt;
        matrix
            .factorize_into()
            .map_err(|_| TrajectoryError::SingularStep { time: t })
    }

    fn solve_factorized(
        lu: &Factorization,
        rhs: &Array1<Complex<f64>>,
        t: f64,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        lu.solve(rhs)
            .map_err(|_| TrajectoryError::SingularStep { time: t })
    }

    fn solve<T: SDESystem>(
        &self,
        system: &T,
        t: f64,
        dt: f64,
        rhs: &Array1<Complex<f64>>,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        if system.is_time_dependent() {
            let lu = Self::factorize(system, t + dt, dt)?;
            return Self::solve_factorized(&lu, rhs, t + dt);
        }

        let mut factorization = self.factorization.borrow_mut();
        if let Some((key, lu)) = factorization.as_ref() {
            if *key == dt.to_bits() {
                return Self::solve_factorized(lu, rhs, t + dt);
            }
        }
        let lu = Self::factorize(system, t + dt, dt)?;
        let out = Self::solve_factorized(&lu, rhs, t + dt)?;
        *factorization = Some((dt.to_bits(), lu));
        Ok(out)
    }
}

impl Stepper for ImplicitMilsteinStepper {
    fn step<T: SDESystem, R: Rng + ?Sized>(
        &self,
        state: &Array1<Complex<f64>>,
        system: &T,
        t: f64,
        dt: f64,
        dw: &[f64],
        _rng: &mut R,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        let parts = system.get_parts(state, t);
        let operators = T::get_operators_from_parts(&parts);

        // Y(n) + (a(Y(n)) - A(t) Y(n)) dt
        let nonlinear = &operators.coherent - &system.linear_coherent(t).dot(state);
        let mut rhs = state + &(nonlinear * dt);
        rhs += &milstein_incoherent_step(system, state, &operators, t, dt, dw);

        let next = self.solve(system, t, dt, &rhs)?;
        Ok(next - state)
    }
}
