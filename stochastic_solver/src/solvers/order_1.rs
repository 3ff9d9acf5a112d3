use ndarray::Array1;
use num_complex::Complex;

use rand::Rng;

use crate::{
    error::TrajectoryError,
    system::{SDEOperators, SDEStep, SDESystem},
};

use super::Stepper;

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct EulerStepper {}

impl Stepper for EulerStepper {
    fn step<T: SDESystem, R: Rng + ?Sized>(
        &self,
        state: &Array1<Complex<f64>>,
        system: &T,
        t: f64,
        dt: f64,
        dw: &[f64],
        _rng: &mut R,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        // The basic euler method
        // Y_n+1 = Y_n + a dt + \sum_k b_k dW
        // where dW are normalized gaussian random variables,  <dW_k dW_k'> = \delta_{kk'} dt
        let step = SDEStep {
            coherent: dt,
            incoherent: dw,
        };

        Ok(system.get_step(&step, state, t))
    }
}

/// The incoherent part of the derivative free milstein scheme, eqn 11.1.7
/// in <https://doi.org/10.1007/978-3-662-12616-5>
///
/// ```latex
/// \sum_j b^j dW^j + \frac{1}{2 \sqrt{dt}} \sum_{j,k} (b^k(\bar{Y}^j) - b^k(Y)) (dW^j dW^k - \delta_{jk} dt)
/// ```
///
/// with supporting values `\bar{Y}^j = Y + a dt + b^j \sqrt{dt}`.
/// The double ito integrals are replaced by their symmetric part, which is exact for commuting noise.
pub(super) fn milstein_incoherent_step<T: SDESystem>(
    system: &T,
    state: &Array1<Complex<f64>>,
    operators: &SDEOperators,
    t: f64,
    dt: f64,
    dw: &[f64],
) -> Array1<Complex<f64>> {
    let sqrt_dt = dt.sqrt();
    let mut out = Array1::zeros([state.len()]);
    for (b, &dw_j) in operators.incoherent.iter().zip(dw) {
        out += &(b * dw_j);
    }

    let drift = &operators.coherent * dt;
    for (j, b_j) in operators.incoherent.iter().enumerate() {
        let supporting_state = state + &drift + &(b_j * sqrt_dt);
        let weights = dw
            .iter()
            .enumerate()
            .map(|(k, dw_k)| {
                let ito = if j == k { dt } else { 0f64 };
                (dw[j] * dw_k - ito) / (2.0 * sqrt_dt)
            })
            .collect::<Vec<_>>();

        out += &system.get_incoherent_steps(&weights, &supporting_state, t);
        for (b_k, weight) in operators.incoherent.iter().zip(&weights) {
            out -= &(b_k * *weight);
        }
    }
    out
}

#[derive(Default)]
pub struct MilsteinStepper {}

impl Stepper for MilsteinStepper {
    fn step<T: SDESystem, R: Rng + ?Sized>(
        &self,
        state: &Array1<Complex<f64>>,
        system: &T,
        t: f64,
        dt: f64,
        dw: &[f64],
        _rng: &mut R,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        // The explicit milstein scheme for commuting noise
        // Y(n+1) = Y(n) + a dt + \sum_j b^j dW^j + (bb' terms from the supporting values)

        // Pre-compute the system parts, since we use them for every supporting value
        let parts = system.get_parts(state, t);
        let operators = T::get_operators_from_parts(&parts);

        Ok(&operators.coherent * dt
            + milstein_incoherent_step(system, state, &operators, t, dt, dw))
    }
}

/// The predictor corrector scheme of 15.5 in <https://doi.org/10.1007/978-3-662-12616-5>,
/// with `alpha = 1/2` and `eta = 0`
///
/// ```latex
/// \bar{Y} = Y + a dt + \sum_j b^j dW^j
/// Y(n+1) = Y(n) + 1/2 (a(\bar{Y}) + a(Y)) dt + \sum_j b^j dW^j
/// ```
#[derive(Default)]
pub struct PredictorCorrectorStepper {}

impl Stepper for PredictorCorrectorStepper {
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

        let mut out = Array1::zeros([state.len()]);
        for (b, &dw_j) in operators.incoherent.iter().zip(dw) {
            out += &(b * dw_j);
        }

        let predicted = state + &(&operators.coherent * dt) + &out;
        out += &system.get_coherent_step(0.5 * dt, &predicted, t + dt);
        out += &(&operators.coherent * (0.5 * dt));
        Ok(out)
    }
}
