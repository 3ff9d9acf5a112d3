use ndarray::Array1;
use num_complex::Complex;
use rand::Rng;

use crate::{
    distribution::PairIntegralSigns,
    error::TrajectoryError,
    system::{SDEStep, SDESystem},
};

use super::Stepper;

/// The explicit order 2 weak scheme, see 15.1.3 in <https://doi.org/10.1007/978-3-662-12616-5>
/// although there is a typo if one compares to 15.4.13
///
/// The pair terms `dW^j dW^r + V_{rj}` use the two point [`PairIntegralSigns`],
/// so only the wiener increments are gaussian.
#[derive(Default)]
pub struct PlatenStepper {}

impl Stepper for PlatenStepper {
    #[allow(clippy::cast_precision_loss)]
    fn step<T: SDESystem, R: Rng + ?Sized>(
        &self,
        state: &Array1<Complex<f64>>,
        system: &T,
        t: f64,
        dt: f64,
        dw: &[f64],
        rng: &mut R,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        let sqrt_dt = dt.sqrt();
        let n_incoherent = system.n_incoherent();
        let v = rng.sample(PairIntegralSigns {
            n_channels: n_incoherent,
            dt,
        });

        let parts = system.get_parts(state, t);
        let operators = T::get_operators_from_parts(&parts);

        // \bar{Y} = Y + a dt + \sum_j b^j dw^j
        let y_supporting_state = state
            + T::get_step_from_parts(
                &parts,
                &SDEStep {
                    coherent: dt,
                    incoherent: dw,
                },
            );

        // 1/2 dt (a(\bar{Y}) + a(Y))
        let mut out = system.get_coherent_step(0.5 * dt, &y_supporting_state, t + dt);
        out += &(&operators.coherent * (0.5 * dt));
        // 1/2 \sum_j b^j dw^j (2 - N_incoherent)
        for (b, &dw_j) in operators.incoherent.iter().zip(dw) {
            out += &(b * (0.5 * dw_j * (2.0 - n_incoherent as f64)));
        }

        let drift = &operators.coherent * dt;
        for (r, b_r) in operators.incoherent.iter().enumerate() {
            // U+- = Y +- b^r \sqrt(dt), R+- = U+- + a dt
            let u_plus = state + &(b_r * sqrt_dt);
            let u_minus = state - &(b_r * sqrt_dt);
            let r_plus = &u_plus + &drift;
            let r_minus = &u_minus + &drift;

            // 1/4 \sum_j b^j(+) (dw^j + (dw^j dw^r + V_rj) / sqrt(dt))
            //   + b^j(-) (dw^j - (dw^j dw^r + V_rj) / sqrt(dt))
            for (j, &dw_j) in dw.iter().enumerate() {
                let pair_dw = (dw_j * dw[r] + v[[r, j]]) / sqrt_dt;
                let (plus, minus) = if j == r {
                    (&r_plus, &r_minus)
                } else {
                    (&u_plus, &u_minus)
                };
                out += &system.get_incoherent_step(j, 0.25 * (dw_j + pair_dw), plus, t);
                out += &system.get_incoherent_step(j, 0.25 * (dw_j - pair_dw), minus, t);
            }
        }

        Ok(out)
    }
}
