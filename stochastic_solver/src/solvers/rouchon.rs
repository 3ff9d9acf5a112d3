use ndarray::Array1;
use num_complex::Complex;
use rand::Rng;

use crate::{error::TrajectoryError, system::SDESystem};

use super::Stepper;

/// The positivity preserving scheme of <https://doi.org/10.1103/PhysRevA.91.012118>.
///
/// Each step applies the measurement operator built from the record `dY = e dt + dW`,
/// and renormalizes the state, so a density matrix stays positive semi-definite.
#[derive(Default)]
pub struct RouchonStepper {}

impl Stepper for RouchonStepper {
    fn step<T: SDESystem, R: Rng + ?Sized>(
        &self,
        state: &Array1<Complex<f64>>,
        system: &T,
        t: f64,
        dt: f64,
        dw: &[f64],
        _rng: &mut R,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        Ok(system.get_positive_map_step(state, t, dt, dw))
    }
}
