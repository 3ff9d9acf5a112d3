use std::{fmt, str::FromStr};

use ndarray::Array1;
use num_complex::Complex;
use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::{SolverError, TrajectoryError},
    system::SDESystem,
};

mod implicit;
mod order_1;
mod order_2;
mod rouchon;
pub mod solver;

pub use implicit::ImplicitMilsteinStepper;
pub use order_1::{EulerStepper, MilsteinStepper, PredictorCorrectorStepper};
pub use order_2::PlatenStepper;
pub use rouchon::RouchonStepper;
pub use solver::*;

/// The registered integration schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum Method {
    Euler,
    Milstein,
    #[default]
    MilsteinImplicit,
    Platen,
    PredictorCorrector,
    Rouchon,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Euler,
        Method::Milstein,
        Method::MilsteinImplicit,
        Method::Platen,
        Method::PredictorCorrector,
        Method::Rouchon,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Method::Euler => "euler",
            Method::Milstein => "milstein",
            Method::MilsteinImplicit => "milstein_imp",
            Method::Platen => "platen",
            Method::PredictorCorrector => "pred_corr",
            Method::Rouchon => "rouchon",
        }
    }

    #[must_use]
    pub fn strong_order(self) -> f64 {
        match self {
            Method::Euler | Method::PredictorCorrector => 0.5,
            Method::Milstein | Method::MilsteinImplicit | Method::Platen | Method::Rouchon => 1.0,
        }
    }

    #[must_use]
    pub fn weak_order(self) -> f64 {
        match self {
            Method::Platen => 2.0,
            _ => 1.0,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| {
                SolverError::Configuration(format!(
                    "unknown method '{s}', expected one of {}",
                    Method::ALL.map(Method::name).join(", ")
                ))
            })
    }
}

impl TryFrom<String> for Method {
    type Error = SolverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(value: Method) -> Self {
        value.name().to_owned()
    }
}

/// A stepper for one of the registered methods
pub enum Integrator {
    Euler(EulerStepper),
    Milstein(MilsteinStepper),
    MilsteinImplicit(ImplicitMilsteinStepper),
    Platen(PlatenStepper),
    PredictorCorrector(PredictorCorrectorStepper),
    Rouchon(RouchonStepper),
}

impl From<Method> for Integrator {
    fn from(value: Method) -> Self {
        match value {
            Method::Euler => Integrator::Euler(EulerStepper::default()),
            Method::Milstein => Integrator::Milstein(MilsteinStepper::default()),
            Method::MilsteinImplicit => {
                Integrator::MilsteinImplicit(ImplicitMilsteinStepper::default())
            }
            Method::Platen => Integrator::Platen(PlatenStepper::default()),
            Method::PredictorCorrector => {
                Integrator::PredictorCorrector(PredictorCorrectorStepper::default())
            }
            Method::Rouchon => Integrator::Rouchon(RouchonStepper::default()),
        }
    }
}

impl Stepper for Integrator {
    #[inline]
    fn step<T: SDESystem, R: Rng + ?Sized>(
        &self,
        state: &Array1<Complex<f64>>,
        system: &T,
        t: f64,
        dt: f64,
        dw: &[f64],
        rng: &mut R,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        match self {
            Integrator::Euler(s) => s.step(state, system, t, dt, dw, rng),
            Integrator::Milstein(s) => s.step(state, system, t, dt, dw, rng),
            Integrator::MilsteinImplicit(s) => s.step(state, system, t, dt, dw, rng),
            Integrator::Platen(s) => s.step(state, system, t, dt, dw, rng),
            Integrator::PredictorCorrector(s) => s.step(state, system, t, dt, dw, rng),
            Integrator::Rouchon(s) => s.step(state, system, t, dt, dw, rng),
        }
    }
}
