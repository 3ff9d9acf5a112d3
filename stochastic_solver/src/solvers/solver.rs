use std::{
    borrow::Cow,
    sync::atomic::{AtomicBool, Ordering},
};

use ndarray::{Array1, Array2};
use num_complex::Complex;
use rand::Rng;
use rand_distr::Distribution;

use crate::{
    distribution::WienerIncrement, error::TrajectoryError, result::QuantumState,
    system::SDESystem,
};

pub trait Stepper {
    /// Get the increment `Y_{n+1} - Y_n` of a single step of length dt.
    ///
    /// `dw` are the wiener increments of the step, one for each incoherent term,
    /// and `rng` is used for any additional random variables the scheme needs.
    ///
    /// # Errors
    ///
    /// Returns an error if the step cannot be taken, ie if an implicit step is singular
    fn step<T: SDESystem, R: Rng + ?Sized>(
        &self,
        state: &Array1<Complex<f64>>,
        system: &T,
        t: f64,
        dt: f64,
        dw: &[f64],
        rng: &mut R,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError>;
}

pub trait Measurement {
    type Out;
    fn measure<T: SDESystem>(&self, system: &T, state: &Array1<Complex<f64>>, t: f64)
        -> Self::Out;
}

pub struct StateMeasurement {
    pub normalize: bool,
}

impl Measurement for StateMeasurement {
    type Out = QuantumState;
    fn measure<T: SDESystem>(
        &self,
        system: &T,
        state: &Array1<Complex<f64>>,
        _t: f64,
    ) -> Self::Out {
        if self.normalize {
            system.to_quantum_state(&system.normalized(state))
        } else {
            system.to_quantum_state(state)
        }
    }
}

pub struct ExpectationMeasurement<'a> {
    pub operators: &'a [Array2<Complex<f64>>],
    pub normalize: bool,
}

impl Measurement for ExpectationMeasurement<'_> {
    type Out = Vec<Complex<f64>>;
    fn measure<T: SDESystem>(
        &self,
        system: &T,
        state: &Array1<Complex<f64>>,
        _t: f64,
    ) -> Self::Out {
        let state = if self.normalize {
            Cow::Owned(system.normalized(state))
        } else {
            Cow::Borrowed(state)
        };
        self.operators
            .iter()
            .map(|o| system.expect(o, &state))
            .collect()
    }
}

/// Measures `<c_j + c_j^\dagger>` for each incoherent channel
pub struct ChannelMeasurement {}

impl Measurement for ChannelMeasurement {
    type Out = Vec<f64>;
    fn measure<T: SDESystem>(&self, system: &T, state: &Array1<Complex<f64>>, t: f64) -> Self::Out {
        system.measured_expectations(state, t)
    }
}

impl<M: Measurement> Measurement for Option<M> {
    type Out = Option<M::Out>;
    fn measure<T: SDESystem>(&self, system: &T, state: &Array1<Complex<f64>>, t: f64) -> Self::Out {
        self.as_ref().map(|m| m.measure(system, state, t))
    }
}

impl<M0: Measurement, M1: Measurement> Measurement for (M0, M1) {
    type Out = (M0::Out, M1::Out);
    fn measure<T: SDESystem>(&self, system: &T, state: &Array1<Complex<f64>>, t: f64) -> Self::Out {
        (
            self.0.measure(system, state, t),
            self.1.measure(system, state, t),
        )
    }
}

pub struct Solution<O> {
    /// The measurement at each requested time
    pub observations: Vec<O>,
    /// The total wiener increment of each channel over each requested interval,
    /// with shape `(n_incoherent, n_times - 1)`
    pub increments: Array2<f64>,
    pub final_state: Array1<Complex<f64>>,
}

/// Integrates a system with a fixed step, reporting the state only at the requested times
pub struct FixedStepSolver<S> {
    pub stepper: S,
    /// The largest step taken between two requested times
    pub target_dt: f64,
    /// The largest accepted deviation of the norm from one
    pub norm_tolerance: f64,
}

impl<S: Stepper> FixedStepSolver<S> {
    /// The number of equal steps needed to cover `duration` without exceeding `target_dt`
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn n_substeps(&self, duration: f64) -> usize {
        let n = (duration / self.target_dt - 1e-9).ceil();
        if n.is_finite() && n >= 1.0 {
            n as usize
        } else {
            1
        }
    }

    /// Integrate from `t_start` to `t_end`, adding the wiener increments drawn
    /// for each channel into `increments`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stepper fails
    #[allow(clippy::cast_precision_loss)]
    pub fn integrate<T: SDESystem, R: Rng + ?Sized>(
        &self,
        state: Array1<Complex<f64>>,
        system: &T,
        t_start: f64,
        t_end: f64,
        increments: &mut [f64],
        rng: &mut R,
    ) -> Result<Array1<Complex<f64>>, TrajectoryError> {
        let n_step = self.n_substeps(t_end - t_start);
        let dt = (t_end - t_start) / n_step as f64;
        let distribution = WienerIncrement::new(dt);

        let mut dw = vec![0f64; system.n_incoherent()];
        let mut out = state;
        for n in 0..n_step {
            for (d, total) in dw.iter_mut().zip(increments.iter_mut()) {
                *d = distribution.sample(rng);
                *total += *d;
            }
            let step = self
                .stepper
                .step(&out, system, t_start + n as f64 * dt, dt, &dw, rng)?;
            out += &step;
        }
        Ok(out)
    }

    fn check_norm<T: SDESystem>(
        &self,
        system: &T,
        state: &Array1<Complex<f64>>,
        t: f64,
    ) -> Result<(), TrajectoryError> {
        let norm = system.norm(state);
        if !(norm.is_finite() && (norm - 1.0).abs() <= self.norm_tolerance) {
            return Err(TrajectoryError::NumericalInstability { time: t, norm });
        }
        let magnitude = system.magnitude(state);
        if magnitude.is_finite() && magnitude <= 1.0 + self.norm_tolerance {
            Ok(())
        } else {
            Err(TrajectoryError::NumericalInstability {
                time: t,
                norm: magnitude,
            })
        }
    }

    /// Solve the system, measuring the state at each of `times`.
    ///
    /// The cancellation flag is checked before each requested interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the norm of the state leaves the accepted band at a requested
    /// time, if the stepper fails or if the solve is cancelled
    pub fn solve<T: SDESystem, M: Measurement, R: Rng + ?Sized>(
        &self,
        initial_state: &Array1<Complex<f64>>,
        system: &T,
        measurement: &M,
        times: &[f64],
        rng: &mut R,
        cancelled: &AtomicBool,
    ) -> Result<Solution<M::Out>, TrajectoryError> {
        let mut observations = Vec::with_capacity(times.len());
        let mut increments =
            Array2::zeros([system.n_incoherent(), times.len().saturating_sub(1)]);
        let mut current = initial_state.to_owned();

        if let Some(&t0) = times.first() {
            observations.push(measurement.measure(system, &current, t0));
        }
        for (n, window) in times.windows(2).enumerate() {
            if cancelled.load(Ordering::Relaxed) {
                return Err(TrajectoryError::Cancelled);
            }
            let mut interval = vec![0f64; system.n_incoherent()];
            current = self.integrate(current, system, window[0], window[1], &mut interval, rng)?;
            self.check_norm(system, &current, window[1])?;

            increments.column_mut(n).assign(&Array1::from(interval));
            observations.push(measurement.measure(system, &current, window[1]));
        }

        Ok(Solution {
            observations,
            increments,
            final_state: current,
        })
    }
}
