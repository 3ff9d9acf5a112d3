//! A single stochastic trajectory

use std::sync::atomic::AtomicBool;

use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};
use num_complex::Complex;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    error::TrajectoryError,
    options::Options,
    problem::{Detection, Problem},
    result::QuantumState,
    solvers::{
        ChannelMeasurement, ExpectationMeasurement, FixedStepSolver, Integrator, Measurement,
        StateMeasurement,
    },
    system::SDESystem,
};

/// The noise realised by a trajectory.
///
/// Channels are indexed by stochastic operator, with an extra axis of
/// size 2 for heterodyne detection.
#[derive(Debug, Clone)]
pub struct NoiseRecord {
    /// `W(t)`, with shape `(.., n_times)`
    pub wiener_process: ArrayD<f64>,
    /// The increment of `W` over each interval, with shape `(.., n_times - 1)`
    pub dw: ArrayD<f64>,
    /// `<c + c^\dagger>(t_{n+1}) + dW_n / (t_{n+1} - t_n)`, with shape `(.., n_times - 1)`
    pub measurement: ArrayD<f64>,
}

#[derive(Debug, Clone)]
pub struct TrajectoryOutput {
    /// Expectation of each observable, with shape `(n_observables, n_times)`
    pub expect: Array2<Complex<f64>>,
    pub final_state: QuantumState,
    pub states: Option<Vec<QuantumState>>,
    pub noise: Option<NoiseRecord>,
}

/// Split the channel axis of a heterodyne record into `(operator, quadrature)`
fn channel_array(array: &Array2<f64>, detection: Detection) -> ArrayD<f64> {
    match detection {
        Detection::Homodyne => array.clone().into_dyn(),
        Detection::Heterodyne => {
            let (n_channels, n_times) = array.dim();
            ArrayD::from_shape_fn(IxDyn(&[n_channels / 2, 2, n_times]), |idx| {
                array[[2 * idx[0] + idx[1], idx[2]]]
            })
        }
    }
}

fn noise_record(
    dw: &Array2<f64>,
    channel_expectations: &[Vec<f64>],
    times: &[f64],
    detection: Detection,
) -> NoiseRecord {
    let (n_channels, n_intervals) = dw.dim();

    let mut wiener_process = Array2::zeros([n_channels, n_intervals + 1]);
    for (n, increment) in dw.axis_iter(Axis(1)).enumerate() {
        let next = &wiener_process.column(n) + &increment;
        wiener_process.column_mut(n + 1).assign(&next);
    }

    let measurement = Array2::from_shape_fn([n_channels, n_intervals], |(k, n)| {
        channel_expectations[n + 1][k] + dw[[k, n]] / (times[n + 1] - times[n])
    });

    NoiseRecord {
        wiener_process: channel_array(&wiener_process, detection),
        dw: channel_array(dw, detection),
        measurement: channel_array(&measurement, detection),
    }
}

/// Run a single trajectory of `system`, with a generator seeded from `seed`.
///
/// # Errors
///
/// Returns an error if the trajectory diverges, or if it is cancelled
pub fn run_trajectory<T: SDESystem>(
    system: &T,
    initial_state: &Array1<Complex<f64>>,
    problem: &Problem,
    options: &Options,
    seed: u64,
    cancelled: &AtomicBool,
) -> Result<TrajectoryOutput, TrajectoryError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let solver = FixedStepSolver {
        stepper: Integrator::from(options.method),
        target_dt: options.dt,
        norm_tolerance: options.norm_tolerance,
    };
    let measurement = (
        ExpectationMeasurement {
            operators: &problem.observables,
            normalize: options.normalize_output,
        },
        (
            options.store_states.then_some(StateMeasurement {
                normalize: options.normalize_output,
            }),
            options.store_measurement.then_some(ChannelMeasurement {}),
        ),
    );

    let solution = solver.solve(
        initial_state,
        system,
        &measurement,
        &problem.times,
        &mut rng,
        cancelled,
    )?;

    let n_times = solution.observations.len();
    let expect = Array2::from_shape_fn([problem.observables.len(), n_times], |(i, n)| {
        solution.observations[n].0[i]
    });

    let t_final = problem.times.last().copied().unwrap_or_default();
    let final_state = StateMeasurement {
        normalize: options.normalize_output,
    }
    .measure(system, &solution.final_state, t_final);

    let mut states = Vec::new();
    let mut channel_expectations = Vec::new();
    for (_, (state, channel)) in solution.observations {
        states.extend(state);
        channel_expectations.extend(channel);
    }

    let noise = options.store_measurement.then(|| {
        noise_record(
            &solution.increments,
            &channel_expectations,
            &problem.times,
            problem.detection,
        )
    });

    Ok(TrajectoryOutput {
        expect,
        final_state,
        states: options.store_states.then_some(states),
        noise,
    })
}
