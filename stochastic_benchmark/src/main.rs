use std::{error::Error, time::Instant};

use ndarray::Array2;
use num_complex::Complex;
use stochastic_solver::{
    operator::{coherent, dagger, destroy, number},
    reference::evolve,
    smesolve, MapKind, Method, Options, Parameters, Problem, TimeDependentOperator,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const N_LEVELS: usize = 4;
const N_TRAJECTORIES: usize = 200;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn get_problem() -> Problem {
    let a = destroy(N_LEVELS);
    let times = (0..=20).map(|i| 0.005 * f64::from(i)).collect();
    Problem::new(
        TimeDependentOperator::with_coefficient(number(N_LEVELS), |t, p: &Parameters| Complex {
            re: p.get_or("w", 0.0) * t,
            im: 0.0,
        }),
        coherent(N_LEVELS, Complex { re: 0.5, im: 0.0 }),
        times,
    )
    .with_collapse(vec![TimeDependentOperator::constant(a.clone())])
    .with_stochastic(vec![TimeDependentOperator::constant(&a * 0.5)])
    .with_observables(vec![number(N_LEVELS), &a + &dagger(&a)])
    .with_parameters(Parameters::from([("w", 2.0)]))
}

fn max_deviation(actual: &Array2<Complex<f64>>, expected: &Array2<Complex<f64>>) -> f64 {
    actual
        .iter()
        .zip(expected)
        .map(|(a, e)| (a - e).norm())
        .fold(0.0, f64::max)
}

/// Base options are read from the json file given as the first argument, if any
fn get_options() -> Result<Options, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(Options::default()),
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let problem = get_problem();
    let base = get_options()?;

    let collapse = problem
        .collapse
        .iter()
        .chain(&problem.stochastic)
        .cloned()
        .collect::<Vec<_>>();
    let reference = evolve(
        &problem.hamiltonian,
        &problem.initial_state,
        &problem.times,
        &collapse,
        &problem.observables,
        &problem.parameters,
        1e-4,
    )?;

    for method in Method::ALL {
        for map in [MapKind::Serial, MapKind::Parallel] {
            let options = base.clone().with_method(method).with_map(map);
            let start = Instant::now();
            let result = smesolve(&problem, N_TRAJECTORIES, 0_u64, &options)?;
            info!(
                %method,
                ?map,
                elapsed = ?start.elapsed(),
                deviation = max_deviation(&result.expect, &reference),
                "benchmark finished"
            );
        }
    }
    Ok(())
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        error!(error = %e, "benchmark failed");
        std::process::exit(1);
    }
}
