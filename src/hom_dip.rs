#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Scan a delay line in front of one input of a balanced beamsplitter and
//! print the coincidence probability at each delay.
//!
//! Usage: `hom_dip [config.toml]`

use ndarray as nd;
use rayon::iter::{ IntoParallelIterator, ParallelIterator };
use tracing_subscriber::EnvFilter;
use photonic_sim::{
    CircuitBuilder,
    ModeSpace,
    OutputSet,
    PhotonBunch,
    Polarization,
    SimConfig,
    SimResult,
    Simulator,
};

const WIDTH: f64 = 1.0; // packet width
const FREQ: f64 = 1.0; // central frequency
const DT_MAX: f64 = 4.0; // scan range, in units of `WIDTH`
const NPOINTS: usize = 81;

fn coincidence(sim: &Simulator, dt: f64) -> SimResult<f64> {
    let mut builder = CircuitBuilder::new(ModeSpace::simple(2)?);
    let p = builder.photons_mut().def_packet(0.0, FREQ, WIDTH, Polarization::H)?;
    builder.delay_time(1, dt)?.beamsplitter(0, 1, 45.0, 0.0)?;
    let circuit = builder.build()?;
    let mut bunch = PhotonBunch::new(&circuit);
    bunch.add_photon(0, 0, p)?.add_photon(1, 0, p)?;
    let mixed = sim.run_bunch(&bunch, &OutputSet::All)?;
    Ok(mixed.density.population(&[1, 1].into()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let config
        = match std::env::args().nth(1) {
            Some(path) => SimConfig::load(path)?,
            None => SimConfig::default(),
        };
    tracing::info!(?config, "scanning {} delays", NPOINTS);
    let sim = Simulator::new(config);

    let delays: nd::Array1<f64>
        = nd::Array1::linspace(-DT_MAX * WIDTH, DT_MAX * WIDTH, NPOINTS);
    let coinc: Vec<f64>
        = delays.to_vec().into_par_iter()
        .map(|dt| coincidence(&sim, dt))
        .collect::<SimResult<_>>()?;

    println!("# delay\tcoincidence");
    for (dt, p) in delays.iter().zip(coinc.iter()) {
        println!("{:+.4}\t{:.6}", dt, p);
    }
    let dip = coinc.iter().copied().fold(f64::INFINITY, f64::min);
    tracing::info!(visibility = 1.0 - 2.0 * dip, "done");
    Ok(())
}
