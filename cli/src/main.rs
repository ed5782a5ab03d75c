//! `immtrack` CLI: scenario runs through IMM estimator banks, run-log replay.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imm_core::batch::cycle_all;
use imm_core::clock::ManualClock;
use imm_core::config::ImmConfig;
use imm_core::imm::ImmEstimator;
use imm_core::provider::{KinematicMatrixProvider, KinematicMode};
use imm_core::types::{DMat, DVec, Measurement};
use sim::replay::{load_log, save_log, Frame, RunLog, TargetRecord, TargetStats};
use sim::scenarios::{Scenario, ScenarioKind};
use sim::sensor::PositionSensor;
use std::path::{Path, PathBuf};
use tracing::warn;

type Estimator = ImmEstimator<KinematicMatrixProvider, ManualClock>;

#[derive(Parser)]
#[command(name = "immtrack", about = "IMM estimator scenario runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named scenario, one estimator per target, and report errors.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Save the full run log as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Recompute statistics from a saved run log.
    Replay {
        /// Path to run-log JSON file
        input: PathBuf,
        /// Write the statistics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            output,
        } => {
            run_scenario(scenario, seed, output.as_deref())?;
        }
        Commands::Replay { input, output } => {
            run_replay(&input, output.as_deref())?;
        }
    }

    Ok(())
}

/// Velocity and acceleration modes tuned to the sensor noise.
fn provider(sensor: &PositionSensor) -> KinematicMatrixProvider {
    let var = sensor.params.noise_std * sensor.params.noise_std;
    let cv_p = DMat::from_diagonal(&DVec::from_vec(vec![var, 1e4, var, 1e4]));
    let ca_p = DMat::from_diagonal(&DVec::from_vec(vec![var, 1e4, 400.0, var, 1e4, 400.0]));
    KinematicMatrixProvider::new()
        .with_mode(
            "cv",
            KinematicMode::constant_velocity()
                .with_sigma(0.5)
                .with_covariance(cv_p)
                .with_measurement_noise(sensor.noise_covariance(4)),
        )
        .with_mode(
            "ca",
            KinematicMode::constant_acceleration()
                .with_sigma(20.0)
                .with_covariance(ca_p)
                .with_measurement_noise(sensor.noise_covariance(6)),
        )
}

fn record(target: &sim::Target, m: &Measurement, imm: &Estimator) -> TargetRecord {
    let (mode, _) = imm.dominant_mode();
    TargetRecord {
        id: target.id,
        truth: target.state,
        measured: [m.z[0], m.z[3]],
        estimate: imm.data().x.iter().copied().collect(),
        mode_probabilities: imm.mode_probabilities().iter().copied().collect(),
        dominant_mode: mode.to_string(),
    }
}

fn run_scenario(kind: ScenarioKind, seed: u64, output_path: Option<&Path>) -> Result<()> {
    let mut scenario = Scenario::build(kind, seed);
    let mut sensor = PositionSensor::new(scenario.sensor.clone(), seed);
    let clock = ManualClock::default();
    let config = ImmConfig::velocity_acceleration();
    let dt = scenario.sim_dt;

    println!(
        "Running scenario '{}' (seed={}, duration={:.0}s, {} targets)...",
        scenario.name,
        seed,
        scenario.duration,
        scenario.targets.len()
    );

    // Each estimator starts at rest on its first reading
    let mut bank: Vec<Estimator> = scenario
        .targets
        .iter()
        .map(|target| {
            let z = sensor.measure(target).z;
            let x0 = DVec::from_vec(vec![z[0], 0.0, 0.0, z[3], 0.0, 0.0]);
            ImmEstimator::new(x0, &config, provider(&sensor), clock.clone())
                .with_context(|| format!("building estimator for target {}", target.id))
        })
        .collect::<Result<_>>()?;

    let start = std::time::Instant::now();
    let mut frames = Vec::with_capacity(scenario.frames());
    let mut degenerate = 0usize;

    for k in 0..scenario.frames() {
        let t = k as f64 * dt;
        for target in &mut scenario.targets {
            target.step(t, dt);
        }
        clock.advance_secs(dt);

        let measurements: Vec<Measurement> =
            scenario.targets.iter().map(|target| sensor.measure(target)).collect();
        let results = cycle_all(&mut bank, &measurements)?;

        let mut records = Vec::with_capacity(bank.len());
        for (((target, m), imm), result) in scenario
            .targets
            .iter()
            .zip(&measurements)
            .zip(&bank)
            .zip(results)
        {
            match result {
                Ok(report) => degenerate += report.degenerate.len(),
                Err(e) => warn!(target = target.id, error = %e, "cycle rejected"),
            }
            records.push(record(target, m, imm));
        }
        frames.push(Frame {
            time: t + dt,
            targets: records,
        });
    }

    let elapsed = start.elapsed();
    let log = RunLog {
        scenario_name: scenario.name.clone(),
        seed,
        sim_dt: dt,
        duration: scenario.duration,
        frames,
    };

    println!(
        "Done: {} frames, {} degenerate mode updates, elapsed={:.2}s",
        log.frames.len(),
        degenerate,
        elapsed.as_secs_f64(),
    );
    print_statistics(&log.statistics());

    if let Some(opath) = output_path {
        save_log(&log, opath)?;
        println!("Run log saved to {}", opath.display());
    }

    Ok(())
}

fn run_replay(input: &Path, output_path: Option<&Path>) -> Result<()> {
    let log = load_log(input).with_context(|| format!("loading {}", input.display()))?;
    println!(
        "Replaying '{}' (seed={}, {} frames)...",
        log.scenario_name,
        log.seed,
        log.frames.len()
    );

    let stats = log.statistics();
    print_statistics(&stats);

    if let Some(opath) = output_path {
        std::fs::write(opath, serde_json::to_string_pretty(&stats)?)?;
        println!("Statistics saved to {}", opath.display());
    }

    Ok(())
}

fn print_statistics(stats: &[TargetStats]) {
    println!(
        "{:>6} {:>12} {:>12} {:>9} {:>6}",
        "target", "rmse_est", "rmse_meas", "switches", "mode"
    );
    for s in stats {
        println!(
            "{:>6} {:>12.2} {:>12.2} {:>9} {:>6}",
            s.id, s.position_rmse, s.measurement_rmse, s.mode_switches, s.final_mode
        );
    }
    if !stats.is_empty() {
        let mean = stats.iter().map(|s| s.position_rmse).sum::<f64>() / stats.len() as f64;
        println!("mean position RMSE: {mean:.2} m");
    }
}
