//! Scenario definitions.
//!
//! Each scenario is a named configuration of targets and one position sensor.
//! All scenarios are deterministic given the same seed.

use crate::sensor::SensorParams;
use crate::target::{MotionSpec, Target};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One target on a straight constant-velocity track
    Straight,
    /// One target: cruise, hard turn, cruise, braking
    Manoeuvre,
    /// 25 targets with randomised manoeuvre schedules
    Fleet,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub duration: f64, // seconds
    pub sim_dt: f64,   // measurement interval (s)
    pub targets: Vec<Target>,
    pub sensor: SensorParams,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Straight => Self::straight(seed),
            ScenarioKind::Manoeuvre => Self::manoeuvre(seed),
            ScenarioKind::Fleet => Self::fleet(seed),
        }
    }

    /// Number of measurement frames in the run.
    pub fn frames(&self) -> usize {
        (self.duration / self.sim_dt).round() as usize
    }

    // -----------------------------------------------------------------------
    // Straight
    // -----------------------------------------------------------------------
    fn straight(seed: u64) -> Self {
        Scenario {
            name: "straight".into(),
            seed,
            duration: 60.0,
            sim_dt: 1.0,
            targets: vec![Target::new(0, [-3000., 500.], [120., -10.], MotionSpec::ConstantVelocity)],
            sensor: SensorParams { noise_std: 10.0 },
        }
    }

    // -----------------------------------------------------------------------
    // Manoeuvre
    // -----------------------------------------------------------------------
    fn manoeuvre(seed: u64) -> Self {
        let motion = MotionSpec::Segmented {
            segments: vec![
                (0.0, MotionSpec::ConstantVelocity),
                (30.0, MotionSpec::ConstantAccel { ax: -15.0, ay: 25.0 }),
                (42.0, MotionSpec::ConstantVelocity),
                (75.0, MotionSpec::ConstantAccel { ax: -8.0, ay: -4.0 }),
                (85.0, MotionSpec::ConstantVelocity),
            ],
        };
        Scenario {
            name: "manoeuvre".into(),
            seed,
            duration: 120.0,
            sim_dt: 1.0,
            targets: vec![Target::new(0, [0., 0.], [200., 0.], motion)],
            sensor: SensorParams { noise_std: 10.0 },
        }
    }

    // -----------------------------------------------------------------------
    // Fleet
    // -----------------------------------------------------------------------
    fn fleet(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        let duration = 180.0;

        let targets = (0..25)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / 25.0;
                let r = 20000.0_f64;
                let speed = 100.0 + rng.gen::<f64>() * 150.0;
                let heading = angle + std::f64::consts::PI; // toward centre

                let mut segments = vec![(0.0, MotionSpec::ConstantVelocity)];
                let mut t = 20.0 + rng.gen::<f64>() * 30.0;
                while t < duration - 20.0 {
                    let g = 5.0 + rng.gen::<f64>() * 25.0;
                    let dir = rng.gen::<f64>() * std::f64::consts::TAU;
                    let burn = 5.0 + rng.gen::<f64>() * 10.0;
                    segments.push((
                        t,
                        MotionSpec::ConstantAccel {
                            ax: g * dir.cos(),
                            ay: g * dir.sin(),
                        },
                    ));
                    segments.push((t + burn, MotionSpec::ConstantVelocity));
                    t += burn + 20.0 + rng.gen::<f64>() * 40.0;
                }

                Target::new(
                    i as u64,
                    [r * angle.cos(), r * angle.sin()],
                    [speed * heading.cos(), speed * heading.sin()],
                    MotionSpec::Segmented { segments },
                )
            })
            .collect();

        Scenario {
            name: "fleet".into(),
            seed,
            duration,
            sim_dt: 0.5,
            targets,
            sensor: SensorParams { noise_std: 25.0 },
        }
    }
}
