//! Noisy position sensor.
//!
//! Reports target position in the estimator's canonical layout: the position
//! slots of `[x, vx, ax, y, vy, ay]` carry the noisy reading, every other slot
//! is zero. Kinematic modes measure position only, so the other slots never
//! reach the state.

use crate::target::Target;
use imm_core::types::{DMat, DVec, Measurement};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorParams {
    /// Position noise standard deviation (m)
    pub noise_std: f64,
}

impl Default for SensorParams {
    fn default() -> Self {
        Self { noise_std: 5.0 }
    }
}

pub struct PositionSensor {
    pub params: SensorParams,
    rng: ChaCha8Rng,
}

impl PositionSensor {
    pub fn new(params: SensorParams, seed: u64) -> Self {
        Self {
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Approximately standard-normal sample: sum of twelve uniforms, centred.
    fn standard_normal(&mut self) -> f64 {
        (0..12).map(|_| self.rng.gen::<f64>()).sum::<f64>() - 6.0
    }

    /// One noisy reading of `target`.
    pub fn measure(&mut self, target: &Target) -> Measurement {
        let (x, y) = target.pos_2d();
        let std = self.params.noise_std;
        let mut z = DVec::zeros(6);
        z[0] = x + std * self.standard_normal();
        z[3] = y + std * self.standard_normal();
        Measurement::new(z)
    }

    /// Measurement covariance for a mode of native dimension `dim` whose
    /// position slots sit at `0` and `dim / 2`.
    pub fn noise_covariance(&self, dim: usize) -> DMat {
        let var = self.params.noise_std * self.params.noise_std;
        let mut r = DMat::identity(dim, dim);
        r[(0, 0)] = var;
        r[(dim / 2, dim / 2)] = var;
        r
    }
}
