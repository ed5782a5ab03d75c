//! Time-dependent model matrices.
//!
//! The estimator asks a [`MatrixProvider`] for every mode's F, P, H, Q, R, B
//! once per cycle, given the elapsed time `dt`. Two providers ship here:
//!
//! - [`ConstantMatrixProvider`]: a fixed table, ignores `dt`.
//! - [`KinematicMatrixProvider`]: per-axis kinematic models.
//!
//! ## Kinematic state order
//! Constant acceleration: x = [x, vx, ax, y, vy, ay]ᵀ
//! Constant velocity:     x = [x, vx, y, vy]ᵀ
//!
//! ## Process noise (per axis, scaled by σ)
//! CA: [[dt⁵/20, dt⁴/8, dt³/6], [dt⁴/8, dt³/2, dt²/2], [dt³/6, dt²/2, dt]]
//! CV: [[dt³/3, dt²/2], [dt²/2, dt]]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ImmError, Result};
use crate::filter_state::ModelMatrices;
use crate::types::{DMat, MatrixRole, ModeKey};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait MatrixProvider {
    /// Concrete matrix for `key` and `role` after `dt` seconds.
    fn matrix_for(&self, key: &ModeKey, role: MatrixRole, dt: f64, sigma: Option<f64>)
        -> Result<DMat>;

    /// All six model matrices of a mode.
    fn matrices_for(&self, key: &ModeKey, dt: f64, sigma: Option<f64>) -> Result<ModelMatrices> {
        Ok(ModelMatrices {
            F: self.matrix_for(key, MatrixRole::F, dt, sigma)?,
            P: self.matrix_for(key, MatrixRole::P, dt, sigma)?,
            H: self.matrix_for(key, MatrixRole::H, dt, sigma)?,
            Q: self.matrix_for(key, MatrixRole::Q, dt, sigma)?,
            R: self.matrix_for(key, MatrixRole::R, dt, sigma)?,
            B: self.matrix_for(key, MatrixRole::B, dt, sigma)?,
        })
    }
}

impl<T: MatrixProvider + ?Sized> MatrixProvider for Arc<T> {
    fn matrix_for(
        &self,
        key: &ModeKey,
        role: MatrixRole,
        dt: f64,
        sigma: Option<f64>,
    ) -> Result<DMat> {
        (**self).matrix_for(key, role, dt, sigma)
    }
}

// ---------------------------------------------------------------------------
// Constant table
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConstantMatrixProvider {
    matrices: BTreeMap<ModeKey, BTreeMap<MatrixRole, DMat>>,
}

impl ConstantMatrixProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ModeKey, role: MatrixRole, m: DMat) {
        self.matrices.entry(key).or_default().insert(role, m);
    }

    /// Register all six matrices of a mode.
    pub fn with_mode(mut self, key: impl Into<ModeKey>, m: ModelMatrices) -> Self {
        let key = key.into();
        let ModelMatrices { F, P, H, Q, R, B } = m;
        for (role, matrix) in [
            (MatrixRole::F, F),
            (MatrixRole::P, P),
            (MatrixRole::H, H),
            (MatrixRole::Q, Q),
            (MatrixRole::R, R),
            (MatrixRole::B, B),
        ] {
            self.insert(key.clone(), role, matrix);
        }
        self
    }
}

impl MatrixProvider for ConstantMatrixProvider {
    fn matrix_for(
        &self,
        key: &ModeKey,
        role: MatrixRole,
        _dt: f64,
        _sigma: Option<f64>,
    ) -> Result<DMat> {
        self.matrices
            .get(key)
            .and_then(|roles| roles.get(&role))
            .cloned()
            .ok_or_else(|| ImmError::MissingMatrix {
                key: key.clone(),
                role,
            })
    }
}

// ---------------------------------------------------------------------------
// Kinematic models
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Motion {
    ConstantVelocity,
    ConstantAcceleration,
}

impl Motion {
    /// States per axis.
    pub fn order(self) -> usize {
        match self {
            Self::ConstantVelocity => 2,
            Self::ConstantAcceleration => 3,
        }
    }

    /// Native dimension for two axes.
    pub fn dim(self) -> usize {
        2 * self.order()
    }

    fn transition_block(self, dt: f64) -> DMat {
        match self {
            Self::ConstantVelocity => DMat::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]),
            #[rustfmt::skip]
            Self::ConstantAcceleration => DMat::from_row_slice(3, 3, &[
                1.0, dt,  dt * dt / 2.0,
                0.0, 1.0, dt,
                0.0, 0.0, 1.0,
            ]),
        }
    }

    fn noise_block(self, dt: f64, sigma: f64) -> DMat {
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let block = match self {
            Self::ConstantVelocity => DMat::from_row_slice(2, 2, &[dt3 / 3.0, dt2 / 2.0, dt2 / 2.0, dt]),
            Self::ConstantAcceleration => {
                let dt4 = dt3 * dt;
                let dt5 = dt4 * dt;
                #[rustfmt::skip]
                let q = DMat::from_row_slice(3, 3, &[
                    dt5 / 20.0, dt4 / 8.0, dt3 / 6.0,
                    dt4 / 8.0,  dt3 / 2.0, dt2 / 2.0,
                    dt3 / 6.0,  dt2 / 2.0, dt,
                ]);
                q
            }
        };
        block * sigma
    }

    fn two_axis(block: &DMat) -> DMat {
        let k = block.nrows();
        let mut m = DMat::zeros(2 * k, 2 * k);
        m.view_mut((0, 0), (k, k)).copy_from(block);
        m.view_mut((k, k), (k, k)).copy_from(block);
        m
    }
}

/// Constant matrices of one kinematic mode; F and Q come from [`Motion`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct KinematicMode {
    pub motion: Motion,
    /// Used when the caller passes no σ
    pub sigma: f64,
    pub P: DMat,
    pub H: DMat,
    pub R: DMat,
    pub B: DMat,
}

impl KinematicMode {
    /// Position-only measurement, unit covariances, two-input control matrix of zeros.
    pub fn new(motion: Motion) -> Self {
        let d = motion.dim();
        let k = motion.order();
        let mut h = DMat::zeros(d, d);
        h[(0, 0)] = 1.0;
        h[(k, k)] = 1.0;
        Self {
            motion,
            sigma: 1.0,
            P: DMat::identity(d, d),
            H: h,
            R: DMat::identity(d, d),
            B: DMat::zeros(d, 2),
        }
    }

    pub fn constant_velocity() -> Self {
        Self::new(Motion::ConstantVelocity)
    }

    pub fn constant_acceleration() -> Self {
        Self::new(Motion::ConstantAcceleration)
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn with_covariance(mut self, p: DMat) -> Self {
        self.P = p;
        self
    }

    pub fn with_measurement(mut self, h: DMat, r: DMat) -> Self {
        self.H = h;
        self.R = r;
        self
    }

    pub fn with_measurement_noise(mut self, r: DMat) -> Self {
        self.R = r;
        self
    }

    pub fn with_control(mut self, b: DMat) -> Self {
        self.B = b;
        self
    }

    pub fn transition(&self, dt: f64) -> DMat {
        Motion::two_axis(&self.motion.transition_block(dt))
    }

    pub fn process_noise(&self, dt: f64, sigma: f64) -> DMat {
        Motion::two_axis(&self.motion.noise_block(dt, sigma))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KinematicMatrixProvider {
    modes: BTreeMap<ModeKey, KinematicMode>,
}

impl KinematicMatrixProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, key: impl Into<ModeKey>, mode: KinematicMode) -> Self {
        self.modes.insert(key.into(), mode);
        self
    }

    pub fn mode(&self, key: &ModeKey) -> Option<&KinematicMode> {
        self.modes.get(key)
    }
}

impl MatrixProvider for KinematicMatrixProvider {
    fn matrix_for(
        &self,
        key: &ModeKey,
        role: MatrixRole,
        dt: f64,
        sigma: Option<f64>,
    ) -> Result<DMat> {
        let mode = self.modes.get(key).ok_or_else(|| ImmError::MissingMatrix {
            key: key.clone(),
            role,
        })?;
        Ok(match role {
            MatrixRole::F => mode.transition(dt),
            MatrixRole::Q => mode.process_noise(dt, sigma.unwrap_or(mode.sigma)),
            MatrixRole::P => mode.P.clone(),
            MatrixRole::H => mode.H.clone(),
            MatrixRole::R => mode.R.clone(),
            MatrixRole::B => mode.B.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn constant_provider_reports_missing_roles() {
        let mut p = ConstantMatrixProvider::new();
        let key = ModeKey::from("kf");
        p.insert(key.clone(), MatrixRole::F, DMat::identity(2, 2));
        assert!(p.matrix_for(&key, MatrixRole::F, 3.0, None).is_ok());
        assert_eq!(
            p.matrix_for(&key, MatrixRole::Q, 3.0, None).unwrap_err(),
            ImmError::MissingMatrix { key: key.clone(), role: MatrixRole::Q }
        );
        assert!(p.matrices_for(&key, 0.0, None).is_err());
    }

    #[test]
    fn constant_acceleration_transition() {
        let mode = KinematicMode::constant_acceleration();
        let f = mode.transition(2.0);
        assert_eq!(f.shape(), (6, 6));
        assert_abs_diff_eq!(f[(0, 1)], 2.0);
        assert_abs_diff_eq!(f[(0, 2)], 2.0);
        assert_abs_diff_eq!(f[(1, 2)], 2.0);
        assert_abs_diff_eq!(f[(3, 4)], 2.0);
        assert_abs_diff_eq!(f[(3, 5)], 2.0);
        assert_abs_diff_eq!(f[(0, 3)], 0.0);
        assert_eq!(mode.transition(0.0), DMat::identity(6, 6));
    }

    #[test]
    fn constant_acceleration_noise_at_unit_dt() {
        let mode = KinematicMode::constant_acceleration();
        let q = mode.process_noise(1.0, 1.0);
        assert_abs_diff_eq!(q[(0, 0)], 0.05);
        assert_abs_diff_eq!(q[(0, 1)], 0.125);
        assert_abs_diff_eq!(q[(2, 0)], 1.0 / 6.0);
        assert_abs_diff_eq!(q[(5, 5)], 1.0);
        assert_abs_diff_eq!(q[(0, 3)], 0.0);
        assert_eq!(q, q.transpose());
    }

    #[test]
    fn constant_velocity_shapes() {
        let mode = KinematicMode::constant_velocity().with_sigma(4.0);
        let provider = KinematicMatrixProvider::new().with_mode("cv", mode);
        let m = provider.matrices_for(&ModeKey::from("cv"), 0.5, None).unwrap();
        assert_eq!(m.F.shape(), (4, 4));
        assert_abs_diff_eq!(m.F[(2, 3)], 0.5);
        assert_abs_diff_eq!(m.Q[(1, 1)], 4.0 * 0.5);
        assert_abs_diff_eq!(m.Q[(0, 0)], 4.0 * 0.125 / 3.0);
        assert_eq!(m.H[(2, 2)], 1.0);
        assert_eq!(m.H[(1, 1)], 0.0);
        assert_eq!(m.B.shape(), (4, 2));
    }

    #[test]
    fn explicit_sigma_overrides_mode_default() {
        let provider =
            KinematicMatrixProvider::new().with_mode("ca", KinematicMode::constant_acceleration());
        let key = ModeKey::from("ca");
        let q1 = provider.matrix_for(&key, MatrixRole::Q, 1.0, None).unwrap();
        let q3 = provider.matrix_for(&key, MatrixRole::Q, 1.0, Some(3.0)).unwrap();
        assert_abs_diff_eq!(q3, q1 * 3.0, epsilon = 1e-12);
    }
}
