//! Fundamental types used across the entire workspace.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ImmError;

// ---------------------------------------------------------------------------
// Scalar type: f64 throughout for numerical precision in the filter bank.
// ---------------------------------------------------------------------------

/// Generic dynamic-size vector (states, innovations, control inputs)
pub type DVec = DVector<f64>;

/// Generic dynamic-size matrix (covariances, F, H, Q, R, B, S)
pub type DMat = DMatrix<f64>;

/// Default canonical state dimension: [x, vx, ax, y, vy, ay]
pub const CANONICAL_DIM: usize = 6;

/// Smallest likelihood a mode may report. Never zero, so a mode can always recover.
pub const LIKELIHOOD_FLOOR: f64 = 1e-18;

/// Elements with magnitude at or below this are snapped to zero.
pub const DEFAULT_ZERO_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Mode key: opaque string naming one motion-model hypothesis
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModeKey(pub String);

impl ModeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModeKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Filter type tag, resolved once at construction
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterType {
    KalmanFilter,
    ExtendedKalmanFilter,
}

impl FromStr for FilterType {
    type Err = ImmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KalmanFilter" => Ok(Self::KalmanFilter),
            "ExtendedKalmanFilter" => Ok(Self::ExtendedKalmanFilter),
            other => Err(ImmError::UnknownFilterType(other.to_owned())),
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KalmanFilter => f.write_str("KalmanFilter"),
            Self::ExtendedKalmanFilter => f.write_str("ExtendedKalmanFilter"),
        }
    }
}

// ---------------------------------------------------------------------------
// Matrix roles served by a MatrixProvider
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatrixRole {
    /// State transition
    F,
    /// State covariance
    P,
    /// Measurement
    H,
    /// Process noise
    Q,
    /// Measurement noise
    R,
    /// Control input
    B,
}

impl fmt::Display for MatrixRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::F => "F",
            Self::P => "P",
            Self::H => "H",
            Self::Q => "Q",
            Self::R => "R",
            Self::B => "B",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Measurement handed to an estimator for one cycle
// ---------------------------------------------------------------------------

/// Inputs for one `predict_and_update` cycle.
#[derive(Clone, Debug)]
pub struct Measurement {
    /// Measurement vector, canonical or mode-native dimension
    pub z: DVec,
    /// Explicit measurement noise; `None` uses each mode's own R
    pub r: Option<DMat>,
    /// External control input
    pub u: Option<DVec>,
}

impl Measurement {
    pub fn new(z: DVec) -> Self {
        Self { z, r: None, u: None }
    }

    pub fn with_noise(mut self, r: DMat) -> Self {
        self.r = Some(r);
        self
    }

    pub fn with_control(mut self, u: DVec) -> Self {
        self.u = Some(u);
        self
    }
}
