//! Closed set of mode filters, resolved once at construction.

use std::sync::Arc;

use crate::config::{EstimatorSettings, ModeConfig};
use crate::ekf::{ExtendedKalmanFilter, MeasurementModel};
use crate::error::Result;
use crate::filter_state::{FilterState, ModelMatrices};
use crate::kf::{InnovationStatus, KalmanFilter};
use crate::state_space::StateSpaceAdapter;
use crate::types::{DMat, DVec, FilterType, ModeKey};

#[derive(Clone, Debug)]
pub enum ModeFilter {
    Kalman(KalmanFilter),
    Extended(ExtendedKalmanFilter),
}

impl ModeFilter {
    /// Build the filter for `mode` from its configured type tag.
    ///
    /// `initial_state` is canonical and shrunk to the mode's native dimension.
    /// An unknown type tag is a configuration error.
    pub fn from_config(
        mode: &ModeConfig,
        initial_state: &DVec,
        matrices: ModelMatrices,
        adapter: &StateSpaceAdapter,
        settings: EstimatorSettings,
    ) -> Result<Self> {
        let x = adapter.shrink_vector(initial_state, mode.dim)?;
        let key = mode.key.clone();
        Ok(match mode.filter_type()? {
            FilterType::KalmanFilter => {
                Self::Kalman(KalmanFilter::new(key, x, matrices, adapter.clone(), settings)?)
            }
            FilterType::ExtendedKalmanFilter => Self::Extended(ExtendedKalmanFilter::new(
                key,
                x,
                matrices,
                adapter.clone(),
                settings,
            )?),
        })
    }

    pub fn filter_type(&self) -> FilterType {
        match self {
            Self::Kalman(_) => FilterType::KalmanFilter,
            Self::Extended(_) => FilterType::ExtendedKalmanFilter,
        }
    }

    /// Human-readable variant name.
    pub fn info(&self) -> &'static str {
        match self {
            Self::Kalman(_) => "IMM Kalman Filter",
            Self::Extended(_) => "IMM Extended Kalman Filter",
        }
    }

    pub fn key(&self) -> &ModeKey {
        match self {
            Self::Kalman(f) => f.key(),
            Self::Extended(f) => f.key(),
        }
    }

    pub fn state(&self) -> &FilterState {
        match self {
            Self::Kalman(f) => f.state(),
            Self::Extended(f) => f.state(),
        }
    }

    pub fn state_mut(&mut self) -> &mut FilterState {
        match self {
            Self::Kalman(f) => f.state_mut(),
            Self::Extended(f) => f.state_mut(),
        }
    }

    pub fn dim(&self) -> usize {
        self.state().dim()
    }

    pub fn innovation_status(&self) -> InnovationStatus {
        match self {
            Self::Kalman(f) => f.innovation_status(),
            Self::Extended(f) => f.innovation_status(),
        }
    }

    /// Sets `x_prior` / `P_prior` only.
    pub fn predict(&mut self, u: Option<&DVec>) -> Result<()> {
        match self {
            Self::Kalman(f) => f.predict(u),
            Self::Extended(f) => f.predict(u),
        }
    }

    /// Sets `x`, `P`, the posterior snapshot, `S` and `error`.
    pub fn update(&mut self, z: &DVec, r: Option<&DMat>) -> Result<InnovationStatus> {
        match self {
            Self::Kalman(f) => f.update(z, r),
            Self::Extended(f) => f.update(z, r),
        }
    }

    pub fn likelihood(&self) -> f64 {
        match self {
            Self::Kalman(f) => f.likelihood(),
            Self::Extended(f) => f.likelihood(),
        }
    }

    /// Attach a measurement model. Only extended filters accept one; returns
    /// `Ok(false)` for a linear filter and `Err` for a model that does not
    /// fit the native state.
    pub fn set_measurement_model(&mut self, model: Arc<dyn MeasurementModel>) -> Result<bool> {
        match self {
            Self::Extended(f) => {
                f.set_model(model)?;
                Ok(true)
            }
            Self::Kalman(_) => Ok(false),
        }
    }
}
