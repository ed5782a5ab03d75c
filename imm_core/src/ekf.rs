//! Extended Kalman filter mode.
//!
//! Prediction is identical to the linear filter. The update linearises a
//! [`MeasurementModel`] around the predicted state: the innovation uses the
//! nonlinear h(x⁻) and the gain uses the Jacobian ∂h/∂x at x⁻.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EstimatorSettings;
use crate::error::{ImmError, Result};
use crate::filter_state::{FilterState, ModelMatrices};
use crate::kf::{self, InnovationStatus, KalmanFilter};
use crate::state_space::StateSpaceAdapter;
use crate::types::{DMat, DVec, ModeKey};

// ---------------------------------------------------------------------------
// Measurement models
// ---------------------------------------------------------------------------

/// Maps a native state into measurement space.
///
/// `h` is the mode's configured measurement matrix; linear models use it
/// directly, nonlinear ones may ignore it.
pub trait MeasurementModel: fmt::Debug + Send + Sync {
    /// Expected measurement h(x)
    fn predict(&self, x: &DVec, h: &DMat) -> DVec;

    /// Jacobian ∂h/∂x evaluated at `x`
    fn jacobian(&self, x: &DVec, h: &DMat) -> DMat;

    /// Innovation z − h(x). Override for angular components.
    fn residual(&self, z: &DVec, hx: &DVec) -> DVec {
        z - hx
    }

    /// Reject a model that does not fit a native state of dimension `dim`.
    fn check(&self, _dim: usize) -> Result<()> {
        Ok(())
    }
}

/// h(x) = H·x. With this model the extended filter behaves like the linear one.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LinearMeasurement;

impl MeasurementModel for LinearMeasurement {
    fn predict(&self, x: &DVec, h: &DMat) -> DVec {
        h * x
    }

    fn jacobian(&self, _x: &DVec, h: &DMat) -> DMat {
        h.clone()
    }
}

/// Range and bearing from a fixed sensor, z = [range, bearing].
///
/// `position` holds the indices of the x and y position components in the
/// mode's native state vector; the bearing is measured from the x axis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeBearing {
    pub origin: [f64; 2],
    pub position: [usize; 2],
}

impl RangeBearing {
    pub fn new(origin: [f64; 2], position: [usize; 2]) -> Self {
        Self { origin, position }
    }

    fn offsets(&self, x: &DVec) -> (f64, f64) {
        (
            x[self.position[0]] - self.origin[0],
            x[self.position[1]] - self.origin[1],
        )
    }
}

impl MeasurementModel for RangeBearing {
    fn predict(&self, x: &DVec, _h: &DMat) -> DVec {
        let (dx, dy) = self.offsets(x);
        DVec::from_vec(vec![(dx * dx + dy * dy).sqrt(), dy.atan2(dx)])
    }

    fn jacobian(&self, x: &DVec, _h: &DMat) -> DMat {
        let (dx, dy) = self.offsets(x);
        let r2 = (dx * dx + dy * dy).max(1e-6);
        let r = r2.sqrt();
        let mut j = DMat::zeros(2, x.len());
        j[(0, self.position[0])] = dx / r;
        j[(0, self.position[1])] = dy / r;
        j[(1, self.position[0])] = -dy / r2;
        j[(1, self.position[1])] = dx / r2;
        j
    }

    fn residual(&self, z: &DVec, hx: &DVec) -> DVec {
        let mut y = z - hx;
        y[1] = wrap_angle(y[1]);
        y
    }

    fn check(&self, dim: usize) -> Result<()> {
        match self.position.iter().find(|&&i| i >= dim) {
            Some(&i) => Err(ImmError::dims(
                "range-bearing position index",
                format!("< {dim}"),
                i,
            )),
            None => Ok(()),
        }
    }
}

/// Wrap an angle into (−π, π].
fn wrap_angle(a: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let w = (a + PI).rem_euclid(TAU) - PI;
    if w <= -PI {
        w + TAU
    } else {
        w
    }
}

// ---------------------------------------------------------------------------
// Extended Kalman filter
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ExtendedKalmanFilter {
    inner: KalmanFilter,
    model: Arc<dyn MeasurementModel>,
}

impl ExtendedKalmanFilter {
    pub fn new(
        key: ModeKey,
        initial_state: DVec,
        matrices: ModelMatrices,
        adapter: StateSpaceAdapter,
        settings: EstimatorSettings,
    ) -> Result<Self> {
        Ok(Self {
            inner: KalmanFilter::new(key, initial_state, matrices, adapter, settings)?,
            model: Arc::new(LinearMeasurement),
        })
    }

    /// Swap in a nonlinear measurement model.
    pub fn with_model(mut self, model: Arc<dyn MeasurementModel>) -> Result<Self> {
        self.set_model(model)?;
        Ok(self)
    }

    pub fn set_model(&mut self, model: Arc<dyn MeasurementModel>) -> Result<()> {
        model.check(self.inner.state().x.len())?;
        self.model = model;
        Ok(())
    }

    pub fn model(&self) -> &dyn MeasurementModel {
        self.model.as_ref()
    }

    pub fn key(&self) -> &ModeKey {
        self.inner.key()
    }

    pub fn state(&self) -> &FilterState {
        self.inner.state()
    }

    pub fn state_mut(&mut self) -> &mut FilterState {
        self.inner.state_mut()
    }

    pub fn innovation_status(&self) -> InnovationStatus {
        self.inner.innovation_status()
    }

    pub fn predict(&mut self, u: Option<&DVec>) -> Result<()> {
        self.inner.predict(u)
    }

    pub fn update(&mut self, z: &DVec, r: Option<&DMat>) -> Result<InnovationStatus> {
        let KalmanFilter {
            state,
            adapter,
            settings,
            status,
            ..
        } = &mut self.inner;

        self.model.check(state.x_prior.len())?;
        let hx = self.model.predict(&state.x_prior, &state.H);
        let (z, r) = if hx.len() == state.H.nrows() {
            kf::measurement_in_mode_space(state, adapter, z, r)?
        } else {
            // Nonlinear models define their own measurement space
            (z.clone(), r.cloned().unwrap_or_else(|| state.R.clone()))
        };
        if hx.len() != z.len() {
            return Err(ImmError::dims("measurement", hx.len(), z.len()));
        }
        if r.shape() != (z.len(), z.len()) {
            let m = z.len();
            return Err(ImmError::dims(
                "measurement noise",
                format!("{m}x{m}"),
                format!("{}x{}", r.nrows(), r.ncols()),
            ));
        }

        let jac = self.model.jacobian(&state.x_prior, &state.H);
        let y = self.model.residual(&z, &hx);
        *status = kf::correct(state, y, &jac, &r, adapter, settings)?;
        Ok(*status)
    }

    pub fn likelihood(&self) -> f64 {
        self.inner.likelihood()
    }
}
