//! Linear Kalman filter mode.
//!
//! # Predict
//! x⁻ = F·x + B·u,  P⁻ = F·P·Fᵀ + Q
//!
//! # Update
//! y = z − H·x⁻,  S = H·P⁻·Hᵀ + R,  K = P⁻·Hᵀ·S⁻¹
//! x⁺ = x⁻ + K·y,  P⁺ = (I−KH)·P⁻·(I−KH)ᵀ + K·R·Kᵀ  (Joseph form)
//!
//! Every result is passed through [`ZeroSmall`]. The prediction and the
//! correction are free functions so the extended filter reuses them with its
//! own h(x) and Jacobian.

use serde::{Deserialize, Serialize};

use crate::config::EstimatorSettings;
use crate::error::{ImmError, Result};
use crate::filter_state::{FilterState, ModelMatrices};
use crate::numerics::{floored_likelihood, gaussian_log_pdf, is_degenerate, ZeroSmall};
use crate::state_space::StateSpaceAdapter;
use crate::types::{DMat, DVec, ModeKey};

// ---------------------------------------------------------------------------
// Innovation health
// ---------------------------------------------------------------------------

/// Outcome of the most recent update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum InnovationStatus {
    #[default]
    Nominal,
    /// S could not support a density. The likelihood is floored for this cycle.
    Degenerate { determinant: f64 },
}

impl InnovationStatus {
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Degenerate { .. })
    }
}

// ---------------------------------------------------------------------------
// Kalman filter
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct KalmanFilter {
    pub(crate) key: ModeKey,
    pub(crate) state: FilterState,
    pub(crate) adapter: StateSpaceAdapter,
    pub(crate) settings: EstimatorSettings,
    pub(crate) status: InnovationStatus,
}

impl KalmanFilter {
    pub fn new(
        key: ModeKey,
        initial_state: DVec,
        matrices: ModelMatrices,
        adapter: StateSpaceAdapter,
        settings: EstimatorSettings,
    ) -> Result<Self> {
        let state = FilterState::new(initial_state, matrices, adapter.canonical_dim());
        check_model(&key, &state)?;
        Ok(Self {
            key,
            state,
            adapter,
            settings,
            status: InnovationStatus::Nominal,
        })
    }

    pub fn key(&self) -> &ModeKey {
        &self.key
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut FilterState {
        &mut self.state
    }

    pub fn innovation_status(&self) -> InnovationStatus {
        self.status
    }

    pub fn predict(&mut self, u: Option<&DVec>) -> Result<()> {
        predict_state(&mut self.state, u, self.settings.zero_epsilon)
    }

    pub fn update(&mut self, z: &DVec, r: Option<&DMat>) -> Result<InnovationStatus> {
        let (z, r) = measurement_in_mode_space(&self.state, &self.adapter, z, r)?;
        let h = self.state.H.clone();
        let y = &z - &h * &self.state.x_prior;
        self.status = correct(&mut self.state, y, &h, &r, &self.adapter, &self.settings)?;
        Ok(self.status)
    }

    /// Density of the last innovation under N(0, S), floored.
    pub fn likelihood(&self) -> f64 {
        likelihood_of(&self.state, self.status, &self.settings)
    }
}

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

/// Validate matrix shapes against the native state dimension.
pub(crate) fn check_model(key: &ModeKey, st: &FilterState) -> Result<()> {
    let d = st.dim();
    for (role, m) in [("F", &st.F), ("P", &st.P), ("Q", &st.Q)] {
        if m.shape() != (d, d) {
            return Err(ImmError::dims(
                format!("{role} of mode '{key}'"),
                format!("{d}x{d}"),
                format!("{}x{}", m.nrows(), m.ncols()),
            ));
        }
    }
    if st.H.ncols() != d {
        return Err(ImmError::dims(format!("H columns of mode '{key}'"), d, st.H.ncols()));
    }
    let m = st.H.nrows();
    if st.R.shape() != (m, m) {
        return Err(ImmError::dims(
            format!("R of mode '{key}'"),
            format!("{m}x{m}"),
            format!("{}x{}", st.R.nrows(), st.R.ncols()),
        ));
    }
    if st.B.nrows() != d {
        return Err(ImmError::dims(format!("B rows of mode '{key}'"), d, st.B.nrows()));
    }
    Ok(())
}

pub(crate) fn predict_state(st: &mut FilterState, u: Option<&DVec>, eps: f64) -> Result<()> {
    let mut x = &st.F * &st.x;
    if let Some(u) = u {
        if st.B.ncols() != u.len() {
            return Err(ImmError::dims("control input", st.B.ncols(), u.len()));
        }
        x += &st.B * u;
    }
    st.x_prior = x.zero_small(eps);
    st.P_prior = (&st.F * &st.P * st.F.transpose() + &st.Q).zero_small(eps);
    Ok(())
}

/// Bring `z` (and an explicit `R`) into the space `H` maps onto.
///
/// A canonical-dimension measurement for a reduced mode is shrunk first.
pub(crate) fn measurement_in_mode_space(
    st: &FilterState,
    adapter: &StateSpaceAdapter,
    z: &DVec,
    r: Option<&DMat>,
) -> Result<(DVec, DMat)> {
    let m = st.H.nrows();
    let d = st.dim();
    let n = adapter.canonical_dim();
    let shrink = z.len() != m && z.len() == n && m == d;
    let z = if shrink {
        adapter.shrink_vector(z, d)?
    } else if z.len() == m {
        z.clone()
    } else {
        return Err(ImmError::dims("measurement", m, z.len()));
    };
    let r = match r {
        Some(r) if r.shape() == (m, m) => r.clone(),
        Some(r) if shrink && r.shape() == (n, n) => adapter.shrink_matrix(r, d)?,
        Some(r) => {
            return Err(ImmError::dims(
                "measurement noise",
                format!("{m}x{m}"),
                format!("{}x{}", r.nrows(), r.ncols()),
            ))
        }
        None => st.R.clone(),
    };
    Ok((z, r))
}

/// Correction step given an innovation `y` and the linearised measurement `h`.
///
/// When S cannot be inverted the prior is kept as the posterior.
pub(crate) fn correct(
    st: &mut FilterState,
    y: DVec,
    h: &DMat,
    r: &DMat,
    adapter: &StateSpaceAdapter,
    settings: &EstimatorSettings,
) -> Result<InnovationStatus> {
    let eps = settings.zero_epsilon;
    let d = st.dim();
    if h.shape() != (y.len(), d) {
        return Err(ImmError::dims(
            "measurement Jacobian",
            format!("{}x{d}", y.len()),
            format!("{}x{}", h.nrows(), h.ncols()),
        ));
    }

    let s = (h * &st.P_prior * h.transpose() + r).zero_small(eps);
    let det = s.determinant();

    let inverted = s.clone().lu().try_inverse();
    match &inverted {
        Some(s_inv) => {
            let k = (&st.P_prior * h.transpose() * s_inv).zero_small(eps);
            st.x_post = (&st.x_prior + &k * &y).zero_small(eps);
            let i_kh = DMat::identity(d, d) - &k * h;
            st.P_post =
                (&i_kh * &st.P_prior * i_kh.transpose() + &k * r * k.transpose()).zero_small(eps);
        }
        None => {
            st.x_post = st.x_prior.clone();
            st.P_post = st.P_prior.clone();
        }
    }
    st.x = st.x_post.clone();
    st.P = st.P_post.clone();
    st.S = adapter.expand_innovation_covariance(&s)?;
    st.error = adapter.expand_innovation(&y)?;

    let expanded_det = st.S.determinant();
    let degenerate = inverted.is_none()
        || is_degenerate(det, settings.degenerate_det_epsilon)
        || is_degenerate(expanded_det, settings.degenerate_det_epsilon);
    Ok(if degenerate {
        InnovationStatus::Degenerate { determinant: det }
    } else {
        InnovationStatus::Nominal
    })
}

pub(crate) fn likelihood_of(
    st: &FilterState,
    status: InnovationStatus,
    settings: &EstimatorSettings,
) -> f64 {
    if status.is_degenerate() {
        return settings.likelihood_floor;
    }
    floored_likelihood(
        gaussian_log_pdf(&st.error, &st.S, settings.degenerate_det_epsilon),
        settings.likelihood_floor,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
