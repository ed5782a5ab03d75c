//! Resolved filter-bank configuration.
//!
//! The estimator never reaches into global state: a fully resolved
//! [`ImmConfig`] is handed to it through a [`ConfigurationResolver`].
//! The default configuration is the two-mode constant-acceleration bank
//! over the canonical state `[x, vx, ax, y, vy, ay]`.

use serde::{Deserialize, Serialize};

use crate::error::{ImmError, Result};
use crate::state_space::StateSpaceAdapter;
use crate::types::{DMat, FilterType, ModeKey, CANONICAL_DIM, DEFAULT_ZERO_EPSILON, LIKELIHOOD_FLOOR};

// ---------------------------------------------------------------------------
// Numeric settings
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSettings {
    /// Elements with magnitude at or below this are snapped to zero.
    pub zero_epsilon: f64,
    /// Lower bound on every mode likelihood.
    pub likelihood_floor: f64,
    /// |det S| below this marks the innovation as degenerate.
    pub degenerate_det_epsilon: f64,
    /// Slack allowed when checking that probabilities sum to one.
    pub probability_tolerance: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            zero_epsilon: DEFAULT_ZERO_EPSILON,
            likelihood_floor: LIKELIHOOD_FLOOR,
            degenerate_det_epsilon: 1e-30,
            probability_tolerance: 1e-6,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-mode configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub key: ModeKey,
    /// Filter type tag, e.g. `"KalmanFilter"` or `"ExtendedKalmanFilter"`.
    pub filter_type: String,
    /// Native state dimension of this mode.
    pub dim: usize,
    /// Process-noise intensity handed to the matrix provider.
    pub sigma: Option<f64>,
}

impl ModeConfig {
    pub fn new(key: impl Into<ModeKey>, filter_type: FilterType, dim: usize) -> Self {
        Self {
            key: key.into(),
            filter_type: filter_type.to_string(),
            dim,
            sigma: None,
        }
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    pub fn filter_type(&self) -> Result<FilterType> {
        self.filter_type.parse()
    }
}

// ---------------------------------------------------------------------------
// Bank configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImmConfig {
    pub canonical_dim: usize,
    pub modes: Vec<ModeConfig>,
    pub initial_mode_probabilities: Vec<f64>,
    /// `[i][j]` = P(mode j now | mode i before); rows sum to one.
    pub markov_transition_matrix: DMat,
    pub expansion_matrix: DMat,
    pub expansion_matrix_covariance: DMat,
    pub expansion_matrix_innovation: DMat,
    pub shrinking_matrix: DMat,
    pub settings: EstimatorSettings,
}

impl Default for ImmConfig {
    fn default() -> Self {
        let n = CANONICAL_DIM;
        Self {
            canonical_dim: n,
            modes: vec![
                ModeConfig::new("kf", FilterType::KalmanFilter, n).with_sigma(1.0),
                ModeConfig::new("kf1", FilterType::KalmanFilter, n).with_sigma(1.0),
            ],
            initial_mode_probabilities: vec![0.5, 0.5],
            markov_transition_matrix: DMat::from_row_slice(2, 2, &[0.95, 0.05, 0.05, 0.95]),
            expansion_matrix: DMat::identity(n, n),
            expansion_matrix_covariance: DMat::identity(n, n),
            expansion_matrix_innovation: DMat::identity(n, n),
            shrinking_matrix: DMat::identity(n, n),
            settings: EstimatorSettings::default(),
        }
    }
}

impl ImmConfig {
    /// Constant-velocity mode `cv` (`[x, vx, y, vy]`) alongside a
    /// constant-acceleration mode `ca` in the canonical six-state space.
    ///
    /// Expanding the velocity mode fills the missing accelerations from the
    /// padding terms: `9·1·9` in `P`, `1.05` in the innovation.
    pub fn velocity_acceleration() -> Self {
        #[rustfmt::skip]
        let expansion = DMat::from_row_slice(6, 6, &[
            1., 0., 0., 0., 0., 0.,
            0., 1., 0., 0., 0., 0.,
            0., 0., 0., 0., 0., 0.,
            0., 0., 1., 0., 0., 0.,
            0., 0., 0., 1., 0., 0.,
            0., 0., 0., 0., 0., 0.,
        ]);
        #[rustfmt::skip]
        let covariance = DMat::from_row_slice(6, 6, &[
            1., 0., 0., 0., 0., 0.,
            0., 1., 0., 0., 0., 0.,
            0., 0., 0., 0., 9., 0.,
            0., 0., 1., 0., 0., 0.,
            0., 0., 0., 1., 0., 0.,
            0., 0., 0., 0., 0., 9.,
        ]);
        #[rustfmt::skip]
        let innovation = DMat::from_row_slice(6, 6, &[
            1., 0., 0., 0., 0.,   0.,
            0., 1., 0., 0., 0.,   0.,
            0., 0., 0., 0., 1.05, 0.,
            0., 0., 1., 0., 0.,   0.,
            0., 0., 0., 1., 0.,   0.,
            0., 0., 0., 0., 0.,   1.05,
        ]);
        #[rustfmt::skip]
        let shrink = DMat::from_row_slice(4, 6, &[
            1., 0., 0., 0., 0., 0.,
            0., 1., 0., 0., 0., 0.,
            0., 0., 0., 1., 0., 0.,
            0., 0., 0., 0., 1., 0.,
        ]);
        Self {
            modes: vec![
                ModeConfig::new("cv", FilterType::KalmanFilter, 4),
                ModeConfig::new("ca", FilterType::KalmanFilter, CANONICAL_DIM),
            ],
            expansion_matrix: expansion,
            expansion_matrix_covariance: covariance,
            expansion_matrix_innovation: innovation,
            shrinking_matrix: shrink,
            ..Self::default()
        }
    }

    pub fn mode_count(&self) -> usize {
        self.modes.len()
    }

    /// Expand / shrink operators described by this configuration.
    pub fn adapter(&self) -> Result<StateSpaceAdapter> {
        StateSpaceAdapter::new(
            self.canonical_dim,
            self.expansion_matrix.clone(),
            self.expansion_matrix_covariance.clone(),
            self.expansion_matrix_innovation.clone(),
            self.shrinking_matrix.clone(),
        )
    }

    /// Check everything the estimator relies on. Any failure is fatal.
    pub fn validate(&self) -> Result<()> {
        let m = self.modes.len();
        if m == 0 {
            return Err(ImmError::NoModes);
        }
        let tol = self.settings.probability_tolerance;

        if self.initial_mode_probabilities.len() != m {
            return Err(ImmError::dims(
                "initial mode probabilities",
                m,
                self.initial_mode_probabilities.len(),
            ));
        }
        check_distribution("initial mode probabilities", &self.initial_mode_probabilities, tol)?;

        let markov = &self.markov_transition_matrix;
        if markov.shape() != (m, m) {
            return Err(ImmError::dims(
                "Markov transition matrix",
                format!("{m}x{m}"),
                format!("{}x{}", markov.nrows(), markov.ncols()),
            ));
        }
        for (i, row) in markov.row_iter().enumerate() {
            let row: Vec<f64> = row.iter().copied().collect();
            check_distribution(&format!("Markov row {i}"), &row, tol)?;
        }

        let adapter = self.adapter()?;
        for mode in &self.modes {
            mode.filter_type()?;
            if !adapter.supports(mode.dim) {
                return Err(ImmError::dims(
                    format!("native dimension of mode '{}'", mode.key),
                    format!("{} or {}", self.canonical_dim, adapter.shrunk_dim()),
                    mode.dim,
                ));
            }
        }
        Ok(())
    }
}

fn check_distribution(what: &str, p: &[f64], tol: f64) -> Result<()> {
    if let Some(bad) = p.iter().find(|v| !(0.0..=1.0).contains(*v)) {
        return Err(ImmError::InvalidProbabilities(format!(
            "{what} contains {bad}, outside [0, 1]"
        )));
    }
    let sum: f64 = p.iter().sum();
    if (sum - 1.0).abs() > tol {
        return Err(ImmError::InvalidProbabilities(format!(
            "{what} sums to {sum}, not 1"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolver seam
// ---------------------------------------------------------------------------

/// Supplies a validated configuration at construction time.
pub trait ConfigurationResolver {
    fn resolve(&self) -> Result<ImmConfig>;
}

impl ConfigurationResolver for ImmConfig {
    fn resolve(&self) -> Result<ImmConfig> {
        self.validate()?;
        Ok(self.clone())
    }
}
