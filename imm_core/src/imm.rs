//! Interacting Multiple Model (IMM) estimator.
//!
//! Orchestrates a bank of [`ModeFilter`]s over one target. Each
//! [`ImmEstimator::predict_and_update`] cycle runs:
//!
//! 1. Refresh every mode's F, P, H, Q, R, B for the elapsed `dt`.
//! 2. Mix: per-mode initial conditions from the mixing matrix.
//! 3. Shrink each mixed state to its mode, predict.
//! 4. Combine the prior estimate.
//! 5. Update every mode against the measurement.
//! 6. Recompute mode probabilities and the mixing matrix.
//! 7. Combine the posterior estimate.
//! 8. Advance the last-calculation time.
//!
//! The cycle runs on a working copy of the bank and is committed only when
//! every step succeeded. [`ImmEstimator::extrapolate`] runs steps 1 to 4 on a
//! copy and never commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{elapsed_secs, Clock, SystemClock};
use crate::config::{ConfigurationResolver, ImmConfig};
use crate::ekf::MeasurementModel;
use crate::error::{ImmError, Result};
use crate::kf::InnovationStatus;
use crate::mixer::{mixture, ModeMixer};
use crate::mode_filter::ModeFilter;
use crate::provider::MatrixProvider;
use crate::state_space::StateSpaceAdapter;
use crate::types::{DMat, DVec, Measurement, ModeKey};

// ---------------------------------------------------------------------------
// Combined estimate
// ---------------------------------------------------------------------------

/// Canonical combined estimate with its phase snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct FilterData {
    pub x: DVec,
    pub P: DMat,
    pub x_prior: DVec,
    pub P_prior: DMat,
    pub x_post: DVec,
    pub P_post: DMat,
    pub time_stamp: DateTime<Utc>,
}

impl FilterData {
    #[allow(non_snake_case)]
    fn at(x: DVec, P: DMat, time_stamp: DateTime<Utc>) -> Self {
        Self {
            x_prior: x.clone(),
            x_post: x.clone(),
            P_prior: P.clone(),
            P_post: P.clone(),
            x,
            P,
            time_stamp,
        }
    }
}

/// Recoverable diagnostics of one completed cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    /// Elapsed seconds used for the time-dependent matrices
    pub dt: f64,
    /// One [`ImmError::DegenerateInnovation`] per affected mode
    pub degenerate: Vec<ImmError>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.degenerate.is_empty()
    }
}

/// Result of mixing and predicting on a working copy of the bank.
struct PredictPath {
    filters: Vec<ModeFilter>,
    mixed_states: Vec<DVec>,
    mixed_covariances: Vec<DMat>,
    x: DVec,
    p: DMat,
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

/// IMM estimator for one target. Owns the mode-filter bank and the combined
/// estimate.
#[derive(Clone, Debug)]
pub struct ImmEstimator<P, C = SystemClock> {
    config: ImmConfig,
    adapter: StateSpaceAdapter,
    provider: P,
    clock: C,
    filters: Vec<ModeFilter>,
    mixer: ModeMixer,
    mode_probabilities: DVec,
    mixed_states: Vec<DVec>,
    mixed_covariances: Vec<DMat>,
    data: FilterData,
    previous_data: FilterData,
    last_calculation: DateTime<Utc>,
}

impl<P: MatrixProvider> ImmEstimator<P, SystemClock> {
    /// Estimator driven by UTC wall time.
    pub fn with_system_clock(
        initial_state: DVec,
        resolver: &impl ConfigurationResolver,
        provider: P,
    ) -> Result<Self> {
        Self::new(initial_state, resolver, provider, SystemClock)
    }
}

impl<P: MatrixProvider, C: Clock> ImmEstimator<P, C> {
    /// Build the bank around a canonical `initial_state`.
    ///
    /// Every mode starts at the (shrunk) initial state with its matrices for
    /// `dt = 0`. The combined covariance starts at zero and is immediately
    /// recombined from the modes.
    pub fn new(
        initial_state: DVec,
        resolver: &impl ConfigurationResolver,
        provider: P,
        clock: C,
    ) -> Result<Self> {
        let config = resolver.resolve()?;
        let adapter = config.adapter()?;
        let n = config.canonical_dim;
        if initial_state.len() != n {
            return Err(ImmError::dims("initial state", n, initial_state.len()));
        }

        let filters = config
            .modes
            .iter()
            .map(|mode| {
                let matrices = provider.matrices_for(&mode.key, 0.0, mode.sigma)?;
                ModeFilter::from_config(mode, &initial_state, matrices, &adapter, config.settings)
            })
            .collect::<Result<Vec<_>>>()?;

        let mode_probabilities = DVec::from_column_slice(&config.initial_mode_probabilities);
        let mut mixer = ModeMixer::new(config.markov_transition_matrix.clone());
        mixer.update_mixing_matrix(&mode_probabilities);

        let now = clock.now();
        let (x, p) = mixture(
            &filters,
            mode_probabilities.as_slice(),
            &adapter,
            &initial_state,
            Some(config.settings.zero_epsilon),
        )?;
        let data = FilterData::at(x, p, now);

        info!(
            modes = filters.len(),
            canonical_dim = n,
            "IMM estimator initialised"
        );

        let m = filters.len();
        Ok(Self {
            mixed_states: vec![DVec::zeros(n); m],
            mixed_covariances: vec![DMat::zeros(n, n); m],
            previous_data: data.clone(),
            data,
            config,
            adapter,
            provider,
            clock,
            filters,
            mixer,
            mode_probabilities,
            last_calculation: now,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn data(&self) -> &FilterData {
        &self.data
    }

    pub fn previous_data(&self) -> &FilterData {
        &self.previous_data
    }

    pub fn mode_probabilities(&self) -> &DVec {
        &self.mode_probabilities
    }

    pub fn mixing_matrix(&self) -> &DMat {
        self.mixer.mixing_matrix()
    }

    pub fn normalizers(&self) -> &DVec {
        self.mixer.normalizers()
    }

    pub fn mixed_states(&self) -> &[DVec] {
        &self.mixed_states
    }

    pub fn mixed_covariances(&self) -> &[DMat] {
        &self.mixed_covariances
    }

    pub fn last_calculation(&self) -> DateTime<Utc> {
        self.last_calculation
    }

    pub fn filters(&self) -> &[ModeFilter] {
        &self.filters
    }

    pub fn config(&self) -> &ImmConfig {
        &self.config
    }

    pub fn adapter(&self) -> &StateSpaceAdapter {
        &self.adapter
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Most probable mode and its probability.
    pub fn dominant_mode(&self) -> (&ModeKey, f64) {
        let mut best = 0;
        for (i, p) in self.mode_probabilities.iter().enumerate() {
            if *p > self.mode_probabilities[best] {
                best = i;
            }
        }
        (self.filters[best].key(), self.mode_probabilities[best])
    }

    /// Attach a measurement model to the extended filter of mode `key`.
    /// Returns `Ok(false)` if no such extended filter exists, `Err` if the
    /// model does not fit the mode's native state.
    pub fn set_measurement_model(
        &mut self,
        key: &ModeKey,
        model: Arc<dyn MeasurementModel>,
    ) -> Result<bool> {
        match self.filters.iter_mut().find(|f| f.key() == key) {
            Some(f) => f.set_measurement_model(model),
            None => Ok(false),
        }
    }

    // -----------------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------------

    /// Refresh every mode's time-dependent matrices for the time elapsed since
    /// the last completed cycle. Returns that `dt`.
    ///
    /// Does not advance the last-calculation time; only a completed
    /// [`Self::predict_and_update`] does.
    pub fn prepare(&mut self) -> Result<f64> {
        let dt = elapsed_secs(self.last_calculation, self.clock.now());
        refresh_matrices(&mut self.filters, &self.provider, &self.config, dt)?;
        Ok(dt)
    }

    /// One full estimation cycle against measurement `z`.
    ///
    /// `r` overrides every mode's measurement noise; `u` is the control input.
    pub fn predict_and_update(
        &mut self,
        z: &DVec,
        r: Option<&DMat>,
        u: Option<&DVec>,
    ) -> Result<CycleReport> {
        let now = self.clock.now();
        let dt = elapsed_secs(self.last_calculation, now);

        let PredictPath {
            mut filters,
            mixed_states,
            mixed_covariances,
            x: x_prior,
            p: p_prior,
        } = self.predict_path(dt, u)?;

        let mut degenerate = Vec::new();
        for f in filters.iter_mut() {
            if let InnovationStatus::Degenerate { determinant } = f.update(z, r)? {
                warn!(mode = %f.key(), determinant, "degenerate innovation covariance, likelihood floored");
                degenerate.push(ImmError::DegenerateInnovation {
                    key: f.key().clone(),
                    determinant,
                });
            }
        }

        let likelihoods: Vec<f64> = filters.iter().map(ModeFilter::likelihood).collect();
        let mode_probabilities = self.mixer.mode_probabilities(&likelihoods)?;
        let mut mixer = self.mixer.clone();
        mixer.update_mixing_matrix(&mode_probabilities);

        // Spread measured against the combined prior held at this point
        let (x_post, p_post) = mixture(
            &filters,
            mode_probabilities.as_slice(),
            &self.adapter,
            &x_prior,
            Some(self.config.settings.zero_epsilon),
        )?;

        debug!(
            dt,
            probabilities = ?mode_probabilities.as_slice(),
            "IMM cycle complete"
        );

        self.previous_data = self.data.clone();
        self.data = FilterData {
            x: x_post.clone(),
            P: p_post.clone(),
            x_prior,
            P_prior: p_prior,
            x_post,
            P_post: p_post,
            time_stamp: now,
        };
        self.filters = filters;
        self.mixed_states = mixed_states;
        self.mixed_covariances = mixed_covariances;
        self.mode_probabilities = mode_probabilities;
        self.mixer = mixer;
        self.last_calculation = now;

        Ok(CycleReport { dt, degenerate })
    }

    /// Convenience wrapper taking a [`Measurement`].
    pub fn process(&mut self, m: &Measurement) -> Result<CycleReport> {
        self.predict_and_update(&m.z, m.r.as_ref(), m.u.as_ref())
    }

    /// Hypothetical combined (state, covariance) at the current clock time.
    ///
    /// Nothing observable changes: filters, probabilities, snapshots and the
    /// last-calculation time are left as they were.
    pub fn extrapolate(&self, u: Option<&DVec>) -> Result<(DVec, DMat)> {
        let dt = elapsed_secs(self.last_calculation, self.clock.now());
        let path = self.predict_path(dt, u)?;
        Ok((path.x, path.p))
    }

    /// Steps 1 to 4 on a copy of the bank.
    fn predict_path(&self, dt: f64, u: Option<&DVec>) -> Result<PredictPath> {
        let mut filters = self.filters.clone();
        refresh_matrices(&mut filters, &self.provider, &self.config, dt)?;

        let (mixed_states, mixed_covariances) =
            self.mixer.mixed_states(&filters, &self.adapter, &self.data.x)?;

        for ((f, x), p) in filters.iter_mut().zip(&mixed_states).zip(&mixed_covariances) {
            let d = f.dim();
            let st = f.state_mut();
            st.x = self.adapter.shrink_vector(x, d)?;
            st.P = self.adapter.shrink_matrix(p, d)?;
            f.predict(u)?;
            f.state_mut().promote_prior();
        }

        let (x, p) = mixture(
            &filters,
            self.mode_probabilities.as_slice(),
            &self.adapter,
            &self.data.x,
            Some(self.config.settings.zero_epsilon),
        )?;

        Ok(PredictPath {
            filters,
            mixed_states,
            mixed_covariances,
            x,
            p,
        })
    }
}

fn refresh_matrices<P: MatrixProvider>(
    filters: &mut [ModeFilter],
    provider: &P,
    config: &ImmConfig,
    dt: f64,
) -> Result<()> {
    for (f, mode) in filters.iter_mut().zip(&config.modes) {
        let matrices = provider.matrices_for(&mode.key, dt, mode.sigma)?;
        let st = f.state_mut();
        st.set_matrices(matrices);
        crate::kf::check_model(&mode.key, st)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::filter_state::ModelMatrices;
    use crate::provider::{ConstantMatrixProvider, KinematicMatrixProvider, KinematicMode};
    use crate::types::{FilterType, LIKELIHOOD_FLOOR};
    use approx::assert_abs_diff_eq;

    fn initial_state() -> DVec {
        DVec::from_vec(vec![1., 2., 3., 1., 2., 3.])
    }

    /// Two constant-acceleration modes, P = 2I, R = I.
    fn kinematic_provider() -> KinematicMatrixProvider {
        let mode = KinematicMode::constant_acceleration().with_covariance(DMat::identity(6, 6) * 2.0);
        KinematicMatrixProvider::new()
            .with_mode("kf", mode.clone())
            .with_mode("kf1", mode)
    }

    fn estimator(
        provider: KinematicMatrixProvider,
    ) -> (ImmEstimator<KinematicMatrixProvider, ManualClock>, ManualClock) {
        let clock = ManualClock::default();
        let imm = ImmEstimator::new(initial_state(), &ImmConfig::default(), provider, clock.clone())
            .unwrap();
        (imm, clock)
    }

    fn assert_distribution(mu: &DVec) {
        assert_abs_diff_eq!(mu.sum(), 1.0, epsilon = 1e-9);
        for p in mu.iter() {
            assert!((0.0..=1.0).contains(p), "probability {p} out of range");
        }
    }

    #[test]
    fn construction_combines_initial_modes() {
        let (imm, _) = estimator(kinematic_provider());
        assert_eq!(imm.data().x, initial_state());
        assert_abs_diff_eq!(imm.data().P, DMat::identity(6, 6) * 2.0, epsilon = 1e-12);
        assert_eq!(imm.previous_data(), imm.data());
        assert_eq!(imm.filters().len(), 2);
        // c = markovᵀ·μ with μ = [0.5, 0.5]
        assert_abs_diff_eq!(imm.normalizers()[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(imm.mixing_matrix()[(0, 0)], 0.95, epsilon = 1e-12);
    }

    #[test]
    fn two_mode_predict_and_update_reference() {
        let (mut imm, clock) = estimator(kinematic_provider());
        clock.advance_secs(1.0);

        let z = DVec::from_element(6, 1.0);
        let report = imm.predict_and_update(&z, None, None).unwrap();
        assert!(report.is_clean());
        assert_abs_diff_eq!(report.dt, 1.0);

        let x = &imm.data().x;
        let expected = [1.630631, 3.029279, 2.264264, 1.630631, 3.029279, 2.264264];
        for (i, e) in expected.iter().enumerate() {
            assert_abs_diff_eq!(x[i], *e, epsilon = 1e-5);
        }
        // Published state is within 0.1 even at dt = 1 s
        let reference = [1.635, 3.030, 2.262, 1.635, 3.030, 2.262];
        for (i, r) in reference.iter().enumerate() {
            assert_abs_diff_eq!(x[i], *r, epsilon = 0.1);
        }

        // Spread term measured against the combined prior
        let p = &imm.data().P;
        assert_abs_diff_eq!(p[(0, 0)], 9.053100, epsilon = 1e-4);
        assert_abs_diff_eq!(p[(0, 1)], 6.217789, epsilon = 1e-4);
        assert_abs_diff_eq!(p[(1, 1)], 6.624168, epsilon = 1e-4);
        assert_abs_diff_eq!(p[(2, 2)], 3.296062, epsilon = 1e-4);
        assert_abs_diff_eq!(p[(0, 3)], 8.233281, epsilon = 1e-4);
        assert_abs_diff_eq!(p[(2, 5)], 0.541307, epsilon = 1e-4);
        assert_abs_diff_eq!(p, &p.transpose(), epsilon = 1e-9);

        // Identical modes: probabilities unchanged
        assert_abs_diff_eq!(imm.mode_probabilities()[0], 0.5, epsilon = 1e-12);
        assert_eq!(imm.data().x_post, imm.data().x);
        let prior = DVec::from_vec(vec![4.5, 5.0, 3.0, 4.5, 5.0, 3.0]);
        assert_abs_diff_eq!(imm.data().x_prior, prior, epsilon = 1e-12);
        assert_eq!(imm.previous_data().x, initial_state());
    }

    #[test]
    fn two_mode_cycle_matches_published_reference() {
        // The published figures were recorded about 2 ms past one second
        let (mut imm, clock) = estimator(kinematic_provider());
        clock.advance_secs(1.002);
        let z = DVec::from_element(6, 1.0);
        let report = imm.predict_and_update(&z, None, None).unwrap();
        assert_abs_diff_eq!(report.dt, 1.002, epsilon = 1e-12);

        let ref_state = DVec::from_vec(vec![1.63508, 3.02994, 2.26171, 1.63508, 3.02994, 2.26171]);
        #[rustfmt::skip]
        let ref_cov = DMat::from_row_slice(6, 6, &[
            9.10236, 6.25644, 2.33752,  8.27685, 5.68903, 2.12553,
            6.25644, 6.65581, 3.30734,  5.68903, 3.91031, 1.46096,
            2.33752, 3.30734, 3.3014,   2.12553, 1.46096, 0.545843,
            8.27685, 5.68903, 2.12553,  9.10236, 6.25644, 2.33752,
            5.68903, 3.91031, 1.46096,  6.25644, 6.65581, 3.30734,
            2.12553, 1.46096, 0.545843, 2.33752, 3.30734, 3.3014,
        ]);
        assert!((&imm.data().x - &ref_state).norm() < 0.1);
        assert!((&imm.data().P - &ref_cov).norm() < 0.1);
    }

    #[test]
    fn posterior_covariance_pinned_to_prior_reference() {
        // Modes that disagree, so the reference choice is visible
        let provider = KinematicMatrixProvider::new()
            .with_mode("kf", KinematicMode::constant_acceleration())
            .with_mode(
                "kf1",
                KinematicMode::constant_acceleration()
                    .with_measurement_noise(DMat::identity(6, 6) * 1000.0),
            );
        let (mut imm, clock) = estimator(provider);
        clock.advance_secs(1.0);
        imm.predict_and_update(&DVec::from_element(6, 1.0), None, None)
            .unwrap();

        let mu = imm.mode_probabilities();
        let reference = &imm.data().x_prior;
        let adapter = imm.adapter();
        let mut literal = DMat::zeros(6, 6);
        let mut centred = DMat::zeros(6, 6);
        for (f, w) in imm.filters().iter().zip(mu.iter()) {
            let x = adapter.expand_state(&f.state().x).unwrap();
            let p = adapter.expand_covariance(&f.state().P).unwrap();
            let d = &x - reference;
            literal += (&d * d.transpose() + &p) * *w;
            let d = &x - &imm.data().x;
            centred += (&d * d.transpose() + &p) * *w;
        }
        assert_abs_diff_eq!(imm.data().P, literal, epsilon = 1e-5);
        assert!((imm.data().P[(0, 0)] - centred[(0, 0)]).abs() > 1e-3);
    }

    #[test]
    fn probabilities_stay_a_distribution() {
        let provider = KinematicMatrixProvider::new()
            .with_mode("kf", KinematicMode::constant_acceleration())
            .with_mode(
                "kf1",
                KinematicMode::constant_acceleration()
                    .with_measurement_noise(DMat::identity(6, 6) * 1000.0),
            );
        let (mut imm, clock) = estimator(provider);

        // Accelerating target: x = t² on both axes
        for k in 1..=40 {
            clock.advance_secs(0.5);
            let t = k as f64 * 0.5;
            let wobble = if k % 3 == 0 { 4.0 } else { -2.0 };
            let z = DVec::from_vec(vec![t * t + wobble, 0.0, 0.0, t * t - wobble, 0.0, 0.0]);
            imm.predict_and_update(&z, None, None).unwrap();
            assert_distribution(imm.mode_probabilities());
            for f in imm.filters() {
                assert!(f.likelihood() >= LIKELIHOOD_FLOOR);
            }
            assert_eq!(imm.data().x.len(), 6);
            assert_eq!(imm.data().P.shape(), (6, 6));
        }
        let (key, p) = imm.dominant_mode();
        assert!(p >= 0.5);
        assert_eq!(imm.filters().iter().filter(|f| f.key() == key).count(), 1);
    }

    #[test]
    fn extrapolate_is_side_effect_free() {
        let (mut imm, clock) = estimator(kinematic_provider());
        clock.advance_secs(1.0);
        imm.predict_and_update(&DVec::from_element(6, 1.0), None, None)
            .unwrap();
        clock.advance_secs(1.0);

        let data = imm.data().clone();
        let previous = imm.previous_data().clone();
        let last = imm.last_calculation();
        let mu = imm.mode_probabilities().clone();
        let filters: Vec<_> = imm.filters().iter().map(|f| f.state().clone()).collect();

        let first = imm.extrapolate(None).unwrap();
        for _ in 0..3 {
            assert_eq!(imm.extrapolate(None).unwrap(), first);
        }
        assert_eq!(imm.data(), &data);
        assert_eq!(imm.previous_data(), &previous);
        assert_eq!(imm.last_calculation(), last);
        assert_eq!(imm.mode_probabilities(), &mu);
        for (f, st) in imm.filters().iter().zip(&filters) {
            assert_eq!(f.state(), st);
        }
        assert_eq!(first.0.len(), 6);
        assert_eq!(first.1.shape(), (6, 6));
    }

    #[test]
    fn extrapolate_from_construction() {
        let (imm, clock) = estimator(kinematic_provider());
        clock.advance_secs(1.0);
        let (x, p) = imm.extrapolate(None).unwrap();
        let expected = DVec::from_vec(vec![4.5, 5.0, 3.0, 4.5, 5.0, 3.0]);
        assert_abs_diff_eq!(x, expected, epsilon = 1e-12);
        // Prior covariance plus spread from the initial state
        assert_abs_diff_eq!(p[(0, 0)], 4.55 + 3.5 * 3.5, epsilon = 1e-9);
        assert_abs_diff_eq!(p[(0, 1)], 3.125 + 3.5 * 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p[(0, 3)], 3.5 * 3.5, epsilon = 1e-9);
        assert_abs_diff_eq!(p[(2, 2)], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn control_input_shifts_prediction() {
        let b = DMat::from_row_slice(6, 2, &[
            0., 0., //
            0., 0., //
            1., 0., //
            0., 0., //
            0., 0., //
            0., 1., //
        ]);
        let mode = KinematicMode::constant_acceleration().with_control(b);
        let provider = KinematicMatrixProvider::new()
            .with_mode("kf", mode.clone())
            .with_mode("kf1", mode);
        let (imm, clock) = estimator(provider);
        clock.advance_secs(1.0);
        let (plain, _) = imm.extrapolate(None).unwrap();
        let (pushed, _) = imm.extrapolate(Some(&DVec::from_vec(vec![2.0, -2.0]))).unwrap();
        assert_abs_diff_eq!(pushed[2] - plain[2], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pushed[5] - plain[5], -2.0, epsilon = 1e-9);
        assert!(imm.extrapolate(Some(&DVec::zeros(3))).is_err());
    }

    #[test]
    fn degenerate_innovation_is_reported_not_fatal() {
        let zero = DMat::zeros(6, 6);
        let matrices = |p: DMat, r: DMat| ModelMatrices {
            F: DMat::identity(6, 6),
            P: p,
            H: DMat::identity(6, 6),
            Q: zero.clone(),
            R: r,
            B: DMat::zeros(6, 2),
        };
        let provider = ConstantMatrixProvider::new()
            .with_mode("kf", matrices(DMat::identity(6, 6), DMat::identity(6, 6)))
            .with_mode("kf1", matrices(zero.clone(), zero.clone()));
        // No switching, so the singular mode is never blended with the healthy one
        let config = ImmConfig {
            markov_transition_matrix: DMat::identity(2, 2),
            ..ImmConfig::default()
        };
        let clock = ManualClock::default();
        let mut imm = ImmEstimator::new(initial_state(), &config, provider, clock.clone()).unwrap();
        clock.advance_secs(1.0);

        let report = imm
            .predict_and_update(&DVec::from_element(6, 1.0), None, None)
            .unwrap();
        assert_eq!(report.degenerate.len(), 1);
        assert!(matches!(
            &report.degenerate[0],
            ImmError::DegenerateInnovation { key, .. } if key.as_str() == "kf1"
        ));
        assert!(report.degenerate[0].is_recoverable());
        assert_eq!(imm.filters()[1].likelihood(), LIKELIHOOD_FLOOR);
        assert_distribution(imm.mode_probabilities());
        assert!(imm.mode_probabilities()[1] > 0.0);
        assert!(imm.data().x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn reduced_mode_runs_through_expand_and_shrink() {
        let mut config = ImmConfig::velocity_acceleration();
        config.modes[1].filter_type = FilterType::ExtendedKalmanFilter.to_string();
        let provider = KinematicMatrixProvider::new()
            .with_mode("cv", KinematicMode::constant_velocity())
            .with_mode("ca", KinematicMode::constant_acceleration());
        let clock = ManualClock::default();
        let mut imm = ImmEstimator::new(initial_state(), &config, provider, clock.clone()).unwrap();
        assert_eq!(imm.filters()[0].dim(), 4);
        assert_eq!(imm.filters()[0].state().x.as_slice(), &[1., 2., 1., 2.]);

        for k in 1..=10 {
            clock.advance_secs(1.0);
            let t = k as f64;
            let z = DVec::from_vec(vec![1.0 + 2.0 * t, 0.0, 0.0, 1.0 + 2.0 * t, 0.0, 0.0]);
            imm.predict_and_update(&z, None, None).unwrap();
            assert_distribution(imm.mode_probabilities());
            assert_eq!(imm.filters()[0].state().error.len(), 6);
            assert_eq!(imm.filters()[0].state().S.shape(), (6, 6));
        }
        assert_eq!(imm.data().x.len(), 6);
        assert_eq!(imm.mixed_states()[0].len(), 6);
    }

    #[test]
    fn measurement_models_attach_to_extended_modes_only() {
        let mut config = ImmConfig::velocity_acceleration();
        config.modes[1].filter_type = FilterType::ExtendedKalmanFilter.to_string();
        let provider = KinematicMatrixProvider::new()
            .with_mode("cv", KinematicMode::constant_velocity())
            .with_mode("ca", KinematicMode::constant_acceleration());
        let mut imm =
            ImmEstimator::new(initial_state(), &config, provider, ManualClock::default()).unwrap();
        let model: Arc<dyn MeasurementModel> = Arc::new(crate::ekf::RangeBearing::new([0.0, 0.0], [0, 3]));

        assert!(imm.set_measurement_model(&ModeKey::from("ca"), model.clone()).unwrap());
        assert!(!imm.set_measurement_model(&ModeKey::from("cv"), model.clone()).unwrap());
        assert!(!imm.set_measurement_model(&ModeKey::from("ct"), model).unwrap());
    }

    #[test]
    fn measurement_model_outside_native_state_is_rejected() {
        let mut config = ImmConfig::velocity_acceleration();
        config.modes[0].filter_type = FilterType::ExtendedKalmanFilter.to_string();
        let provider = KinematicMatrixProvider::new()
            .with_mode("cv", KinematicMode::constant_velocity())
            .with_mode("ca", KinematicMode::constant_acceleration());
        let clock = ManualClock::default();
        let mut imm = ImmEstimator::new(initial_state(), &config, provider, clock.clone()).unwrap();

        // cv is 4-D; index 4 only exists in the canonical state
        let model: Arc<dyn MeasurementModel> = Arc::new(crate::ekf::RangeBearing::new([0.0, 0.0], [0, 4]));
        let err = imm.set_measurement_model(&ModeKey::from("cv"), model).unwrap_err();
        assert!(matches!(err, ImmError::DimensionMismatch { .. }));

        clock.advance_secs(1.0);
        let z = DVec::from_element(6, 1.0);
        assert!(imm.predict_and_update(&z, None, None).is_ok());
    }

    #[test]
    fn configuration_errors_are_fatal() {
        let clock = ManualClock::default();
        // Provider missing the second mode
        let provider = KinematicMatrixProvider::new().with_mode("kf", KinematicMode::constant_acceleration());
        let err = ImmEstimator::new(initial_state(), &ImmConfig::default(), provider, clock.clone())
            .unwrap_err();
        assert!(matches!(err, ImmError::MissingMatrix { .. }));

        let err = ImmEstimator::new(DVec::zeros(4), &ImmConfig::default(), kinematic_provider(), clock)
            .unwrap_err();
        assert!(matches!(err, ImmError::DimensionMismatch { .. }));
    }

    #[test]
    fn failed_cycle_leaves_estimator_untouched() {
        let (mut imm, clock) = estimator(kinematic_provider());
        clock.advance_secs(1.0);
        let before = imm.data().clone();
        let err = imm
            .predict_and_update(&DVec::zeros(5), None, None)
            .unwrap_err();
        assert!(matches!(err, ImmError::DimensionMismatch { .. }));
        assert_eq!(imm.data(), &before);
        assert_ne!(imm.last_calculation(), clock.now());
    }

    #[test]
    fn prepare_refreshes_matrices_without_advancing_time() {
        let (mut imm, clock) = estimator(kinematic_provider());
        clock.advance_secs(2.0);
        let last = imm.last_calculation();
        let dt = imm.prepare().unwrap();
        assert_abs_diff_eq!(dt, 2.0);
        assert_abs_diff_eq!(imm.filters()[0].state().F[(0, 1)], 2.0);
        assert_eq!(imm.last_calculation(), last);
    }
}
