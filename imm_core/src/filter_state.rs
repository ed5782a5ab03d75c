//! Per-mode filter data.

use serde::{Deserialize, Serialize};

use crate::types::{DMat, DVec};

/// State, covariance, phase snapshots and model matrices of one mode filter.
///
/// `x`, `P` and the prior/posterior snapshots live in the mode's native
/// dimension `d`. `S` and `error` are stored already expanded to the
/// canonical dimension so likelihoods of different modes are comparable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct FilterState {
    pub x: DVec,
    pub P: DMat,
    pub x_prior: DVec,
    pub P_prior: DMat,
    pub x_post: DVec,
    pub P_post: DMat,
    pub F: DMat,
    pub H: DMat,
    pub Q: DMat,
    pub R: DMat,
    pub B: DMat,
    /// Innovation covariance, canonical dimension
    pub S: DMat,
    /// Innovation, canonical dimension
    pub error: DVec,
}

/// Time-dependent matrices refreshed by `prepare`.
#[derive(Clone, Debug, PartialEq)]
#[allow(non_snake_case)]
pub struct ModelMatrices {
    pub F: DMat,
    pub P: DMat,
    pub H: DMat,
    pub Q: DMat,
    pub R: DMat,
    pub B: DMat,
}

impl FilterState {
    /// Fresh state at `x` with the given model matrices; snapshots start at
    /// the initial state and innovation terms start empty.
    pub fn new(x: DVec, matrices: ModelMatrices, canonical_dim: usize) -> Self {
        let ModelMatrices { F, P, H, Q, R, B } = matrices;
        Self {
            x_prior: x.clone(),
            x_post: x.clone(),
            P_prior: P.clone(),
            P_post: P.clone(),
            x,
            P,
            F,
            H,
            Q,
            R,
            B,
            S: DMat::identity(canonical_dim, canonical_dim),
            error: DVec::zeros(canonical_dim),
        }
    }

    /// Native state dimension.
    pub fn dim(&self) -> usize {
        self.x.len()
    }

    /// Replace the time-dependent matrices, keeping state and snapshots.
    pub fn set_matrices(&mut self, matrices: ModelMatrices) {
        self.F = matrices.F;
        self.P = matrices.P;
        self.H = matrices.H;
        self.Q = matrices.Q;
        self.R = matrices.R;
        self.B = matrices.B;
    }

    /// Adopt the predicted snapshot as the working state.
    pub fn promote_prior(&mut self) {
        self.x = self.x_prior.clone();
        self.P = self.P_prior.clone();
    }
}
