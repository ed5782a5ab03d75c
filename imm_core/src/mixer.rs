//! Mode mixing: Markov bookkeeping of mode probabilities and the
//! probability-weighted Gaussian mixtures built from the filter bank.
//!
//! # Conventions
//! - `markov[i][j]` = P(mode j now | mode i before)
//! - `c = markovᵀ·μ`, one normalising constant per target mode
//! - `mixing[i][j] = markov[i][j]·μᵢ / c[j]` = P(mode i before | mode j now)
//!
//! The spread term of every mixture is measured against a caller-supplied
//! reference state. The estimator passes the combined state it held when the
//! sum started, not the mean of the sum being formed.

use serde::{Deserialize, Serialize};

use crate::error::{ImmError, Result};
use crate::mode_filter::ModeFilter;
use crate::numerics::ZeroSmall;
use crate::state_space::StateSpaceAdapter;
use crate::types::{DMat, DVec};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeMixer {
    markov: DMat,
    normalizers: DVec,
    mixing: DMat,
}

impl ModeMixer {
    pub fn new(markov: DMat) -> Self {
        let m = markov.nrows();
        Self {
            markov,
            normalizers: DVec::zeros(m),
            mixing: DMat::zeros(m, m),
        }
    }

    pub fn markov(&self) -> &DMat {
        &self.markov
    }

    /// `c` from the most recent [`Self::update_mixing_matrix`].
    pub fn normalizers(&self) -> &DVec {
        &self.normalizers
    }

    pub fn mixing_matrix(&self) -> &DMat {
        &self.mixing
    }

    /// Recompute `c` and the mixing matrix from the current probabilities.
    ///
    /// A target mode no previous mode can reach (`c[j] = 0`) mixes only
    /// with itself.
    pub fn update_mixing_matrix(&mut self, mode_probabilities: &DVec) {
        let m = self.markov.nrows();
        self.normalizers = self.markov.transpose() * mode_probabilities;
        self.mixing = DMat::from_fn(m, m, |i, j| {
            let c = self.normalizers[j];
            if c > 0.0 {
                self.markov[(i, j)] * mode_probabilities[i] / c
            } else if i == j {
                1.0
            } else {
                0.0
            }
        });
    }

    /// Posterior mode probabilities `μᵢ = cᵢ·Lᵢ / Σ cₖ·Lₖ`.
    ///
    /// Uses the normalising constants from before the update. Should the
    /// total vanish, the predicted probabilities `c` are returned unchanged.
    pub fn mode_probabilities(&self, likelihoods: &[f64]) -> Result<DVec> {
        if likelihoods.len() != self.normalizers.len() {
            return Err(ImmError::dims(
                "likelihoods",
                self.normalizers.len(),
                likelihoods.len(),
            ));
        }
        let weighted = DVec::from_fn(likelihoods.len(), |i, _| {
            self.normalizers[i] * likelihoods[i]
        });
        let total = weighted.sum();
        if !(total > 0.0 && total.is_finite()) {
            return Ok(self.normalizers.clone());
        }
        Ok(weighted / total)
    }

    /// Canonical initial condition for every target mode `j`:
    /// `x₀ⱼ = Σᵢ mixing[i][j]·xᵢ`,
    /// `P₀ⱼ = Σᵢ mixing[i][j]·(Pᵢ + (xᵢ − reference)(xᵢ − reference)ᵀ)`.
    pub fn mixed_states(
        &self,
        filters: &[ModeFilter],
        adapter: &StateSpaceAdapter,
        reference: &DVec,
    ) -> Result<(Vec<DVec>, Vec<DMat>)> {
        let m = self.mixing.ncols();
        if filters.len() != m {
            return Err(ImmError::dims("filter bank", m, filters.len()));
        }
        let mut xs = Vec::with_capacity(m);
        let mut ps = Vec::with_capacity(m);
        for j in 0..m {
            let weights: Vec<f64> = self.mixing.column(j).iter().copied().collect();
            let (x, p) = mixture(filters, &weights, adapter, reference, None)?;
            xs.push(x);
            ps.push(p);
        }
        Ok((xs, ps))
    }
}

/// Probability-weighted mixture of the filters' expanded `x` and `P`.
///
/// With `stabilise = Some(eps)` both accumulators are passed through
/// [`ZeroSmall`] after every term.
pub fn mixture(
    filters: &[ModeFilter],
    weights: &[f64],
    adapter: &StateSpaceAdapter,
    reference: &DVec,
    stabilise: Option<f64>,
) -> Result<(DVec, DMat)> {
    let n = adapter.canonical_dim();
    if weights.len() != filters.len() {
        return Err(ImmError::dims("mixture weights", filters.len(), weights.len()));
    }
    if reference.len() != n {
        return Err(ImmError::dims("reference state", n, reference.len()));
    }

    let expanded = filters
        .iter()
        .map(|f| {
            let st = f.state();
            Ok((adapter.expand_state(&st.x)?, adapter.expand_covariance(&st.P)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut x = DVec::zeros(n);
    for ((xi, _), w) in expanded.iter().zip(weights) {
        x += xi * *w;
        if let Some(eps) = stabilise {
            x = x.zero_small(eps);
        }
    }

    let mut p = DMat::zeros(n, n);
    for ((xi, pi), w) in expanded.iter().zip(weights) {
        let diff = xi - reference;
        p += (&diff * diff.transpose() + pi) * *w;
        if let Some(eps) = stabilise {
            p = p.zero_small(eps);
        }
    }
    Ok((x, p))
}
