//! Numeric utilities shared by the filter bank.
//!
//! - [`ZeroSmall`] snaps near-zero elements to exactly zero after each
//!   arithmetic chain so floating-point noise does not accumulate.
//! - [`gaussian_log_pdf`] evaluates a zero-mean multivariate normal.
//! - [`floored_likelihood`] turns a log-density into a likelihood that never
//!   drops below the configured floor.

use crate::types::{DMat, DVec};

/// Elementwise stabiliser: any element with `|e| <= eps` becomes `0.0`.
pub trait ZeroSmall {
    fn zero_small(self, eps: f64) -> Self;
}

impl ZeroSmall for DMat {
    fn zero_small(mut self, eps: f64) -> Self {
        for e in self.iter_mut() {
            if e.abs() <= eps {
                *e = 0.0;
            }
        }
        self
    }
}

impl ZeroSmall for DVec {
    fn zero_small(mut self, eps: f64) -> Self {
        for e in self.iter_mut() {
            if e.abs() <= eps {
                *e = 0.0;
            }
        }
        self
    }
}

/// `true` when `det` cannot support an inverse or a log-density.
pub fn is_degenerate(det: f64, det_epsilon: f64) -> bool {
    !det.is_finite() || det <= 0.0 || det.abs() < det_epsilon
}

/// Log-density of `y` under N(0, S).
///
/// Returns `None` when `S` is degenerate (see [`is_degenerate`]) or cannot be
/// inverted.
pub fn gaussian_log_pdf(y: &DVec, s: &DMat, det_epsilon: f64) -> Option<f64> {
    if s.nrows() != y.len() || s.ncols() != y.len() {
        return None;
    }
    let det = s.determinant();
    if is_degenerate(det, det_epsilon) {
        return None;
    }
    let s_inv = s.clone().lu().try_inverse()?;
    let maha2 = (y.transpose() * &s_inv * y)[(0, 0)];
    let n = y.len() as f64;
    Some(-0.5 * (n * (2.0 * std::f64::consts::PI).ln() + det.ln() + maha2))
}

/// `exp(log_pdf)` clamped from below by `floor`.
///
/// A missing or non-finite density yields the floor itself.
pub fn floored_likelihood(log_pdf: Option<f64>, floor: f64) -> f64 {
    match log_pdf.map(f64::exp) {
        Some(l) if l.is_finite() => l.max(floor),
        _ => floor,
    }
}
