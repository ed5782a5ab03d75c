//! Expand / shrink operators between a mode's native state space and the
//! canonical combined state space.
//!
//! Modes may estimate only a subset of the canonical state (a constant-velocity
//! mode has no acceleration terms). Before blending, every mode's quantities
//! are lifted into the canonical dimension `N`:
//!
//! - vectors are padded with `1.0` up to `N`, then multiplied by an `N×N`
//!   expansion matrix;
//! - matrices are padded with the identity (input block top-left), then
//!   transformed as `E·M·Eᵀ`.
//!
//! States, covariances and innovations each have their own expansion matrix.
//! The way back is a single `d×N` shrink matrix. Nothing here checks that the
//! two directions are inverses of each other.
//!
//! Anything already of dimension `N` passes through untouched.

use serde::{Deserialize, Serialize};

use crate::error::{ImmError, Result};
use crate::types::{DMat, DVec};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSpaceAdapter {
    canonical_dim: usize,
    state_expansion: DMat,
    covariance_expansion: DMat,
    innovation_expansion: DMat,
    shrink: DMat,
}

impl StateSpaceAdapter {
    pub fn new(
        canonical_dim: usize,
        state_expansion: DMat,
        covariance_expansion: DMat,
        innovation_expansion: DMat,
        shrink: DMat,
    ) -> Result<Self> {
        let n = canonical_dim;
        for (what, m) in [
            ("state expansion matrix", &state_expansion),
            ("covariance expansion matrix", &covariance_expansion),
            ("innovation expansion matrix", &innovation_expansion),
        ] {
            if m.shape() != (n, n) {
                return Err(ImmError::dims(what, format!("{n}x{n}"), shape(m)));
            }
        }
        if shrink.ncols() != n || shrink.nrows() > n {
            return Err(ImmError::dims(
                "shrink matrix",
                format!("dx{n} with d <= {n}"),
                shape(&shrink),
            ));
        }
        Ok(Self {
            canonical_dim,
            state_expansion,
            covariance_expansion,
            innovation_expansion,
            shrink,
        })
    }

    /// Adapter for a bank where every mode already lives in `n` dimensions.
    pub fn identity(n: usize) -> Self {
        Self {
            canonical_dim: n,
            state_expansion: DMat::identity(n, n),
            covariance_expansion: DMat::identity(n, n),
            innovation_expansion: DMat::identity(n, n),
            shrink: DMat::identity(n, n),
        }
    }

    pub fn canonical_dim(&self) -> usize {
        self.canonical_dim
    }

    /// Native dimension the shrink matrix projects onto.
    pub fn shrunk_dim(&self) -> usize {
        self.shrink.nrows()
    }

    /// `true` if a mode of native dimension `dim` can be mapped in and out.
    pub fn supports(&self, dim: usize) -> bool {
        dim == self.canonical_dim || dim == self.shrink.nrows()
    }

    pub fn expand_state(&self, x: &DVec) -> Result<DVec> {
        self.expand_vector(x, &self.state_expansion, "state")
    }

    pub fn expand_covariance(&self, p: &DMat) -> Result<DMat> {
        self.expand_matrix(p, &self.covariance_expansion, "covariance")
    }

    pub fn expand_innovation(&self, y: &DVec) -> Result<DVec> {
        self.expand_vector(y, &self.innovation_expansion, "innovation")
    }

    pub fn expand_innovation_covariance(&self, s: &DMat) -> Result<DMat> {
        self.expand_matrix(s, &self.innovation_expansion, "innovation covariance")
    }

    /// Project a canonical vector onto a mode of native dimension `dim`.
    pub fn shrink_vector(&self, x: &DVec, dim: usize) -> Result<DVec> {
        if x.len() != self.canonical_dim {
            return Err(ImmError::dims("vector to shrink", self.canonical_dim, x.len()));
        }
        if dim == self.canonical_dim {
            return Ok(x.clone());
        }
        self.check_shrink_target(dim)?;
        Ok(&self.shrink * x)
    }

    /// Project a canonical matrix onto a mode of native dimension `dim`.
    pub fn shrink_matrix(&self, m: &DMat, dim: usize) -> Result<DMat> {
        let n = self.canonical_dim;
        if m.shape() != (n, n) {
            return Err(ImmError::dims("matrix to shrink", format!("{n}x{n}"), shape(m)));
        }
        if dim == n {
            return Ok(m.clone());
        }
        self.check_shrink_target(dim)?;
        Ok(&self.shrink * m * self.shrink.transpose())
    }

    fn check_shrink_target(&self, dim: usize) -> Result<()> {
        if dim != self.shrink.nrows() {
            return Err(ImmError::dims("shrink target", self.shrink.nrows(), dim));
        }
        Ok(())
    }

    fn expand_vector(&self, v: &DVec, e: &DMat, what: &str) -> Result<DVec> {
        let n = self.canonical_dim;
        if v.len() == n {
            return Ok(v.clone());
        }
        if v.len() > n {
            return Err(ImmError::dims(format!("{what} to expand"), format!("<= {n}"), v.len()));
        }
        let padded = DVec::from_fn(n, |i, _| if i < v.len() { v[i] } else { 1.0 });
        Ok(e * padded)
    }

    fn expand_matrix(&self, m: &DMat, e: &DMat, what: &str) -> Result<DMat> {
        let n = self.canonical_dim;
        if m.shape() == (n, n) {
            return Ok(m.clone());
        }
        if m.nrows() > n || m.ncols() > n {
            return Err(ImmError::dims(
                format!("{what} to expand"),
                format!("<= {n}x{n}"),
                shape(m),
            ));
        }
        let mut padded = DMat::identity(n, n);
        padded.view_mut((0, 0), m.shape()).copy_from(m);
        Ok(e * padded * e.transpose())
    }
}

fn shape(m: &DMat) -> String {
    format!("{}x{}", m.nrows(), m.ncols())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImmConfig;
    use approx::assert_abs_diff_eq;

    /// Four-state [x, vx, y, vy] mode inside the six-state canonical space.
    fn cv_in_ca() -> StateSpaceAdapter {
        ImmConfig::velocity_acceleration().adapter().unwrap()
    }

    #[test]
    fn canonical_dimension_is_a_no_op() {
        // Matrices that would visibly change anything they touch
        let scramble = DMat::from_element(6, 6, 3.0);
        let adapter = StateSpaceAdapter::new(
            6,
            scramble.clone(),
            scramble.clone(),
            scramble,
            DMat::from_element(4, 6, 5.0),
        )
        .unwrap();

        let x = DVec::from_vec(vec![1., 2., 3., 4., 5., 6.]);
        let p = DMat::from_fn(6, 6, |r, c| (r * 6 + c) as f64);
        assert_eq!(adapter.expand_state(&x).unwrap(), x);
        assert_eq!(adapter.expand_innovation(&x).unwrap(), x);
        assert_eq!(adapter.expand_covariance(&p).unwrap(), p);
        assert_eq!(adapter.expand_innovation_covariance(&p).unwrap(), p);
        assert_eq!(adapter.shrink_vector(&x, 6).unwrap(), x);
        assert_eq!(adapter.shrink_matrix(&p, 6).unwrap(), p);
    }

    #[test]
    fn expand_state_places_native_components() {
        let adapter = cv_in_ca();
        let x = DVec::from_vec(vec![10., 1., 20., 2.]);
        let expanded = adapter.expand_state(&x).unwrap();
        assert_eq!(expanded.as_slice(), &[10., 1., 0., 20., 2., 0.]);
    }

    #[test]
    fn expand_covariance_inflates_unestimated_terms() {
        let adapter = cv_in_ca();
        let p = DMat::identity(4, 4) * 2.0;
        let expanded = adapter.expand_covariance(&p).unwrap();
        // Padding ones land on the acceleration slots, scaled by 9 on both sides
        assert_abs_diff_eq!(expanded[(2, 2)], 81.0);
        assert_abs_diff_eq!(expanded[(5, 5)], 81.0);
        assert_abs_diff_eq!(expanded[(0, 0)], 2.0);
        assert_abs_diff_eq!(expanded[(4, 4)], 2.0);
        assert_abs_diff_eq!(expanded[(0, 2)], 0.0);
    }

    #[test]
    fn expand_innovation_uses_its_own_matrix() {
        let adapter = cv_in_ca();
        let y = DVec::from_vec(vec![0.5, 0.0, -0.5, 0.0]);
        let expanded = adapter.expand_innovation(&y).unwrap();
        assert_abs_diff_eq!(expanded[2], 1.05);
        assert_abs_diff_eq!(expanded[3], -0.5);

        let s = adapter.expand_innovation_covariance(&DMat::identity(4, 4)).unwrap();
        assert_abs_diff_eq!(s[(2, 2)], 1.05 * 1.05, epsilon = 1e-12);
    }

    #[test]
    fn shrink_then_expand_recovers_native_components() {
        let adapter = cv_in_ca();
        let canonical = DVec::from_vec(vec![10., 1., 0.3, 20., 2., -0.3]);
        let native = adapter.shrink_vector(&canonical, 4).unwrap();
        assert_eq!(native.as_slice(), &[10., 1., 20., 2.]);

        let p = DMat::from_fn(6, 6, |r, c| if r == c { (r + 1) as f64 } else { 0.0 });
        let p_native = adapter.shrink_matrix(&p, 4).unwrap();
        assert_eq!(p_native.shape(), (4, 4));
        assert_abs_diff_eq!(p_native[(2, 2)], 4.0);
        assert_abs_diff_eq!(p_native[(3, 3)], 5.0);
    }

    #[test]
    fn rejects_unsupported_dimensions() {
        let adapter = cv_in_ca();
        let x = DVec::zeros(6);
        assert!(matches!(
            adapter.shrink_vector(&x, 3),
            Err(ImmError::DimensionMismatch { .. })
        ));
        assert!(adapter.expand_state(&DVec::zeros(7)).is_err());
        assert!(StateSpaceAdapter::new(
            6,
            DMat::identity(5, 5),
            DMat::identity(6, 6),
            DMat::identity(6, 6),
            DMat::identity(6, 6),
        )
        .is_err());
    }
}
