//! `imm_core`: Interacting Multiple Model state estimation.
//!
//! # Module layout
//! - [`types`]        Matrix aliases, mode keys, filter tags, measurements
//! - [`error`]        `ImmError` and the crate `Result`
//! - [`numerics`]     Zero-snapping and Gaussian likelihood helpers
//! - [`config`]       Bank configuration and the resolver seam
//! - [`provider`]     Time-dependent model matrices (constant, kinematic)
//! - [`clock`]        System and manual clocks
//! - [`state_space`]  Expand / shrink between native and canonical spaces
//! - [`filter_state`] Per-mode state, snapshots and matrices
//! - [`kf`]           Linear Kalman mode filter
//! - [`ekf`]          Extended Kalman mode filter and measurement models
//! - [`mode_filter`]  Closed set of mode filters
//! - [`mixer`]        Mixing matrix, mode probabilities, Gaussian mixtures
//! - [`imm`]          The estimator
//! - [`batch`]        Parallel cycling of independent estimators

pub mod batch;
pub mod clock;
pub mod config;
pub mod ekf;
pub mod error;
pub mod filter_state;
pub mod imm;
pub mod kf;
pub mod mixer;
pub mod mode_filter;
pub mod numerics;
pub mod provider;
pub mod state_space;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigurationResolver, EstimatorSettings, ImmConfig, ModeConfig};
pub use error::{ImmError, Result};
pub use imm::{CycleReport, FilterData, ImmEstimator};
pub use mode_filter::ModeFilter;
pub use provider::{ConstantMatrixProvider, KinematicMatrixProvider, KinematicMode, MatrixProvider};
pub use types::{DMat, DVec, FilterType, Measurement, MatrixRole, ModeKey};
