//! Cycle many independent estimators at once.
//!
//! Every estimator owns its bank, so one frame of measurements (one per
//! target) can be processed in parallel without locking.

use rayon::prelude::*;

use crate::clock::Clock;
use crate::error::{ImmError, Result};
use crate::imm::{CycleReport, ImmEstimator};
use crate::provider::MatrixProvider;
use crate::types::Measurement;

/// Run one [`ImmEstimator::process`] per `(estimator, measurement)` pair.
///
/// Results are returned in estimator order. A length mismatch fails the whole
/// frame before any estimator is touched.
pub fn cycle_all<P, C>(
    estimators: &mut [ImmEstimator<P, C>],
    measurements: &[Measurement],
) -> Result<Vec<Result<CycleReport>>>
where
    P: MatrixProvider + Send,
    C: Clock + Send,
{
    if estimators.len() != measurements.len() {
        return Err(ImmError::dims(
            "measurements per frame",
            estimators.len(),
            measurements.len(),
        ));
    }
    Ok(estimators
        .par_iter_mut()
        .zip(measurements.par_iter())
        .map(|(imm, m)| imm.process(m))
        .collect())
}
