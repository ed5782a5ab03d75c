//! Error taxonomy for the estimator.
//!
//! Every variant except [`ImmError::DegenerateInnovation`] is a configuration
//! failure and is surfaced at construction or on the first cycle that hits it.

use crate::types::{MatrixRole, ModeKey};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImmError {
    #[error("unknown filter type '{0}'")]
    UnknownFilterType(String),

    #[error("filter bank has no modes configured")]
    NoModes,

    #[error("dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: String,
        expected: String,
        found: String,
    },

    #[error("invalid probabilities: {0}")]
    InvalidProbabilities(String),

    #[error("no {role} matrix configured for mode '{key}'")]
    MissingMatrix { key: ModeKey, role: MatrixRole },

    #[error("innovation covariance of mode '{key}' is degenerate (det = {determinant:e})")]
    DegenerateInnovation { key: ModeKey, determinant: f64 },
}

impl ImmError {
    pub(crate) fn dims(what: impl Into<String>, expected: impl ToString, found: impl ToString) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// `true` when the condition only affects the current cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DegenerateInnovation { .. })
    }
}

pub type Result<T> = std::result::Result<T, ImmError>;
