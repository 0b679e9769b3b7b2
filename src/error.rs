//! Crate-wide error type.

use core::fmt;
use std::error::Error;

/// Errors surfaced by the sampler, the collector and the model driver.
///
/// Configuration problems are rejected eagerly, before any training iteration
/// runs. Shape mismatches and calls on an untrained model are rejected at call
/// time. Divergent training (NaN/Inf losses produced by the external loss) is
/// deliberately *not* caught here; those values propagate to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SgmcmcError {
    /// A hyperparameter violates its documented domain.
    InvalidConfig(String),
    /// Prediction was requested before any posterior sample was collected.
    NotTrained,
    /// A gradient or snapshot tensor does not match the parameter it belongs to.
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

impl fmt::Display for SgmcmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SgmcmcError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            SgmcmcError::NotTrained => {
                write!(f, "model has no posterior samples; call train before predict")
            }
            SgmcmcError::ShapeMismatch { expected, actual } => write!(
                f,
                "shape mismatch: expected {:?}, got {:?}",
                expected, actual
            ),
        }
    }
}

impl Error for SgmcmcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = SgmcmcError::InvalidConfig("lr must be positive, got -0.1".into());
        assert!(e.to_string().contains("lr must be positive"));
        assert!(SgmcmcError::NotTrained.to_string().contains("train before predict"));
        let e = SgmcmcError::ShapeMismatch {
            expected: vec![3, 2],
            actual: vec![2, 3],
        };
        assert!(e.to_string().contains("[3, 2]"));
    }
}
