use thiserror::Error;

use crate::calibration::types::{AssetState, Diagnostic};

/// Errors surfaced by the structural model and its solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MertonError {
    #[error("invalid input {field}={value}: {reason}")]
    InvalidInput {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// A non-positive asset value or volatility reached a guarded boundary.
    /// Inside the solver this only happens when the transform is bypassed.
    #[error("domain violation: asset_value={asset_value}, asset_vol={asset_vol} must both be > 0")]
    DomainViolation { asset_value: f64, asset_vol: f64 },

    #[error("{transform} transform cannot represent asset_vol={asset_vol} (image is {range})")]
    OutsideTransformRange {
        transform: &'static str,
        asset_vol: f64,
        range: &'static str,
    },

    /// The solver did not produce a trustworthy state. `state` is the last
    /// iterate, kept for inspection only.
    #[error("solver failed ({diagnostic:?}) after {iterations} iterations, residual norm {residual_norm:.3e}")]
    SolverFailure {
        diagnostic: Diagnostic,
        state: AssetState,
        iterations: usize,
        residual_norm: f64,
    },
}
