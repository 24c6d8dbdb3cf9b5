//! The two Merton identities packaged as a vector residual.
//!
//! ```text
//! f_price = call_price(V0, D, T, r, sigma_v) - E0
//! f_vol   = implied_equity_volatility(V0, D, T, r, sigma_v, E0) - sigma_E
//! ```
//!
//! [`JointResidual::residual`] is the raw, checked evaluation. The solver goes
//! through [`JointResidual::evaluate`], which applies a [`DomainTransform`] and
//! always returns finite values: anything the kernel cannot represent is
//! replaced by [`PENALTY_RESIDUAL`] and flagged, so a trust-region step landing
//! there is simply rejected.

use crate::calibration::types::{AssetState, MarketObservables, ResidualVector};
use crate::error::MertonError;
use crate::models::bs::{call_price, implied_equity_volatility};
use crate::models::merton::transform::DomainTransform;

/// Finite stand-in for residual components that overflowed or left the
/// domain. Small enough that the squared norm of a penalised vector is finite.
pub const PENALTY_RESIDUAL: f64 = 1.0e100;

/// How a trial point evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialFlag {
    Finite,
    /// The transform or the kernel produced a non-finite value
    Overflow,
    /// The trial state had a non-positive component
    DomainViolation,
}

/// Scaled residual at a trial point in solver coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trial {
    pub state: AssetState,
    /// `(f_price / E0, f_vol)`, or the penalty when `flag` is not `Finite`
    pub scaled: ResidualVector,
    pub flag: TrialFlag,
}

/// Residual system for fixed observables.
#[derive(Debug, Clone, Copy)]
pub struct JointResidual {
    obs: MarketObservables,
}

impl JointResidual {
    pub fn new(obs: MarketObservables) -> Self {
        Self { obs }
    }

    pub fn observables(&self) -> &MarketObservables {
        &self.obs
    }

    /// Unscaled residual at `state`. Non-positive components are reported as
    /// [`MertonError::DomainViolation`] instead of reaching the kernel.
    pub fn residual(&self, state: AssetState) -> Result<ResidualVector, MertonError> {
        if !state.is_valid() {
            return Err(MertonError::DomainViolation {
                asset_value: state.asset_value,
                asset_vol: state.asset_vol,
            });
        }
        Ok(self.residual_unchecked(state))
    }

    fn residual_unchecked(&self, state: AssetState) -> ResidualVector {
        let o = &self.obs;
        let price = call_price(
            state.asset_value,
            o.debt_face,
            o.maturity,
            o.risk_free_rate,
            state.asset_vol,
        );
        let vol = implied_equity_volatility(
            state.asset_value,
            o.debt_face,
            o.maturity,
            o.risk_free_rate,
            state.asset_vol,
            o.equity_value,
        );
        ResidualVector {
            f_price: price - o.equity_value,
            f_vol: vol - o.equity_vol,
        }
    }

    /// Scaled residual at unconstrained `(u, v)`; finite for every real input.
    pub fn evaluate(&self, transform: &dyn DomainTransform, u: f64, v: f64) -> Trial {
        let state = transform.forward(u, v);
        let penalty = ResidualVector {
            f_price: PENALTY_RESIDUAL,
            f_vol: PENALTY_RESIDUAL,
        };

        if !(state.asset_value.is_finite() && state.asset_vol.is_finite()) {
            return Trial {
                state,
                scaled: penalty,
                flag: TrialFlag::Overflow,
            };
        }
        if !state.is_valid() {
            let flag = if transform.guarantees_positivity() {
                // exp underflow to 0.0 is a representation failure, not a bypass
                TrialFlag::Overflow
            } else {
                TrialFlag::DomainViolation
            };
            return Trial {
                state,
                scaled: penalty,
                flag,
            };
        }

        let scaled = self.residual_unchecked(state).scaled(self.obs.equity_value);
        if scaled.is_finite() {
            Trial {
                state,
                scaled,
                flag: TrialFlag::Finite,
            }
        } else {
            Trial {
                state,
                scaled: penalty,
                flag: TrialFlag::Overflow,
            }
        }
    }
}
