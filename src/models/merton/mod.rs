//! Merton structural credit model: equity as a call on firm assets.
//!
//! - [`transform`]: maps between the unconstrained solver space and `(V0, sigma_v)`
//! - [`residual`]: the joint residual of the price and volatility identities
//! - [`default_probability`]: risk-neutral default probability and credit metrics

pub mod default_probability;
pub mod residual;
pub mod transform;

pub use default_probability::{default_probability, CreditMetrics};
pub use residual::{JointResidual, Trial, TrialFlag, PENALTY_RESIDUAL};
pub use transform::{ArctanhTransform, DomainTransform, ExpTransform, IdentityTransform};
