//! # Merton-Lib: Structural Credit Risk from Equity Market Data
//!
//! `merton-lib` estimates a firm's risk-neutral default probability with the Merton
//! structural model. Equity is a European call on the firm's assets struck at the face
//! value of debt, so two identities tie the unobservable asset value `V0` and asset
//! volatility `σV` to the observable equity value `E0` and equity volatility `σE`:
//!
//! ```text
//! E0 = V0·Φ(d1) - D·e^(-rT)·Φ(d2)
//! σE = Φ(d1)·σV·V0 / E0
//! ```
//!
//! ## Core Features
//!
//! - **Constrained joint solve**: Powell-hybrid dogleg root finder over a positivity
//!   preserving reparameterisation of `(V0, σV)`
//! - **Decoupled fallback**: when the joint solve stalls with a trustworthy `V0`, `σV` is
//!   recovered alone from the volatility identity by Brent's method
//! - **Typed diagnostics**: every solve reports converged/stalled/overflow outcomes instead
//!   of returning a silently wrong probability
//! - **Credit metrics**: distance to default, risky-debt value and spread, leverage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use merton_lib::{default_configs, estimate_default_probability, MarketObservables};
//!
//! let obs = MarketObservables::new(
//!     3_004_198.18, // equity value
//!     0.7994,       // equity volatility
//!     10_000_000.0, // face value of debt
//!     1.0,          // years to maturity
//!     0.05,         // risk-free rate
//! )?;
//!
//! let pd = estimate_default_probability(obs, &default_configs::fast())?;
//! println!("PD = {:.4}, d2 = {:.4}", pd.probability, pd.d2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Configuration Presets
//!
//! - `production()`: tight tolerance with a wall-clock budget per solve
//! - `fast()`: library defaults
//! - `research()`: very tight tolerance and generous budgets
//! - `minimal()`: loose tolerance for quick checks

// ================================================================================================
// MODULES
// ================================================================================================

pub mod calibration;
pub mod error;
pub mod models;

// ================================================================================================
// IMPORTS
// ================================================================================================

use tracing::debug;

use calibration::pipeline::ConstrainedSolver;

// ================================================================================================
// PUBLIC RE-EXPORTS
// ================================================================================================

// Core types for observables, solver state and results
pub use calibration::{
    config::{BoundedConfig, JointStrategy, SolverConfig, TransformKind},
    pipeline::{decoupled_asset_vol, DecoupledSolution},
    types::{
        AssetState, DefaultProbabilityResult, Diagnostic, MarketObservables, ResidualVector,
        SolveMethod, SolverResult,
    },
};

pub use error::MertonError;

// Pricing kernel and model components
pub use models::bs::{call_price, implied_equity_volatility, norm_cdf};
pub use models::merton::{
    default_probability, ArctanhTransform, CreditMetrics, DomainTransform, ExpTransform,
    IdentityTransform, JointResidual,
};

// ================================================================================================
// DEFAULT CONFIGURATIONS
// ================================================================================================

/// Pre-configured solver settings for common use cases.
///
/// # Available Configurations
///
/// - [`production()`]: Tight tolerance with a per-solve time budget
/// - [`fast()`]: Library defaults
/// - [`research()`]: High-precision settings
/// - [`minimal()`]: Quick validation settings
pub mod default_configs {
    use crate::calibration::config::SolverConfig;

    /// Production-grade configuration for risk runs.
    ///
    /// **Characteristics:**
    /// - Scaled residual tolerance: 1e-10
    /// - Maximum iterations: 200
    /// - Wall-clock budget: 250 ms per solve
    ///
    /// # Example
    ///
    /// ```rust
    /// use merton_lib::default_configs;
    ///
    /// let config = default_configs::production();
    /// assert_eq!(config.time_budget_ms, Some(250));
    /// ```
    pub fn production() -> SolverConfig {
        SolverConfig::production()
    }

    /// Library defaults: exponential transform, tolerance 1e-6, 100 iterations,
    /// decoupled fallback on `(0, 1)`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use merton_lib::{default_configs, TransformKind};
    ///
    /// let config = default_configs::fast();
    /// assert_eq!(config.transform, TransformKind::Exp);
    /// ```
    pub fn fast() -> SolverConfig {
        SolverConfig::fast()
    }

    /// High-precision configuration for research and model validation.
    ///
    /// **Characteristics:**
    /// - Scaled residual tolerance: 1e-13
    /// - Maximum iterations: 1,000
    pub fn research() -> SolverConfig {
        SolverConfig::research()
    }

    /// Minimal configuration for quick validation and debugging.
    ///
    /// **Characteristics:**
    /// - Scaled residual tolerance: 1e-4
    /// - Maximum iterations: 20
    pub fn minimal() -> SolverConfig {
        SolverConfig::minimal()
    }
}

/// Solver output together with the quantities derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Estimation {
    pub solver: SolverResult,
    pub default: DefaultProbabilityResult,
    pub metrics: CreditMetrics,
}

/// Recover `(V0, σV)` from observable equity data.
///
/// Always returns a [`SolverResult`]; inspect `converged` and `diagnostic` before
/// trusting `state`.
///
/// # Errors
///
/// * [`MertonError::InvalidInput`] if an observable is non-positive or non-finite
pub fn solve_asset_state(
    obs: MarketObservables,
    config: &SolverConfig,
) -> Result<SolverResult, MertonError> {
    Ok(ConstrainedSolver::new(obs, config)?.solve())
}

/// Estimate the risk-neutral default probability of a firm from its equity data.
///
/// Runs the constrained solve for `(V0, σV)` and evaluates `Φ(-d2)` at the solution.
///
/// # Errors
///
/// * [`MertonError::InvalidInput`] if an observable is non-positive or non-finite
/// * [`MertonError::SolverFailure`] if neither the joint solve nor the decoupled
///   fallback produced a trustworthy state; the partial state is attached
///
/// # Example
///
/// ```rust
/// use merton_lib::{call_price, estimate_default_probability, implied_equity_volatility};
/// use merton_lib::{MarketObservables, SolverConfig};
///
/// // Observables generated by V0 = 12.4m, σV = 21.23%
/// let e0 = call_price(12_400_000.0, 10_000_000.0, 1.0, 0.05, 0.2123);
/// let sigma_e = implied_equity_volatility(12_400_000.0, 10_000_000.0, 1.0, 0.05, 0.2123, e0);
/// let obs = MarketObservables::new(e0, sigma_e, 10_000_000.0, 1.0, 0.05).unwrap();
///
/// let pd = estimate_default_probability(obs, &SolverConfig::default()).unwrap();
/// assert!((pd.probability - 0.1266).abs() < 1e-4);
/// ```
pub fn estimate_default_probability(
    obs: MarketObservables,
    config: &SolverConfig,
) -> Result<DefaultProbabilityResult, MertonError> {
    estimate(obs, config, None).map(|e| e.default)
}

/// Full estimation: solver result, default probability and credit metrics.
///
/// `asset_drift` is the expected asset return used for the physical-measure
/// distance to default; pass `None` to skip it.
///
/// # Errors
///
/// Same as [`estimate_default_probability`].
pub fn estimate(
    obs: MarketObservables,
    config: &SolverConfig,
    asset_drift: Option<f64>,
) -> Result<Estimation, MertonError> {
    let solver = solve_asset_state(obs, config)?;
    if !solver.converged {
        return Err(MertonError::SolverFailure {
            diagnostic: solver.diagnostic,
            state: solver.state,
            iterations: solver.iterations,
            residual_norm: solver.residual_norm,
        });
    }

    let default = default_probability(
        solver.state.asset_value,
        solver.state.asset_vol,
        obs.debt_face,
        obs.maturity,
        obs.risk_free_rate,
    )?;
    let metrics = CreditMetrics::from_state(&obs, solver.state, asset_drift)?;

    debug!(
        method = ?solver.method,
        asset_value = solver.state.asset_value,
        asset_vol = solver.state.asset_vol,
        probability = default.probability,
        "default probability estimated"
    );

    Ok(Estimation {
        solver,
        default,
        metrics,
    })
}
