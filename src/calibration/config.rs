#[cfg(feature = "serde")]
use anyhow::Context;
#[cfg(feature = "serde")]
use serde::Deserialize;

use crate::models::merton::transform::{
    ArctanhTransform, DomainTransform, ExpTransform, IdentityTransform,
};

/// Parameterisation the joint solve searches over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransformKind {
    /// `V0 = exp(u)`, `sigma_v = exp(v)`
    #[default]
    Exp,
    /// `sigma_v = (tanh(v) + 1) / 2`; comparison only
    Arctanh,
    /// Raw `(V0, sigma_v)`
    None,
}

impl TransformKind {
    pub fn transform(&self) -> Box<dyn DomainTransform> {
        match self {
            TransformKind::Exp => Box::new(ExpTransform),
            TransformKind::Arctanh => Box::new(ArctanhTransform),
            TransformKind::None => Box::new(IdentityTransform),
        }
    }
}

/// Joint solve algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum JointStrategy {
    /// Powell-hybrid dogleg root finder in transformed coordinates
    #[default]
    Hybrid,
    /// L-BFGS-B on the squared residual with box bounds on (V0, sigma_v)
    Bounded,
}

/// L-BFGS-B settings for [`JointStrategy::Bounded`]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BoundedConfig {
    /// Max iterations for L-BFGS-B
    pub max_iterations: usize,
    /// Gradient/objective tolerance handed to L-BFGS-B
    pub tolerance: f64,
    /// Upper bound on V0 as `E0 + asset_upper_multiple * D`
    pub asset_upper_multiple: f64,
    /// Log every L-BFGS-B iteration at trace level
    pub trace_iterations: bool,
}

impl Default for BoundedConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-14,
            asset_upper_multiple: 10.0,
            trace_iterations: false,
        }
    }
}

/// Main configuration struct for the constrained solver
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct SolverConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub transform: TransformKind,

    #[cfg_attr(feature = "serde", serde(default))]
    pub strategy: JointStrategy,

    /// Convergence threshold on the scaled residual norm `‖(f_price/E0, f_vol)‖`
    #[cfg_attr(feature = "serde", serde(default = "default_tolerance_abs"))]
    pub tolerance_abs: f64,

    /// Accepted-step budget of the joint solve
    #[cfg_attr(feature = "serde", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,

    /// Residual evaluation budget of the joint solve
    #[cfg_attr(feature = "serde", serde(default = "default_max_evaluations"))]
    pub max_evaluations: usize,

    /// Optional wall-clock budget per solve, in milliseconds
    #[cfg_attr(feature = "serde", serde(default))]
    pub time_budget_ms: Option<u64>,

    /// Relative trust-region size below which the solve is declared stalled
    #[cfg_attr(feature = "serde", serde(default = "default_step_tolerance"))]
    pub step_tolerance: f64,

    /// Relative forward-difference step for the Jacobian
    #[cfg_attr(feature = "serde", serde(default = "default_fd_step"))]
    pub fd_step: f64,

    /// Initial trust radius as a multiple of the scaled starting point
    #[cfg_attr(feature = "serde", serde(default = "default_trust_region_factor"))]
    pub trust_region_factor: f64,

    /// Run the decoupled sigma_v solve when the joint solve fails with a good V0
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub fallback_enabled: bool,

    /// Bracket for the decoupled sigma_v solve
    #[cfg_attr(feature = "serde", serde(default = "default_fallback_bounds"))]
    pub fallback_bounds: (f64, f64),

    /// Scaled price residual below which the joint V0 is trusted
    #[cfg_attr(feature = "serde", serde(default = "default_fallback_price_tolerance"))]
    pub fallback_price_tolerance: f64,

    /// Iteration budget of the decoupled solve
    #[cfg_attr(feature = "serde", serde(default = "default_fallback_max_iterations"))]
    pub fallback_max_iterations: usize,

    /// Plausibility ceiling for sigma_v; a joint result above it is not trusted
    #[cfg_attr(feature = "serde", serde(default = "default_max_asset_volatility"))]
    pub max_asset_volatility: f64,

    #[cfg_attr(feature = "serde", serde(default))]
    pub bounded: BoundedConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            transform: TransformKind::default(),
            strategy: JointStrategy::default(),
            tolerance_abs: default_tolerance_abs(),
            max_iterations: default_max_iterations(),
            max_evaluations: default_max_evaluations(),
            time_budget_ms: None,
            step_tolerance: default_step_tolerance(),
            fd_step: default_fd_step(),
            trust_region_factor: default_trust_region_factor(),
            fallback_enabled: true,
            fallback_bounds: default_fallback_bounds(),
            fallback_price_tolerance: default_fallback_price_tolerance(),
            fallback_max_iterations: default_fallback_max_iterations(),
            max_asset_volatility: default_max_asset_volatility(),
            bounded: BoundedConfig::default(),
        }
    }
}

impl SolverConfig {
    /// Tight tolerances for production risk runs
    pub fn production() -> Self {
        Self {
            tolerance_abs: 1e-10,
            max_iterations: 200,
            max_evaluations: 2000,
            time_budget_ms: Some(250),
            ..Self::default()
        }
    }

    /// Library defaults
    pub fn fast() -> Self {
        Self::default()
    }

    /// Very tight tolerances and generous budgets
    pub fn research() -> Self {
        Self {
            tolerance_abs: 1e-13,
            max_iterations: 1000,
            max_evaluations: 10000,
            fallback_max_iterations: 1000,
            ..Self::default()
        }
    }

    /// Loose tolerance and small budgets for quick checks
    pub fn minimal() -> Self {
        Self {
            tolerance_abs: 1e-4,
            max_iterations: 20,
            max_evaluations: 100,
            fallback_max_iterations: 50,
            ..Self::default()
        }
    }

    /// Parses a configuration from TOML; missing fields take their defaults.
    #[cfg(feature = "serde")]
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(source).context("failed to parse solver config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    #[cfg(feature = "serde")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read solver config {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("in {}", path.display()))
    }

    /// Rejects settings the solver cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.tolerance_abs > 0.0 && self.tolerance_abs.is_finite(),
            "tolerance_abs must be > 0, got {}",
            self.tolerance_abs
        );
        anyhow::ensure!(self.max_evaluations > 0, "max_evaluations must be > 0");
        anyhow::ensure!(
            self.step_tolerance > 0.0 && self.step_tolerance.is_finite(),
            "step_tolerance must be > 0, got {}",
            self.step_tolerance
        );
        anyhow::ensure!(
            self.fallback_price_tolerance > 0.0 && self.fallback_price_tolerance.is_finite(),
            "fallback_price_tolerance must be > 0, got {}",
            self.fallback_price_tolerance
        );
        anyhow::ensure!(
            self.fd_step > 0.0 && self.fd_step < 1.0,
            "fd_step must be in (0, 1), got {}",
            self.fd_step
        );
        anyhow::ensure!(
            self.trust_region_factor > 0.0,
            "trust_region_factor must be > 0, got {}",
            self.trust_region_factor
        );
        let (lo, hi) = self.fallback_bounds;
        anyhow::ensure!(
            lo >= 0.0 && hi > lo && hi.is_finite(),
            "fallback_bounds must satisfy 0 <= lo < hi, got ({}, {})",
            lo,
            hi
        );
        anyhow::ensure!(
            self.max_asset_volatility > 0.0,
            "max_asset_volatility must be > 0, got {}",
            self.max_asset_volatility
        );
        Ok(())
    }
}

fn default_tolerance_abs() -> f64 {
    1e-6
}

fn default_max_iterations() -> usize {
    100
}

fn default_max_evaluations() -> usize {
    1000
}

fn default_step_tolerance() -> f64 {
    1e-12
}

fn default_fd_step() -> f64 {
    1.49e-8
}

fn default_trust_region_factor() -> f64 {
    100.0
}

#[cfg(feature = "serde")]
fn default_true() -> bool {
    true
}

fn default_fallback_bounds() -> (f64, f64) {
    (0.0, 1.0)
}

fn default_fallback_price_tolerance() -> f64 {
    1e-4
}

fn default_fallback_max_iterations() -> usize {
    200
}

fn default_max_asset_volatility() -> f64 {
    3.0
}
