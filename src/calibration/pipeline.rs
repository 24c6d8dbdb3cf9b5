//! Constrained solve of the Merton system for `(V0, sigma_v)`.
//!
//! The baseline is a joint Powell-hybrid solve in transformed coordinates.
//! When it ends without convergence but its asset value already prices equity
//! (scaled price residual within `fallback_price_tolerance`), the asset value
//! is trusted and held fixed while `sigma_v` alone is recovered from the
//! volatility identity by Brent's method on `fallback_bounds`. That decoupled
//! result is an approximation, not the joint optimum, and is reported as
//! [`SolveMethod::Decoupled`].

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cmaes_lbfgsb::lbfgsb_optimize::lbfgsb_optimize;
use nalgebra::Vector2;
use roots::{find_root_brent, SearchError, SimpleConvergency};
use tracing::{debug, trace, warn};

use crate::calibration::config::{JointStrategy, SolverConfig};
use crate::calibration::hybrid::{solve_hybrid, HybridOptions, SolverPhase};
use crate::calibration::types::{
    AssetState, Diagnostic, MarketObservables, SolveMethod, SolverResult,
};
use crate::error::MertonError;
use crate::models::bs::implied_equity_volatility;
use crate::models::merton::residual::{JointResidual, Trial, TrialFlag};
use crate::models::merton::transform::{DomainTransform, IdentityTransform};

/// Smallest sigma_v probed by the decoupled solve when the bracket starts at 0
const MIN_FALLBACK_VOL: f64 = 1e-10;

/// Arctanh starts are pulled inside its (0, 1) image
const MAX_ARCTANH_START_VOL: f64 = 0.95;

/// Lower bound on sigma_v for the bounded strategy
const MIN_BOUNDED_VOL: f64 = 1e-6;

/// Single estimation request: owns all solver state for one solve.
pub struct ConstrainedSolver<'a> {
    system: JointResidual,
    config: &'a SolverConfig,
    initial_guess: Option<AssetState>,
}

impl<'a> ConstrainedSolver<'a> {
    pub fn new(obs: MarketObservables, config: &'a SolverConfig) -> Result<Self, MertonError> {
        obs.validate()?;
        Ok(Self {
            system: JointResidual::new(obs),
            config,
            initial_guess: None,
        })
    }

    /// Warm start in place of `AssetState::initial_guess`
    pub fn with_initial_guess(mut self, guess: AssetState) -> Self {
        self.initial_guess = Some(guess);
        self
    }

    fn observables(&self) -> &MarketObservables {
        self.system.observables()
    }

    /// Runs the joint solve and, if needed, the decoupled fallback.
    pub fn solve(&self) -> SolverResult {
        let obs = *self.observables();
        let start = self
            .initial_guess
            .unwrap_or_else(|| AssetState::initial_guess(&obs));
        let deadline = self
            .config
            .time_budget_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let joint = match self.config.strategy {
            JointStrategy::Hybrid => self.solve_joint(start, deadline),
            JointStrategy::Bounded => self.solve_bounded(start),
        };

        debug!(
            method = ?joint.method,
            diagnostic = ?joint.diagnostic,
            iterations = joint.iterations,
            residual_norm = joint.residual_norm,
            asset_value = joint.state.asset_value,
            asset_vol = joint.state.asset_vol,
            "joint solve finished"
        );

        let plausible =
            joint.state.asset_vol > 0.0 && joint.state.asset_vol < self.config.max_asset_volatility;
        if joint.converged && plausible {
            return joint;
        }
        if !self.config.fallback_enabled {
            return joint;
        }

        // The decoupled solve only applies when the joint asset value prices equity
        let price_residual = self
            .system
            .residual(joint.state)
            .map(|r| (r.f_price / obs.equity_value).abs())
            .ok();
        match price_residual {
            Some(p) if p <= self.config.fallback_price_tolerance => {
                warn!(
                    diagnostic = ?joint.diagnostic,
                    asset_value = joint.state.asset_value,
                    asset_vol = joint.state.asset_vol,
                    price_residual = p,
                    "joint solve unreliable; fixing asset value and solving sigma_v alone"
                );
                self.solve_decoupled(joint)
            }
            _ => {
                warn!(
                    diagnostic = ?joint.diagnostic,
                    residual_norm = joint.residual_norm,
                    "joint solve failed and asset value is not trustworthy"
                );
                SolverResult {
                    converged: false,
                    diagnostic: if joint.diagnostic == Diagnostic::Ok {
                        Diagnostic::NoProgress
                    } else {
                        joint.diagnostic
                    },
                    ..joint
                }
            }
        }
    }

    /// Hybrid dogleg solve in the configured transform's coordinates.
    fn solve_joint(&self, start: AssetState, deadline: Option<Instant>) -> SolverResult {
        let transform = self.config.transform.transform();
        let (u0, v0) = match start_coordinates(transform.as_ref(), start) {
            Ok(x) => x,
            Err(e) => {
                warn!(error = %e, "initial guess cannot be mapped to solver coordinates");
                return unsolved(start, Diagnostic::DomainViolation);
            }
        };

        let opts = HybridOptions {
            tolerance: self.config.tolerance_abs,
            max_iterations: self.config.max_iterations,
            max_evaluations: self.config.max_evaluations,
            step_tolerance: self.config.step_tolerance,
            fd_step: self.config.fd_step,
            trust_region_factor: self.config.trust_region_factor,
            deadline,
        };

        let system = &self.system;
        let outcome = solve_hybrid(
            |x: &Vector2<f64>| system.evaluate(transform.as_ref(), x[0], x[1]),
            Vector2::new(u0, v0),
            &opts,
        );

        if outcome.overflow_trials > 0 || outcome.domain_trials > 0 {
            debug!(
                overflow_trials = outcome.overflow_trials,
                domain_trials = outcome.domain_trials,
                transform = transform.name(),
                "rejected unrepresentable trial points"
            );
        }

        let diagnostic = match outcome.phase {
            SolverPhase::Converged => Diagnostic::Ok,
            SolverPhase::Stalled => Diagnostic::NoProgress,
            SolverPhase::MaxIterations => Diagnostic::MaxIterations,
            SolverPhase::Diverged => flag_diagnostic(outcome.trial.flag),
            // solve_hybrid only returns terminal phases
            SolverPhase::Init | SolverPhase::Iterating => Diagnostic::NoProgress,
        };

        SolverResult {
            state: outcome.trial.state,
            converged: outcome.phase == SolverPhase::Converged,
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
            residual_norm: outcome.trial.scaled.norm(),
            diagnostic,
            method: SolveMethod::Joint,
        }
    }

    /// Box-bounded L-BFGS-B minimisation of `½‖scaled residual‖²` over
    /// `(V0 / S, sigma_v)` with `S = E0 + D`.
    fn solve_bounded(&self, start: AssetState) -> SolverResult {
        let obs = self.observables();
        let cfg = &self.config.bounded;
        let scale = obs.equity_value + obs.debt_face;
        let bounds = [
            (
                obs.equity_value / scale,
                (obs.equity_value + cfg.asset_upper_multiple * obs.debt_face) / scale,
            ),
            (MIN_BOUNDED_VOL, self.config.max_asset_volatility),
        ];

        let evaluations = AtomicUsize::new(0);
        let iterations = AtomicUsize::new(0);
        let system = &self.system;
        let evaluate = |x: &[f64]| -> Trial {
            evaluations.fetch_add(1, Ordering::Relaxed);
            system.evaluate(&IdentityTransform, x[0] * scale, x[1])
        };
        let obj_fn = |x: &[f64]| {
            let n = evaluate(x).scaled.norm();
            0.5 * n * n
        };

        let x0 = vec![
            (start.asset_value / scale).clamp(bounds[0].0, bounds[0].1),
            start.asset_vol.clamp(bounds[1].0, bounds[1].1),
        ];
        let start_obj = obj_fn(&x0);

        let mut refined = x0.clone();
        let trace_iterations = cfg.trace_iterations;
        let refine_res = lbfgsb_optimize(
            &mut refined,
            bounds.as_slice(),
            &obj_fn,
            cfg.max_iterations,
            cfg.tolerance,
            Some(|_current_x: &[f64], current_obj: f64| {
                iterations.fetch_add(1, Ordering::Relaxed);
                if trace_iterations {
                    trace!(objective = current_obj, "L-BFGS-B iteration");
                }
            }),
            None,
        );

        let best = match refine_res {
            Ok((loc_obj, loc_sol)) if loc_obj < start_obj => loc_sol,
            Ok(_) => {
                debug!("L-BFGS-B did not improve on the starting point");
                x0
            }
            Err(e) => {
                warn!(error = ?e, "L-BFGS-B failed, keeping starting point");
                x0
            }
        };

        let trial = evaluate(&best);
        let residual_norm = trial.scaled.norm();
        let iterations = iterations.load(Ordering::Relaxed);
        let converged =
            trial.flag == TrialFlag::Finite && residual_norm <= self.config.tolerance_abs;
        let diagnostic = if converged {
            Diagnostic::Ok
        } else if trial.flag != TrialFlag::Finite {
            flag_diagnostic(trial.flag)
        } else if iterations >= cfg.max_iterations {
            Diagnostic::MaxIterations
        } else {
            Diagnostic::NoProgress
        };

        SolverResult {
            state: trial.state,
            converged,
            iterations,
            evaluations: evaluations.load(Ordering::Relaxed),
            residual_norm,
            diagnostic,
            method: SolveMethod::Bounded,
        }
    }

    /// Holds `joint.state.asset_value` fixed and solves the volatility identity
    /// for sigma_v on `fallback_bounds`.
    fn solve_decoupled(&self, joint: SolverResult) -> SolverResult {
        let obs = self.observables();
        let asset_value = joint.state.asset_value;
        let outcome = decoupled_asset_vol(
            obs,
            asset_value,
            self.config.fallback_bounds,
            self.config.tolerance_abs,
            self.config.fallback_max_iterations,
        );

        match outcome {
            Ok(fallback) => {
                let state = AssetState {
                    asset_value,
                    asset_vol: fallback.asset_vol,
                };
                let residual_norm = self
                    .system
                    .residual(state)
                    .map(|r| r.scaled(obs.equity_value).norm())
                    .unwrap_or(f64::INFINITY);
                debug!(
                    asset_vol = fallback.asset_vol,
                    vol_residual = fallback.vol_residual,
                    residual_norm,
                    "decoupled solve converged"
                );
                SolverResult {
                    state,
                    converged: true,
                    iterations: fallback.evaluations,
                    evaluations: joint.evaluations + fallback.evaluations,
                    residual_norm,
                    diagnostic: Diagnostic::Ok,
                    method: SolveMethod::Decoupled,
                }
            }
            Err(diagnostic) => {
                warn!(?diagnostic, "decoupled sigma_v solve failed");
                SolverResult {
                    converged: false,
                    diagnostic,
                    ..joint
                }
            }
        }
    }
}

fn start_coordinates(
    transform: &dyn DomainTransform,
    start: AssetState,
) -> Result<(f64, f64), MertonError> {
    match transform.inverse(start) {
        Err(MertonError::OutsideTransformRange { .. }) => transform.inverse(AssetState {
            asset_vol: start.asset_vol.min(MAX_ARCTANH_START_VOL),
            ..start
        }),
        other => other,
    }
}

fn unsolved(state: AssetState, diagnostic: Diagnostic) -> SolverResult {
    SolverResult {
        state,
        converged: false,
        iterations: 0,
        evaluations: 0,
        residual_norm: f64::INFINITY,
        diagnostic,
        method: SolveMethod::Joint,
    }
}

fn flag_diagnostic(flag: TrialFlag) -> Diagnostic {
    match flag {
        TrialFlag::Finite => Diagnostic::NoProgress,
        TrialFlag::Overflow => Diagnostic::NumericOverflow,
        TrialFlag::DomainViolation => Diagnostic::DomainViolation,
    }
}

/// Outcome of the univariate sigma_v solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoupledSolution {
    pub asset_vol: f64,
    /// `implied_equity_volatility(V0, ..., asset_vol) - sigma_E` at the root
    pub vol_residual: f64,
    /// Residual evaluations spent
    pub evaluations: usize,
}

/// Solves `implied_equity_volatility(V0, D, T, r, sigma_v, E0) = sigma_E` for
/// sigma_v with V0 held fixed, on `bounds` (an open lower bound of 0 is probed
/// at a tiny positive volatility).
///
/// Returns `NoProgress` when the bracket does not contain a sign change and
/// `MaxIterations` when Brent's method runs out of iterations; it never loops
/// past `max_iterations`.
pub fn decoupled_asset_vol(
    obs: &MarketObservables,
    asset_value: f64,
    bounds: (f64, f64),
    tolerance: f64,
    max_iterations: usize,
) -> Result<DecoupledSolution, Diagnostic> {
    if !(asset_value.is_finite() && asset_value > 0.0) {
        return Err(Diagnostic::DomainViolation);
    }
    let lo = bounds.0.max(MIN_FALLBACK_VOL);
    let hi = bounds.1;
    if hi.is_nan() || hi <= lo {
        return Err(Diagnostic::NoProgress);
    }

    let evaluations = Cell::new(0usize);
    let objective = |sigma_v: f64| -> f64 {
        evaluations.set(evaluations.get() + 1);
        implied_equity_volatility(
            asset_value,
            obs.debt_face,
            obs.maturity,
            obs.risk_free_rate,
            sigma_v,
            obs.equity_value,
        ) - obs.equity_vol
    };

    let (g_lo, g_hi) = (objective(lo), objective(hi));
    if !(g_lo.is_finite() && g_hi.is_finite()) {
        return Err(Diagnostic::NumericOverflow);
    }
    if g_lo * g_hi > 0.0 {
        debug!(lo, hi, g_lo, g_hi, "no sign change for sigma_v in bracket");
        return Err(Diagnostic::NoProgress);
    }

    let mut convergency = SimpleConvergency {
        eps: tolerance * 1e-3,
        max_iter: max_iterations,
    };
    match find_root_brent(lo, hi, &objective, &mut convergency) {
        Ok(asset_vol) => {
            let vol_residual = objective(asset_vol);
            if vol_residual.abs() <= tolerance {
                Ok(DecoupledSolution {
                    asset_vol,
                    vol_residual,
                    evaluations: evaluations.get(),
                })
            } else {
                Err(Diagnostic::NoProgress)
            }
        }
        Err(SearchError::NoConvergency) => Err(Diagnostic::MaxIterations),
        Err(_) => Err(Diagnostic::NoProgress),
    }
}
