//! Powell-hybrid (dogleg trust-region) root finder for the 2x2 Merton system.
//!
//! Each iteration approximates the Jacobian by forward differences around the
//! current iterate, scales the variables by the running column norms of the
//! Jacobian, and picks a dogleg step between the Gauss-Newton point and the
//! Cauchy point inside the trust region. A step is accepted only when it
//! reduces `‖f‖²`; penalised trial points (see
//! [`crate::models::merton::PENALTY_RESIDUAL`]) are rejected the same way and
//! shrink the region.

use std::time::Instant;

use nalgebra::{Matrix2, Vector2};
use tracing::{debug, trace};

use crate::models::merton::residual::{Trial, TrialFlag};

/// Minimum ratio of actual to predicted reduction for accepting a step
const ACCEPT_RATIO: f64 = 1e-4;

/// Settings for a single hybrid solve
#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub max_evaluations: usize,
    pub step_tolerance: f64,
    pub fd_step: f64,
    pub trust_region_factor: f64,
    pub deadline: Option<Instant>,
}

/// States of a solve. `Init` and `Iterating` are transient; the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverPhase {
    Init,
    Iterating,
    Converged,
    /// Trust region collapsed without reaching tolerance
    Stalled,
    /// The residual could not be evaluated at the current iterate
    Diverged,
    /// Iteration, evaluation or time budget exhausted
    MaxIterations,
}

impl SolverPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SolverPhase::Init | SolverPhase::Iterating)
    }
}

#[derive(Debug, Clone)]
pub struct HybridOutcome {
    pub phase: SolverPhase,
    /// Final iterate in solver coordinates
    pub x: Vector2<f64>,
    /// Evaluation at `x`
    pub trial: Trial,
    pub iterations: usize,
    pub evaluations: usize,
    /// Rejected trial points that overflowed
    pub overflow_trials: usize,
    /// Rejected trial points with a non-positive component
    pub domain_trials: usize,
}

fn residual_vector(trial: &Trial) -> Vector2<f64> {
    Vector2::new(trial.scaled.f_price, trial.scaled.f_vol)
}

/// Evaluation bookkeeping shared by the step and Jacobian logic.
struct Counter<F> {
    residual: F,
    evaluations: usize,
    overflow_trials: usize,
    domain_trials: usize,
}

impl<F: FnMut(&Vector2<f64>) -> Trial> Counter<F> {
    fn eval(&mut self, x: &Vector2<f64>) -> Trial {
        self.evaluations += 1;
        let trial = (self.residual)(x);
        match trial.flag {
            TrialFlag::Finite => {}
            TrialFlag::Overflow => self.overflow_trials += 1,
            TrialFlag::DomainViolation => self.domain_trials += 1,
        }
        trial
    }
}

/// Forward-difference Jacobian, falling back to a backward difference for a
/// column whose forward point is not representable.
fn jacobian<F: FnMut(&Vector2<f64>) -> Trial>(
    counter: &mut Counter<F>,
    x: &Vector2<f64>,
    f: &Vector2<f64>,
    fd_step: f64,
) -> Option<Matrix2<f64>> {
    let mut columns = [Vector2::zeros(); 2];
    for (j, column) in columns.iter_mut().enumerate() {
        let base = if x[j] != 0.0 { fd_step * x[j].abs() } else { fd_step };
        let mut found = false;
        for h in [base, -base] {
            let mut xp = *x;
            xp[j] += h;
            let trial = counter.eval(&xp);
            if trial.flag == TrialFlag::Finite {
                *column = (residual_vector(&trial) - f) / h;
                found = true;
                break;
            }
        }
        if !found {
            return None;
        }
    }
    Some(Matrix2::from_columns(&columns))
}

/// Dogleg step in scaled coordinates for the linear model `f + Js·p`.
fn dogleg(js: &Matrix2<f64>, f: &Vector2<f64>, delta: f64) -> Vector2<f64> {
    let gauss_newton = js.try_inverse().map(|inv| -(inv * f));
    if let Some(p) = gauss_newton {
        if p.norm() <= delta {
            return p;
        }
    }

    let g = js.transpose() * f;
    let g_norm = g.norm();
    if g_norm == 0.0 {
        return Vector2::zeros();
    }
    let jg = js * g;
    let jg_sq = jg.norm_squared();
    let cauchy = if jg_sq > 0.0 {
        -(g_norm * g_norm / jg_sq) * g
    } else {
        Vector2::zeros()
    };

    match gauss_newton {
        Some(p_gn) if cauchy.norm() < delta => {
            // Walk from the Cauchy point towards Gauss-Newton until the boundary
            let a = p_gn - cauchy;
            let aa = a.norm_squared();
            let ab = cauchy.dot(&a);
            let c = cauchy.norm_squared() - delta * delta;
            let tau = (-ab + (ab * ab - aa * c).sqrt()) / aa;
            cauchy + tau * a
        }
        _ => -(delta / g_norm) * g,
    }
}

/// Drives `residual` to zero starting from `x0`.
///
/// `residual` must return finite values for every input; trial points it
/// cannot represent are expected to carry a penalty and a non-finite flag.
pub fn solve_hybrid<F>(residual: F, x0: Vector2<f64>, opts: &HybridOptions) -> HybridOutcome
where
    F: FnMut(&Vector2<f64>) -> Trial,
{
    let mut counter = Counter {
        residual,
        evaluations: 0,
        overflow_trials: 0,
        domain_trials: 0,
    };

    let mut phase = SolverPhase::Init;
    let mut x = x0;
    let mut trial = counter.eval(&x);
    let mut f = residual_vector(&trial);
    let mut iterations = 0;

    if trial.flag != TrialFlag::Finite {
        debug!(?x, flag = ?trial.flag, "initial point is not representable");
        phase = SolverPhase::Diverged;
    }

    let mut diag = Vector2::<f64>::zeros();
    let mut delta = 0.0;

    while !phase.is_terminal() {
        if f.norm() <= opts.tolerance {
            phase = SolverPhase::Converged;
            break;
        }
        if iterations >= opts.max_iterations || counter.evaluations >= opts.max_evaluations {
            phase = SolverPhase::MaxIterations;
            break;
        }
        if opts.deadline.is_some_and(|d| Instant::now() >= d) {
            debug!(iterations, "time budget exhausted");
            phase = SolverPhase::MaxIterations;
            break;
        }

        let Some(jac) = jacobian(&mut counter, &x, &f, opts.fd_step) else {
            debug!(?x, "jacobian not representable around iterate");
            phase = SolverPhase::Stalled;
            break;
        };

        for j in 0..2 {
            let col = jac.column(j).norm();
            diag[j] = diag[j].max(if col > 0.0 { col } else { 1.0 });
        }
        if phase == SolverPhase::Init {
            let scaled = x.component_mul(&diag).norm();
            delta = if scaled > 0.0 {
                opts.trust_region_factor * scaled
            } else {
                opts.trust_region_factor
            };
            phase = SolverPhase::Iterating;
        }

        let mut js = jac;
        for j in 0..2 {
            js.set_column(j, &(jac.column(j) / diag[j]));
        }

        // Inner loop: shrink the region until a step is accepted
        loop {
            if counter.evaluations >= opts.max_evaluations {
                phase = SolverPhase::MaxIterations;
                break;
            }

            let pz = dogleg(&js, &f, delta);
            let p = pz.component_div(&diag);
            let x_trial = x + p;
            let candidate = counter.eval(&x_trial);
            let f_trial = residual_vector(&candidate);

            let f_norm_sq = f.norm_squared();
            let actual = f_norm_sq - f_trial.norm_squared();
            let predicted = f_norm_sq - (f + jac * p).norm_squared();
            let ratio = if predicted > 0.0 {
                actual / predicted
            } else {
                -1.0
            };

            let pz_norm = pz.norm();
            if ratio < 0.25 {
                delta = 0.25 * pz_norm;
            } else if ratio > 0.75 {
                delta = delta.max(2.0 * pz_norm);
            }

            trace!(
                iteration = iterations,
                ratio,
                delta,
                flag = ?candidate.flag,
                "trial step"
            );

            if ratio > ACCEPT_RATIO && candidate.flag == TrialFlag::Finite {
                x = x_trial;
                f = f_trial;
                trial = candidate;
                iterations += 1;
                break;
            }

            let scaled_x = x.component_mul(&diag).norm();
            if delta <= opts.step_tolerance * (scaled_x + opts.step_tolerance) {
                phase = SolverPhase::Stalled;
                break;
            }
        }

        debug!(
            iteration = iterations,
            residual_norm = f.norm(),
            delta,
            "hybrid iteration"
        );
    }

    // A budget stop can coincide with a point that already meets tolerance
    if phase == SolverPhase::MaxIterations && f.norm() <= opts.tolerance {
        phase = SolverPhase::Converged;
    }

    debug!(
        ?phase,
        iterations,
        evaluations = counter.evaluations,
        residual_norm = f.norm(),
        "hybrid solve finished"
    );

    HybridOutcome {
        phase,
        x,
        trial,
        iterations,
        evaluations: counter.evaluations,
        overflow_trials: counter.overflow_trials,
        domain_trials: counter.domain_trials,
    }
}
