use crate::error::MertonError;

/// Observable inputs of a single estimation request.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MarketObservables {
    /// Market value of equity today
    pub equity_value: f64,
    /// Annualised equity volatility (decimal, e.g. 0.80 for 80%)
    pub equity_vol: f64,
    /// Face value of debt due at maturity
    pub debt_face: f64,
    /// Time to maturity in years
    pub maturity: f64,
    /// Continuously compounded risk-free rate
    pub risk_free_rate: f64,
}

impl MarketObservables {
    /// Creates validated observables.
    pub fn new(
        equity_value: f64,
        equity_vol: f64,
        debt_face: f64,
        maturity: f64,
        risk_free_rate: f64,
    ) -> Result<Self, MertonError> {
        let obs = Self {
            equity_value,
            equity_vol,
            debt_face,
            maturity,
            risk_free_rate,
        };
        obs.validate()?;
        Ok(obs)
    }

    /// Checks positivity and finiteness of every observable.
    pub fn validate(&self) -> Result<(), MertonError> {
        let positive = [
            ("equity_value", self.equity_value),
            ("equity_vol", self.equity_vol),
            ("debt_face", self.debt_face),
            ("maturity", self.maturity),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MertonError::InvalidInput {
                    field,
                    value,
                    reason: "must be > 0 and finite",
                });
            }
        }
        if !self.risk_free_rate.is_finite() {
            return Err(MertonError::InvalidInput {
                field: "risk_free_rate",
                value: self.risk_free_rate,
                reason: "must be finite",
            });
        }
        Ok(())
    }

    /// Present value of the debt face, `D·e^{-rT}`.
    pub fn discounted_debt(&self) -> f64 {
        self.debt_face * (-self.risk_free_rate * self.maturity).exp()
    }
}

/// The unknown pair recovered by the solver: asset value and asset volatility.
///
/// Fields are public so that partial (possibly invalid) solver states can be
/// reported for inspection; use [`AssetState::new`] for a validated value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetState {
    pub asset_value: f64,
    pub asset_vol: f64,
}

impl AssetState {
    pub fn new(asset_value: f64, asset_vol: f64) -> Result<Self, MertonError> {
        let state = Self {
            asset_value,
            asset_vol,
        };
        if !state.is_valid() {
            return Err(MertonError::DomainViolation {
                asset_value,
                asset_vol,
            });
        }
        Ok(state)
    }

    /// Both components strictly positive and finite.
    pub fn is_valid(&self) -> bool {
        self.asset_value.is_finite()
            && self.asset_value > 0.0
            && self.asset_vol.is_finite()
            && self.asset_vol > 0.0
    }

    /// Standard starting point: `V0 = E0 + D·e^{-rT}`, `sigma_v = sigma_E·E0/V0`.
    pub fn initial_guess(obs: &MarketObservables) -> Self {
        let asset_value = obs.equity_value + obs.discounted_debt();
        Self {
            asset_value,
            asset_vol: obs.equity_vol * obs.equity_value / asset_value,
        }
    }
}

/// Deviation of the two model identities from the observed equity data.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResidualVector {
    /// `call_price(...) - E0`, in currency units
    pub f_price: f64,
    /// `implied_equity_volatility(...) - sigma_E`
    pub f_vol: f64,
}

impl ResidualVector {
    /// Dimensionless version used by the solver: the price residual is
    /// expressed relative to the observed equity value.
    pub fn scaled(&self, equity_value: f64) -> Self {
        Self {
            f_price: self.f_price / equity_value,
            f_vol: self.f_vol,
        }
    }

    pub fn norm(&self) -> f64 {
        self.f_price.hypot(self.f_vol)
    }

    pub fn is_finite(&self) -> bool {
        self.f_price.is_finite() && self.f_vol.is_finite()
    }
}

/// Outcome classification of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum Diagnostic {
    #[default]
    Ok,
    /// A non-positive V0 or sigma_v reached the pricing kernel
    DomainViolation,
    /// The iterate stopped improving (trust region collapsed or no bracket)
    NoProgress,
    /// The iteration or evaluation budget ran out
    MaxIterations,
    /// The residual could not be evaluated in floating point at the iterate
    NumericOverflow,
}

/// Which phase of the constrained solver produced the reported state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SolveMethod {
    /// Both unknowns from both equations
    #[default]
    Joint,
    /// V0 fixed at the joint estimate, sigma_v from the volatility identity alone
    Decoupled,
    /// Bounded L-BFGS-B minimisation of the squared residual
    Bounded,
}

/// Result of the constrained solve for a single request.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverResult {
    pub state: AssetState,
    pub converged: bool,
    /// Accepted iterations of the phase that produced `state`. For
    /// [`SolveMethod::Decoupled`] this is the number of residual evaluations
    /// spent by the Brent solve, which reports no separate iteration count.
    pub iterations: usize,
    /// Residual evaluations spent over all phases
    pub evaluations: usize,
    /// Norm of the scaled residual `(f_price/E0, f_vol)` at `state`
    pub residual_norm: f64,
    pub diagnostic: Diagnostic,
    pub method: SolveMethod,
}

/// Risk-neutral default probability and the distance-to-default statistic.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DefaultProbabilityResult {
    /// `Φ(-d2)`, in [0, 1]
    pub probability: f64,
    pub d2: f64,
}
