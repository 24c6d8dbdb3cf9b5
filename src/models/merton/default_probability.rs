use crate::calibration::types::{AssetState, DefaultProbabilityResult, MarketObservables};
use crate::error::MertonError;
use crate::models::bs::norm_cdf;

/// Risk-neutral probability that terminal assets end below the debt face.
///
/// ```text
/// d2 = (ln(V0/D) + (r - sigma_v²/2)·T) / (sigma_v·√T)
/// PD = Φ(-d2)
/// ```
#[allow(non_snake_case)]
pub fn default_probability(
    V0: f64,
    sigma_v: f64,
    D: f64,
    T: f64,
    r: f64,
) -> Result<DefaultProbabilityResult, MertonError> {
    AssetState::new(V0, sigma_v)?;
    for (field, value) in [("debt_face", D), ("maturity", T)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(MertonError::InvalidInput {
                field,
                value,
                reason: "must be > 0 and finite",
            });
        }
    }

    let d2 = distance_to_default(V0, sigma_v, D, T, r);
    Ok(DefaultProbabilityResult {
        probability: norm_cdf(-d2),
        d2,
    })
}

/// Distance to default with drift `mu`: pass `r` for the risk-neutral
/// measure or an expected asset return for the physical one.
#[allow(non_snake_case)]
pub(crate) fn distance_to_default(V0: f64, sigma_v: f64, D: f64, T: f64, mu: f64) -> f64 {
    ((V0 / D).ln() + (mu - 0.5 * sigma_v * sigma_v) * T) / (sigma_v * T.sqrt())
}

/// Credit figures derived from a solved asset state.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CreditMetrics {
    pub d1: f64,
    /// Risk-neutral distance to default
    pub d2: f64,
    pub default_probability: f64,
    /// Market value of debt, `V0 - E0`
    pub debt_value: f64,
    /// Continuously compounded spread of risky debt over the risk-free rate
    pub credit_spread: f64,
    /// `D·e^{-rT} / V0`
    pub leverage: f64,
    /// Distance to default under an expected asset drift, when one was given
    pub physical_distance_to_default: Option<f64>,
    /// `Φ(-DD)` under the expected asset drift
    pub physical_default_probability: Option<f64>,
}

impl CreditMetrics {
    /// Derives the metrics for `state`. `asset_drift` is the expected asset
    /// return used for the physical-measure distance to default.
    pub fn from_state(
        obs: &MarketObservables,
        state: AssetState,
        asset_drift: Option<f64>,
    ) -> Result<Self, MertonError> {
        obs.validate()?;
        let pd = default_probability(
            state.asset_value,
            state.asset_vol,
            obs.debt_face,
            obs.maturity,
            obs.risk_free_rate,
        )?;

        let t = obs.maturity;
        let d1 = pd.d2 + state.asset_vol * t.sqrt();
        let debt_value = state.asset_value - obs.equity_value;
        // Spread is undefined when the solved assets do not cover the equity
        let credit_spread = if debt_value > 0.0 {
            -(debt_value / obs.debt_face).ln() / t - obs.risk_free_rate
        } else {
            f64::NAN
        };

        let physical_distance_to_default = asset_drift.map(|mu| {
            distance_to_default(state.asset_value, state.asset_vol, obs.debt_face, t, mu)
        });

        Ok(Self {
            d1,
            d2: pd.d2,
            default_probability: pd.probability,
            debt_value,
            credit_spread,
            leverage: obs.discounted_debt() / state.asset_value,
            physical_distance_to_default,
            physical_default_probability: physical_distance_to_default.map(|dd| norm_cdf(-dd)),
        })
    }
}
