// Black-Scholes-Merton kernel for the structural model: equity is priced as a
// European call on firm assets struck at the face value of debt. Inputs are
// not clamped here; callers guard the domain (V0, D, T, sigma_v > 0).

use std::f64::consts::SQRT_2;

/// Standard normal cumulative distribution function.
///
/// Evaluated as `0.5 * erfc(-x / sqrt(2))`, which keeps full double precision
/// in the lower tail where `1 + erf(x)` would cancel.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / SQRT_2)
}

/// `d1 = (ln(V0/D) + (r + sigma_v²/2)·T) / (sigma_v·√T)`
#[allow(non_snake_case)]
pub fn d1(V0: f64, D: f64, T: f64, r: f64, sigma_v: f64) -> f64 {
    ((V0 / D).ln() + (r + 0.5 * sigma_v * sigma_v) * T) / (sigma_v * T.sqrt())
}

/// `d2 = d1 - sigma_v·√T`
#[allow(non_snake_case)]
pub fn d2(V0: f64, D: f64, T: f64, r: f64, sigma_v: f64) -> f64 {
    d1(V0, D, T, r, sigma_v) - sigma_v * T.sqrt()
}

/// Black-Scholes-Merton value of equity as a call on assets `V0` with strike `D`.
#[allow(non_snake_case)]
pub fn call_price(V0: f64, D: f64, T: f64, r: f64, sigma_v: f64) -> f64 {
    let d1 = d1(V0, D, T, r, sigma_v);
    let d2 = d1 - sigma_v * T.sqrt();
    V0 * norm_cdf(d1) - D * (-r * T).exp() * norm_cdf(d2)
}

/// Equity volatility implied by Itô's lemma: `sigma_E = Φ(d1)·sigma_v·V0/E0`.
#[allow(non_snake_case)]
pub fn implied_equity_volatility(V0: f64, D: f64, T: f64, r: f64, sigma_v: f64, E0: f64) -> f64 {
    norm_cdf(d1(V0, D, T, r, sigma_v)) * sigma_v * V0 / E0
}
