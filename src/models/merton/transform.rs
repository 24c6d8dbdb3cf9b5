//! Reparameterisations between the solver's unconstrained search space `(u, v)`
//! and the economically constrained asset state `(V0 > 0, sigma_v > 0)`.
//!
//! The exponential map is the default: it is smooth, strictly monotonic and its
//! image is exactly the positive quadrant, so no trial point of an unconstrained
//! root finder can reach the pricing kernel with a non-positive argument. Its
//! cost is a more nonlinear residual landscape: near `V0 -> 0` the Jacobian with
//! respect to `u` scales with `V0` itself and the system becomes ill-conditioned. That
//! tradeoff is left visible rather than patched over.
//!
//! [`ArctanhTransform`] bounds `sigma_v` to (0, 1) and is kept for comparison
//! only; [`IdentityTransform`] is the raw, unprotected parameterisation.

use crate::calibration::types::AssetState;
use crate::error::MertonError;

/// Bijection between unconstrained coordinates and an asset state.
pub trait DomainTransform: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Maps unconstrained `(u, v)` to `(V0, sigma_v)`.
    fn forward(&self, u: f64, v: f64) -> AssetState;

    /// Maps `(V0, sigma_v)` back to unconstrained coordinates.
    fn inverse(&self, state: AssetState) -> Result<(f64, f64), MertonError>;

    /// Whether every real `(u, v)` maps to a valid asset state.
    fn guarantees_positivity(&self) -> bool {
        true
    }
}

/// `V0 = exp(u)`, `sigma_v = exp(v)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpTransform;

impl DomainTransform for ExpTransform {
    fn name(&self) -> &'static str {
        "exp"
    }

    fn forward(&self, u: f64, v: f64) -> AssetState {
        AssetState {
            asset_value: u.exp(),
            asset_vol: v.exp(),
        }
    }

    fn inverse(&self, state: AssetState) -> Result<(f64, f64), MertonError> {
        if !state.is_valid() {
            return Err(MertonError::DomainViolation {
                asset_value: state.asset_value,
                asset_vol: state.asset_vol,
            });
        }
        Ok((state.asset_value.ln(), state.asset_vol.ln()))
    }
}

/// `V0 = exp(u)`, `sigma_v = (tanh(v) + 1) / 2`, so `sigma_v` lives in (0, 1).
///
/// Saturates quickly: for |v| beyond ~19 `tanh` rounds to ±1 and the map is no
/// longer injective in floating point, which makes the joint solve unstable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArctanhTransform;

impl DomainTransform for ArctanhTransform {
    fn name(&self) -> &'static str {
        "arctanh"
    }

    fn forward(&self, u: f64, v: f64) -> AssetState {
        AssetState {
            asset_value: u.exp(),
            asset_vol: 0.5 * (v.tanh() + 1.0),
        }
    }

    fn inverse(&self, state: AssetState) -> Result<(f64, f64), MertonError> {
        if !state.is_valid() {
            return Err(MertonError::DomainViolation {
                asset_value: state.asset_value,
                asset_vol: state.asset_vol,
            });
        }
        if state.asset_vol >= 1.0 {
            return Err(MertonError::OutsideTransformRange {
                transform: self.name(),
                asset_vol: state.asset_vol,
                range: "(0, 1)",
            });
        }
        Ok((state.asset_value.ln(), (2.0 * state.asset_vol - 1.0).atanh()))
    }

    // tanh saturation can produce sigma_v == 0 in floating point
    fn guarantees_positivity(&self) -> bool {
        false
    }
}

/// Raw coordinates: `(u, v) = (V0, sigma_v)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl DomainTransform for IdentityTransform {
    fn name(&self) -> &'static str {
        "none"
    }

    fn forward(&self, u: f64, v: f64) -> AssetState {
        AssetState {
            asset_value: u,
            asset_vol: v,
        }
    }

    fn inverse(&self, state: AssetState) -> Result<(f64, f64), MertonError> {
        Ok((state.asset_value, state.asset_vol))
    }

    fn guarantees_positivity(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_round_trip(transform: &dyn DomainTransform, state: AssetState) {
        let (u, v) = transform.inverse(state).unwrap();
        let back = transform.forward(u, v);
        let rel_v = (back.asset_value - state.asset_value).abs() / state.asset_value;
        let rel_s = (back.asset_vol - state.asset_vol).abs() / state.asset_vol;
        assert!(
            rel_v < 1e-12 && rel_s < 1e-9,
            "{} round trip drifted: {:?} -> {:?}",
            transform.name(),
            state,
            back
        );
    }

    #[test]
    fn test_exp_round_trip_sampled() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let state = AssetState {
                asset_value: 10f64.powf(rng.gen_range(-3.0..12.0)),
                asset_vol: rng.gen_range(1e-4..5.0),
            };
            assert_round_trip(&ExpTransform, state);
        }
    }

    #[test]
    fn test_arctanh_round_trip_sampled() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let state = AssetState {
                asset_value: 10f64.powf(rng.gen_range(0.0..10.0)),
                asset_vol: rng.gen_range(0.01..0.99),
            };
            assert_round_trip(&ArctanhTransform, state);
        }
    }

    #[test]
    fn test_identity_round_trip() {
        let state = AssetState {
            asset_value: 12_400_000.0,
            asset_vol: 0.2123,
        };
        assert_eq!(
            IdentityTransform.inverse(state).unwrap(),
            (12_400_000.0, 0.2123)
        );
        assert_round_trip(&IdentityTransform, state);
    }

    #[test]
    fn test_exp_forward_is_positive_everywhere() {
        for &(u, v) in &[(-50.0, -50.0), (0.0, 0.0), (30.0, 3.0), (-700.0, 2.0)] {
            let s = ExpTransform.forward(u, v);
            assert!(s.asset_value >= 0.0 && s.asset_vol > 0.0);
        }
    }

    #[test]
    fn test_arctanh_rejects_out_of_range() {
        let state = AssetState {
            asset_value: 1.0,
            asset_vol: 1.5,
        };
        assert!(matches!(
            ArctanhTransform.inverse(state),
            Err(MertonError::OutsideTransformRange { .. })
        ));
        assert!(ExpTransform.inverse(state).is_ok());
    }

    #[test]
    fn test_exp_inverse_rejects_non_positive() {
        let state = AssetState {
            asset_value: 1.0,
            asset_vol: -0.1,
        };
        assert!(matches!(
            ExpTransform.inverse(state),
            Err(MertonError::DomainViolation { .. })
        ));
    }
}
