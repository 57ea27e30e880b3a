//! Scalar numerics shared by the whole workspace: the floating point type,
//! convergence-norm selection and tolerance-based comparison.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Scalar type of all exchanged values and field components.
pub type Real = f64;

/// Which norm a coupling engine uses for its convergence test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormKind {
    /// Max absolute value over all scalars and field components (default).
    #[default]
    Max,
    /// Euclidean norm over all components.
    Two,
}

/// Absolute and relative tolerance pair for scalar comparison.
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Tolerances {
    pub const fn new(abs: Real, rel: Real) -> Self {
        Self { abs, rel }
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::new(1e-12, 1e-9)
    }
}

/// Scale-aware comparison: absolute near zero, relative away from it.
pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let scale = a.abs().max(b.abs());
    (a - b).abs() <= tol.abs.max(tol.rel * scale)
}

/// Reject NaN and infinities before they poison a convergence test.
pub fn ensure_finite(value: Real, what: &'static str) -> CoreResult<Real> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CoreError::NonFinite { what, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_defaults_to_max() {
        assert_eq!(NormKind::default(), NormKind::Max);
    }

    #[test]
    fn comparison_switches_regime_with_scale() {
        let tol = Tolerances::default();
        // Near zero the absolute tolerance decides.
        assert!(nearly_equal(0.0, 5e-13, tol));
        assert!(!nearly_equal(0.0, 5e-10, tol));
        // At large magnitudes the relative one does.
        assert!(nearly_equal(1e6, 1e6 * (1.0 + 1e-10), tol));
        assert!(!nearly_equal(1e6, 1e6 + 1.0, tol));
    }

    #[test]
    fn finite_values_pass_through() {
        assert_eq!(ensure_finite(-2.5, "residual").unwrap(), -2.5);
    }

    #[test]
    fn nan_and_infinity_name_the_quantity() {
        for bad in [Real::NAN, Real::INFINITY, Real::NEG_INFINITY] {
            let err = ensure_finite(bad, "convergence error").unwrap_err();
            assert!(err.to_string().contains("convergence error"));
        }
    }
}
