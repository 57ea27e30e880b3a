//! Damped fixed-point iteration.

use cpl_core::{ensure_finite, NormKind, Real};
use cpl_solver::{IterateOutcome, SolverError};
use cpl_state::Field;
use tracing::debug;

use crate::chassis::{Algorithm, Coupler, CouplerCore};
use crate::error::{CouplingError, CouplingResult};

/// Fixed-point configuration.
#[derive(Clone, Copy, Debug)]
pub struct FixedPointConfig {
    /// Relative convergence tolerance
    pub tol: Real,
    /// Maximum coupling iterations per step
    pub max_iter: usize,
    /// Damping factor α in `X ← α·F(X) + (1−α)·X`
    pub damping: Real,
    /// Norm used by the convergence test
    pub norm: NormKind,
}

impl Default for FixedPointConfig {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iter: 100,
            damping: 1.0,
            norm: NormKind::Max,
        }
    }
}

/// The damped fixed-point rule: `X ← α·F(X) + (1−α)·X`, converged when
/// `‖F(X) − X‖ / ‖X_new‖ < tol`.
pub struct FixedPoint {
    cfg: FixedPointConfig,
}

impl FixedPoint {
    pub fn new(cfg: FixedPointConfig) -> CouplingResult<Self> {
        if !(cfg.damping > 0.0 && cfg.damping <= 1.0) {
            return Err(CouplingError::InvalidConfig {
                what: "damping factor must lie in (0, 1]",
            });
        }
        Ok(Self { cfg })
    }
}

impl<F: Field> Algorithm<F> for FixedPoint {
    fn iterate(&mut self, core: &mut CouplerCore<F>) -> CouplingResult<IterateOutcome> {
        let x = core.snapshot();
        let (f, succeeded) = core.eval_f(&x)?;

        let mut diff = f;
        diff.sub_assign(&x)?;

        // X_new = X + α(F − X) = α·F + (1−α)·X
        let mut x_new = x;
        x_new.imuladd(self.cfg.damping, &diff)?;

        let denom = x_new.norm(self.cfg.norm);
        let change = diff.norm(self.cfg.norm);
        let error = ensure_finite(
            if denom > 0.0 { change / denom } else { change },
            "fixed-point convergence error",
        )
        .map_err(SolverError::from)?;

        core.write_states(&x_new)?;
        debug!(error, tol = self.cfg.tol, "fixed-point iteration");

        Ok(IterateOutcome {
            succeeded,
            converged: succeeded && error < self.cfg.tol,
        })
    }

    fn max_iter(&self) -> usize {
        self.cfg.max_iter
    }
}

/// Fixed-point coupling engine.
pub type FixedPointCoupler<F> = Coupler<F, FixedPoint>;

impl<F: Field> FixedPointCoupler<F> {
    pub fn with_config(core: CouplerCore<F>, cfg: FixedPointConfig) -> CouplingResult<Self> {
        Coupler::new(core, FixedPoint::new(cfg)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = FixedPointConfig::default();
        assert_eq!(cfg.tol, 1e-6);
        assert_eq!(cfg.max_iter, 100);
        assert_eq!(cfg.damping, 1.0);
        assert_eq!(cfg.norm, NormKind::Max);
    }

    #[test]
    fn damping_out_of_range_rejected() {
        let cfg = FixedPointConfig {
            damping: 0.0,
            ..Default::default()
        };
        assert!(FixedPoint::new(cfg).is_err());
        let cfg = FixedPointConfig {
            damping: 1.5,
            ..Default::default()
        };
        assert!(FixedPoint::new(cfg).is_err());
    }
}
