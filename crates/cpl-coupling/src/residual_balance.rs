//! Residual balancing between exactly two child solvers.
//!
//! Each child exposes a numeric accuracy-request input and a residual
//! output. Every outer iteration estimates each child's convergence rate
//! from consecutive residual ratios and sets the next requested accuracy so
//! neither side over-solves while the joint residual keeps shrinking. The
//! update formulas are a numeric policy validated by behavior, not derived.

use cpl_core::Real;
use cpl_solver::IterateOutcome;
use cpl_state::Field;
use tracing::debug;

use crate::chassis::{Algorithm, Coupler, CouplerCore};
use crate::error::{CouplingError, CouplingResult};

/// Residual-balancing configuration.
#[derive(Clone, Debug)]
pub struct ResidualBalanceConfig {
    /// Target residual for each child, in child order.
    pub targets: [Real; 2],
    /// Name of the accuracy-request input value on each child.
    pub accuracy_name: String,
    /// Name of the residual output value on each child.
    pub residual_name: String,
    /// Maximum outer iterations per step.
    pub max_iter: usize,
    /// Shrink factor applied to the joint residual when requesting accuracy.
    pub shrink: Real,
}

impl Default for ResidualBalanceConfig {
    fn default() -> Self {
        Self {
            targets: [1e-6, 1e-6],
            accuracy_name: "accuracy".into(),
            residual_name: "residual".into(),
            max_iter: 100,
            shrink: 0.1,
        }
    }
}

/// The balancing policy.
pub struct ResidualBalance {
    cfg: ResidualBalanceConfig,
    rates: [Real; 2],
    prev_residuals: Option<[Real; 2]>,
}

impl ResidualBalance {
    pub fn new(cfg: ResidualBalanceConfig) -> CouplingResult<Self> {
        if !(cfg.shrink > 0.0 && cfg.shrink < 1.0) {
            return Err(CouplingError::InvalidConfig {
                what: "shrink factor must lie in (0, 1)",
            });
        }
        if cfg.targets.iter().any(|t| *t <= 0.0) {
            return Err(CouplingError::InvalidConfig {
                what: "target residuals must be positive",
            });
        }
        Ok(Self {
            cfg,
            rates: [0.5, 0.5],
            prev_residuals: None,
        })
    }
}

impl<F: Field> Algorithm<F> for ResidualBalance {
    fn validate(&self, core: &CouplerCore<F>) -> CouplingResult<()> {
        if core.children().len() != 2 {
            return Err(CouplingError::InvalidConfig {
                what: "residual balancing requires exactly two child solvers",
            });
        }
        Ok(())
    }

    fn iterate(&mut self, core: &mut CouplerCore<F>) -> CouplingResult<IterateOutcome> {
        // Sample each child's residual with one sub-iteration before deciding
        // how hard to push it next.
        let mut succeeded = true;
        let mut residuals = [0.0; 2];
        for i in 0..2 {
            let out = core.children_mut()[i].iterate()?;
            succeeded &= out.succeeded;
            residuals[i] = core.children()[i].get_output_value(&self.cfg.residual_name)?;
        }

        // Smoothed per-child contraction rate from consecutive ratios.
        if let Some(prev) = self.prev_residuals {
            for i in 0..2 {
                if prev[i] > 0.0 {
                    let raw = (residuals[i] / prev[i]).clamp(1e-6, 1.0);
                    self.rates[i] = (self.rates[i] * raw).sqrt();
                }
            }
        }
        self.prev_residuals = Some(residuals);

        // Request only as much accuracy as the joint residual justifies.
        let joint = residuals[0].min(residuals[1]);
        let mut converged = true;
        for i in 0..2 {
            let target = self.cfg.targets[i];
            let request = (self.cfg.shrink * joint * self.rates[i]).max(target);
            core.children_mut()[i].set_input_value(&self.cfg.accuracy_name, request)?;
            converged &= residuals[i] <= target;
        }
        debug!(
            r0 = residuals[0],
            r1 = residuals[1],
            rate0 = self.rates[0],
            rate1 = self.rates[1],
            "residual balance iteration"
        );

        Ok(IterateOutcome {
            succeeded,
            converged: succeeded && converged,
        })
    }

    fn max_iter(&self) -> usize {
        self.cfg.max_iter
    }

    fn begin_step(&mut self) {
        self.rates = [0.5, 0.5];
        self.prev_residuals = None;
    }
}

/// Residual-balancing coupling engine.
pub type ResidualBalanceCoupler<F> = Coupler<F, ResidualBalance>;

impl<F: Field> ResidualBalanceCoupler<F> {
    pub fn with_config(core: CouplerCore<F>, cfg: ResidualBalanceConfig) -> CouplingResult<Self> {
        Coupler::new(core, ResidualBalance::new(cfg)?)
    }
}
