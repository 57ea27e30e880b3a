//! Anderson acceleration with QR downdating.
//!
//! Keeps a window of the last `m` (residual-delta, state-delta) pairs. The
//! residual deltas are held as an incrementally maintained orthonormal basis;
//! when the window slides, the oldest column leaves via a Givens downdate
//! instead of a refactorization.

use std::collections::VecDeque;

use cpl_core::{ensure_finite, NormKind, Real};
use cpl_solver::{IterateOutcome, SolverError};
use cpl_state::{CollaborativeState, Field};
use tracing::debug;

use crate::chassis::{Algorithm, Coupler, CouplerCore};
use crate::error::{CouplingError, CouplingResult};
use crate::qr::IncrementalQr;

/// Anderson configuration.
#[derive(Clone, Copy, Debug)]
pub struct AndersonConfig {
    /// Relative convergence tolerance
    pub tol: Real,
    /// Maximum coupling iterations per step
    pub max_iter: usize,
    /// Window size m (number of retained delta pairs)
    pub order: usize,
    /// Damping factor β in (0, 1]
    pub damping: Real,
    /// Drop the oldest column when cond(R) exceeds this
    pub cond_threshold: Real,
    /// Norm used by the convergence test
    pub norm: NormKind,
}

impl Default for AndersonConfig {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iter: 100,
            order: 2,
            damping: 1.0,
            cond_threshold: 1e10,
            norm: NormKind::Max,
        }
    }
}

/// Windowed Anderson update, damped after Walker–Ni:
/// `X ← X + β·r − (ΔX + β·ΔF)·γ` with `R·γ = Qᵀ·r`.
///
/// For β = 1 this is `F(X)` minus the combination explained by the basis.
pub struct Anderson<F: Field> {
    cfg: AndersonConfig,
    qr: IncrementalQr<F>,
    dxs: VecDeque<CollaborativeState<F>>,
    prev: Option<(CollaborativeState<F>, CollaborativeState<F>)>,
}

impl<F: Field> Anderson<F> {
    pub fn new(cfg: AndersonConfig) -> CouplingResult<Self> {
        if !(cfg.damping > 0.0 && cfg.damping <= 1.0) {
            return Err(CouplingError::InvalidConfig {
                what: "Anderson damping factor must lie in (0, 1]",
            });
        }
        if cfg.order == 0 {
            return Err(CouplingError::InvalidConfig {
                what: "Anderson order must be at least 1",
            });
        }
        Ok(Self {
            cfg,
            qr: IncrementalQr::new(),
            dxs: VecDeque::new(),
            prev: None,
        })
    }

    /// Change the window size for subsequent steps.
    pub fn set_order(&mut self, order: usize) -> CouplingResult<()> {
        if order == 0 {
            return Err(CouplingError::InvalidConfig {
                what: "Anderson order must be at least 1",
            });
        }
        self.cfg.order = order;
        Ok(())
    }

    /// Change the damping factor; must lie in (0, 1].
    pub fn set_anderson_damping_factor(&mut self, damping: Real) -> CouplingResult<()> {
        if !(damping > 0.0 && damping <= 1.0) {
            return Err(CouplingError::InvalidConfig {
                what: "Anderson damping factor must lie in (0, 1]",
            });
        }
        self.cfg.damping = damping;
        Ok(())
    }

    fn drop_oldest(&mut self) -> CouplingResult<()> {
        self.qr.remove_oldest()?;
        self.dxs.pop_front();
        Ok(())
    }
}

impl<F: Field> Algorithm<F> for Anderson<F> {
    fn iterate(&mut self, core: &mut CouplerCore<F>) -> CouplingResult<IterateOutcome> {
        let x = core.snapshot();
        let (f, succeeded) = core.eval_f(&x)?;

        let mut r = f.clone();
        r.sub_assign(&x)?;
        let beta = self.cfg.damping;

        let mut x_new = x.clone();
        if let Some((x_prev, f_prev)) = self.prev.take() {
            let mut df = f.clone();
            df.sub_assign(&f_prev)?;
            let mut dx = x.clone();
            dx.sub_assign(&x_prev)?;

            // Slide the window before appending; a loop, not a single drop,
            // so an order reduced mid-step still shrinks the window.
            while self.qr.ncols() >= self.cfg.order {
                self.drop_oldest()?;
            }
            if self.qr.push(df)? {
                self.dxs.push_back(dx);
            }
            // Ill-conditioned windows shed their oldest column early.
            while self.qr.ncols() > 1 && self.qr.cond_estimate() > self.cfg.cond_threshold {
                debug!(cond = self.qr.cond_estimate(), "dropping column on condition guard");
                self.drop_oldest()?;
            }

            let gamma = self.qr.solve_lsq(&r)?;
            x_new.imuladd(beta, &r)?;
            for (j, dx_j) in self.dxs.iter().enumerate() {
                x_new.imuladd(-gamma[j], dx_j)?;
            }
            // Σ γ_j ΔF_j = Q·(R·γ), so the stored ΔF columns are never needed.
            let rg = self.qr.r_times(&gamma);
            for (j, q_j) in self.qr.q().iter().enumerate() {
                x_new.imuladd(-beta * rg[j], q_j)?;
            }
        } else {
            // No history yet: plain damped step.
            x_new.imuladd(beta, &r)?;
        }

        let denom = x_new.norm(self.cfg.norm);
        let change = r.norm(self.cfg.norm);
        let error = ensure_finite(
            if denom > 0.0 { change / denom } else { change },
            "anderson convergence error",
        )
        .map_err(SolverError::from)?;

        core.write_states(&x_new)?;
        self.prev = Some((x, f));
        debug!(
            error,
            window = self.qr.ncols(),
            tol = self.cfg.tol,
            "anderson iteration"
        );

        Ok(IterateOutcome {
            succeeded,
            converged: succeeded && error < self.cfg.tol,
        })
    }

    fn max_iter(&self) -> usize {
        self.cfg.max_iter
    }

    fn begin_step(&mut self) {
        self.qr.clear();
        self.dxs.clear();
        self.prev = None;
    }
}

/// Anderson coupling engine.
pub type AndersonCoupler<F> = Coupler<F, Anderson<F>>;

impl<F: Field> AndersonCoupler<F> {
    pub fn with_config(core: CouplerCore<F>, cfg: AndersonConfig) -> CouplingResult<Self> {
        Coupler::new(core, Anderson::new(cfg)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanger::{Binding, Exchanger};
    use cpl_solver::{MatrixToy, Solver};
    use cpl_state::{DenseField, SharedState};
    use nalgebra::DMatrix;

    /// One power-iteration child behind a 4-dof shared state.
    fn power_core() -> CouplerCore<DenseField> {
        let a = DMatrix::from_row_slice(
            4,
            4,
            &[
                4.0, 1.0, 0.0, 0.0, //
                1.0, 3.0, 1.0, 0.0, //
                0.0, 1.0, 2.0, 1.0, //
                0.0, 0.0, 1.0, 1.0, //
            ],
        );
        let children: Vec<Box<dyn Solver<DenseField>>> = vec![Box::new(MatrixToy::new(a))];
        let mut state = SharedState::new();
        state.set_field("x", DenseField::from_vec(vec![1.0; 4]));
        let distribute = Exchanger::direct(
            vec![(Binding::state(0, "x"), Binding::child(0, "x"))],
            vec![],
        );
        let collect = Exchanger::direct(
            vec![(Binding::child(0, "y"), Binding::state(0, "x"))],
            vec![],
        );
        CouplerCore::new(
            children,
            vec![state],
            vec![distribute, collect],
            vec![0],
            vec![1],
        )
    }

    #[test]
    fn window_shrinks_after_order_reduction() {
        let cfg = AndersonConfig {
            order: 3,
            tol: 1e-14,
            ..Default::default()
        };
        let mut coupler = AndersonCoupler::with_config(power_core(), cfg).unwrap();
        coupler.init().unwrap();
        coupler.init_time_step(1.0).unwrap();

        // First iterate has no history; the next three each add a column.
        for _ in 0..4 {
            coupler.iterate().unwrap();
        }
        assert_eq!(coupler.algorithm_mut().qr.ncols(), 3);

        coupler.algorithm_mut().set_order(1).unwrap();
        for _ in 0..2 {
            coupler.iterate().unwrap();
            assert!(coupler.algorithm_mut().qr.ncols() <= 1);
        }
    }

    #[test]
    fn condition_guard_sheds_columns_during_iteration() {
        // A threshold at the lower bound of cond(R) makes every multi-column
        // window count as ill-conditioned.
        let cfg = AndersonConfig {
            order: 3,
            tol: 1e-14,
            cond_threshold: 1.0,
            ..Default::default()
        };
        let mut coupler = AndersonCoupler::with_config(power_core(), cfg).unwrap();
        coupler.init().unwrap();
        coupler.init_time_step(1.0).unwrap();

        for _ in 0..5 {
            coupler.iterate().unwrap();
            assert!(coupler.algorithm_mut().qr.ncols() <= 1);
        }
    }

    #[test]
    fn defaults() {
        let cfg = AndersonConfig::default();
        assert_eq!(cfg.order, 2);
        assert_eq!(cfg.cond_threshold, 1e10);
        assert_eq!(cfg.damping, 1.0);
    }

    #[test]
    fn damping_bounds() {
        let mut a = Anderson::<DenseField>::new(AndersonConfig::default()).unwrap();
        assert!(a.set_anderson_damping_factor(0.5).is_ok());
        assert!(a.set_anderson_damping_factor(1.0).is_ok());
        assert!(a.set_anderson_damping_factor(0.0).is_err());
        assert!(a.set_anderson_damping_factor(1.1).is_err());
    }

    #[test]
    fn order_must_be_positive() {
        let cfg = AndersonConfig {
            order: 0,
            ..Default::default()
        };
        assert!(Anderson::<DenseField>::new(cfg).is_err());
    }
}
