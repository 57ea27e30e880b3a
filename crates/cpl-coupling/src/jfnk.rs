//! Jacobian-free Newton-Krylov coupling.
//!
//! Solves `G(X) = F(X) − X = 0` with an outer Newton loop; each linear
//! system `J·Δ = −G(X)` is handled by a restart-free GMRES whose
//! Jacobian-vector products are directional finite differences. Every
//! product costs one full round of child solves.

use cpl_core::{ensure_finite, NormKind, Real};
use cpl_solver::{IterateOutcome, SolverError};
use cpl_state::{CollaborativeState, Field};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::chassis::{Algorithm, Coupler, CouplerCore};
use crate::error::{CouplingError, CouplingResult};

/// JFNK configuration.
#[derive(Clone, Copy, Debug)]
pub struct JfnkConfig {
    /// Newton convergence tolerance
    pub newton_tol: Real,
    /// Maximum Newton iterations per step
    pub newton_max_iter: usize,
    /// GMRES relative tolerance
    pub gmres_tol: Real,
    /// Maximum GMRES iterations (Krylov dimension) per Newton step
    pub gmres_max_iter: usize,
    /// Finite-difference step ε for Jacobian-vector products
    pub fd_epsilon: Real,
    /// Norm used by the Newton convergence test
    pub norm: NormKind,
}

impl Default for JfnkConfig {
    fn default() -> Self {
        Self {
            newton_tol: 1e-6,
            newton_max_iter: 10,
            gmres_tol: 1e-4,
            gmres_max_iter: 100,
            fd_epsilon: 1e-4,
            norm: NormKind::Max,
        }
    }
}

/// One Newton step per `iterate` call.
pub struct Jfnk {
    cfg: JfnkConfig,
}

impl Jfnk {
    pub fn new(cfg: JfnkConfig) -> CouplingResult<Self> {
        if cfg.fd_epsilon <= 0.0 {
            return Err(CouplingError::InvalidConfig {
                what: "finite-difference epsilon must be positive",
            });
        }
        Ok(Self { cfg })
    }

    /// `G(x) = F(x) − x`, plus the AND of the child solve statuses.
    fn eval_g<F: Field>(
        core: &mut CouplerCore<F>,
        x: &CollaborativeState<F>,
    ) -> CouplingResult<(CollaborativeState<F>, bool)> {
        let (f, ok) = core.eval_f(x)?;
        let mut g = f;
        g.sub_assign(x)?;
        Ok((g, ok))
    }

    /// Restart-free GMRES on `J·Δ = −g`, J·v by directional difference.
    ///
    /// Arnoldi builds the Krylov basis; Givens rotations keep a QR of the
    /// Hessenberg matrix so the residual is available at every step, and the
    /// small triangular system is solved by back substitution at the end.
    fn gmres<F: Field>(
        &self,
        core: &mut CouplerCore<F>,
        x: &CollaborativeState<F>,
        g: &CollaborativeState<F>,
    ) -> CouplingResult<(CollaborativeState<F>, bool)> {
        let eps = self.cfg.fd_epsilon;
        let m = self.cfg.gmres_max_iter;

        // Initial guess Δ = 0, so the first residual is the right-hand side.
        let b = g.mul(-1.0);
        let beta = b.norm2();
        let mut delta = g.mul(0.0);
        if beta == 0.0 {
            return Ok((delta, true));
        }

        let mut basis: Vec<CollaborativeState<F>> = vec![b.mul(1.0 / beta)];
        let mut hess = DMatrix::<Real>::zeros(m + 1, m);
        let mut givens: Vec<(Real, Real)> = Vec::new();
        let mut rhs = DVector::<Real>::zeros(m + 1);
        rhs[0] = beta;

        let mut all_ok = true;
        let mut k = 0;
        while k < m {
            // w = G'(x)·v ≈ (G(x + ε·v) − G(x)) / ε
            let mut x_pert = x.clone();
            x_pert.imuladd(eps, &basis[k])?;
            let (g_pert, ok) = Self::eval_g(core, &x_pert)?;
            all_ok &= ok;
            let mut w = g_pert;
            w.sub_assign(g)?;
            w.scale(1.0 / eps);

            for (i, v_i) in basis.iter().enumerate() {
                let h = w.dot(v_i)?;
                w.imuladd(-h, v_i)?;
                hess[(i, k)] = h;
            }
            let h_next = w.norm2();
            hess[(k + 1, k)] = h_next;

            // Apply accumulated rotations to the new column, then add one.
            for (i, (c, s)) in givens.iter().enumerate() {
                let a = hess[(i, k)];
                let b2 = hess[(i + 1, k)];
                hess[(i, k)] = c * a + s * b2;
                hess[(i + 1, k)] = -s * a + c * b2;
            }
            let a = hess[(k, k)];
            let b2 = hess[(k + 1, k)];
            let radius = (a * a + b2 * b2).sqrt();
            let (c, s) = if radius == 0.0 { (1.0, 0.0) } else { (a / radius, b2 / radius) };
            hess[(k, k)] = radius;
            hess[(k + 1, k)] = 0.0;
            let r0 = rhs[k];
            rhs[k] = c * r0;
            rhs[k + 1] = -s * r0;
            givens.push((c, s));

            let residual = rhs[k + 1].abs();
            k += 1;
            if residual < self.cfg.gmres_tol * beta || h_next == 0.0 {
                break;
            }
            if h_next > 0.0 {
                w.scale(1.0 / h_next);
                basis.push(w);
            } else {
                break;
            }
        }

        // Back substitution on the k×k triangular block.
        let mut y = DVector::<Real>::zeros(k);
        for i in (0..k).rev() {
            let mut acc = rhs[i];
            for j in i + 1..k {
                acc -= hess[(i, j)] * y[j];
            }
            let d = hess[(i, i)];
            y[i] = if d.abs() > 0.0 { acc / d } else { 0.0 };
        }
        for (i, v_i) in basis.iter().take(k).enumerate() {
            delta.imuladd(y[i], v_i)?;
        }
        Ok((delta, all_ok))
    }
}

impl<F: Field> Algorithm<F> for Jfnk {
    fn iterate(&mut self, core: &mut CouplerCore<F>) -> CouplingResult<IterateOutcome> {
        let x = core.snapshot();
        let (g, succeeded) = Self::eval_g(core, &x)?;

        let denom = x.norm(self.cfg.norm);
        let residual = g.norm(self.cfg.norm);
        let error = ensure_finite(
            if denom > 0.0 { residual / denom } else { residual },
            "newton convergence error",
        )
        .map_err(SolverError::from)?;
        if error < self.cfg.newton_tol {
            // Converged: leave the states at the solution.
            core.write_states(&x)?;
            return Ok(IterateOutcome {
                succeeded,
                converged: succeeded,
            });
        }

        let (delta, linear_ok) = self.gmres(core, &x, &g)?;
        let mut x_new = x;
        x_new.add_assign(&delta)?;
        core.write_states(&x_new)?;
        debug!(error, tol = self.cfg.newton_tol, "newton iteration");

        Ok(IterateOutcome {
            succeeded: succeeded && linear_ok,
            converged: false,
        })
    }

    fn max_iter(&self) -> usize {
        self.cfg.newton_max_iter
    }
}

/// JFNK coupling engine.
pub type JfnkCoupler<F> = Coupler<F, Jfnk>;

impl<F: Field> JfnkCoupler<F> {
    pub fn with_config(core: CouplerCore<F>, cfg: JfnkConfig) -> CouplingResult<Self> {
        Coupler::new(core, Jfnk::new(cfg)?)
    }
}
