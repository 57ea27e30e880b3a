//! Incremental thin QR over composite-state columns.
//!
//! Columns live in the (possibly distributed) state space, so `Q` is a list
//! of orthonormal `CollaborativeState`s and only `R` is a small dense matrix.
//! Appending uses modified Gram-Schmidt; removing the oldest column is a
//! Givens downdate, not a refactorization.

use cpl_core::Real;
use cpl_state::{CollaborativeState, Field, StateResult};
use nalgebra::{DMatrix, DVector};

/// Relative threshold under which a new column counts as linearly dependent.
const DEPENDENT_TOL: Real = 1e-14;

/// Thin QR factorization maintained one column at a time.
pub struct IncrementalQr<F: Field> {
    q: Vec<CollaborativeState<F>>,
    r: DMatrix<Real>,
}

impl<F: Field> Default for IncrementalQr<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Field> IncrementalQr<F> {
    pub fn new() -> Self {
        Self {
            q: Vec::new(),
            r: DMatrix::zeros(0, 0),
        }
    }

    pub fn ncols(&self) -> usize {
        self.q.len()
    }

    pub fn q(&self) -> &[CollaborativeState<F>] {
        &self.q
    }

    pub fn r(&self) -> &DMatrix<Real> {
        &self.r
    }

    pub fn clear(&mut self) {
        self.q.clear();
        self.r = DMatrix::zeros(0, 0);
    }

    /// Append a column via modified Gram-Schmidt.
    ///
    /// Returns `false` (and leaves the factorization unchanged) when the
    /// column is numerically dependent on the existing basis.
    pub fn push(&mut self, mut col: CollaborativeState<F>) -> StateResult<bool> {
        let original_norm = col.norm2();
        let k = self.q.len();
        let mut h = DVector::zeros(k + 1);
        for i in 0..k {
            let hi = self.q[i].dot(&col)?;
            col.imuladd(-hi, &self.q[i])?;
            h[i] = hi;
        }
        let rkk = col.norm2();
        if rkk <= DEPENDENT_TOL * original_norm.max(1.0) {
            return Ok(false);
        }
        h[k] = rkk;
        col.scale(1.0 / rkk);

        let mut r = DMatrix::zeros(k + 1, k + 1);
        r.view_mut((0, 0), (k, k)).copy_from(&self.r);
        r.column_mut(k).copy_from(&h);
        self.r = r;
        self.q.push(col);
        Ok(true)
    }

    /// Remove the oldest column by a sequence of Givens rotations.
    ///
    /// Dropping column 0 of `R` leaves an upper-Hessenberg factor; each
    /// rotation zeroes one subdiagonal entry and is applied to the matching
    /// pair of `Q` columns so that `Q·R` still equals the remaining window.
    pub fn remove_oldest(&mut self) -> StateResult<()> {
        let k = self.q.len();
        if k == 0 {
            return Ok(());
        }
        if k == 1 {
            self.clear();
            return Ok(());
        }

        let mut h = self.r.columns(1, k - 1).into_owned();
        for i in 0..k - 1 {
            let a = h[(i, i)];
            let b = h[(i + 1, i)];
            let radius = (a * a + b * b).sqrt();
            if radius == 0.0 {
                continue;
            }
            let c = a / radius;
            let s = b / radius;
            for col in i..k - 1 {
                let x = h[(i, col)];
                let y = h[(i + 1, col)];
                h[(i, col)] = c * x + s * y;
                h[(i + 1, col)] = -s * x + c * y;
            }
            // Q ← Q·Gᵀ keeps the product unchanged.
            let qi = self.q[i].clone();
            let qi1 = self.q[i + 1].clone();
            let mut new_qi = qi.mul(c);
            new_qi.imuladd(s, &qi1)?;
            let mut new_qi1 = qi1.mul(c);
            new_qi1.imuladd(-s, &qi)?;
            self.q[i] = new_qi;
            self.q[i + 1] = new_qi1;
        }
        self.r = h.rows(0, k - 1).into_owned();
        self.q.pop();
        Ok(())
    }

    /// Cheap condition estimate: ratio of extreme `|R|` diagonal entries.
    pub fn cond_estimate(&self) -> Real {
        let k = self.q.len();
        if k == 0 {
            return 1.0;
        }
        let mut lo = Real::INFINITY;
        let mut hi: Real = 0.0;
        for i in 0..k {
            let d = self.r[(i, i)].abs();
            lo = lo.min(d);
            hi = hi.max(d);
        }
        if lo == 0.0 { Real::INFINITY } else { hi / lo }
    }

    /// Least-squares coefficients: solve `R·γ = Qᵀ·rhs` by back substitution.
    pub fn solve_lsq(&self, rhs: &CollaborativeState<F>) -> StateResult<DVector<Real>> {
        let k = self.q.len();
        let mut qtr = DVector::zeros(k);
        for i in 0..k {
            qtr[i] = self.q[i].dot(rhs)?;
        }
        let mut gamma = DVector::zeros(k);
        for i in (0..k).rev() {
            let mut acc = qtr[i];
            for j in i + 1..k {
                acc -= self.r[(i, j)] * gamma[j];
            }
            let d = self.r[(i, i)];
            gamma[i] = if d.abs() > 0.0 { acc / d } else { 0.0 };
        }
        Ok(gamma)
    }

    /// `R·γ`, the basis-space image of the coefficients.
    pub fn r_times(&self, gamma: &DVector<Real>) -> DVector<Real> {
        &self.r * gamma
    }
}
