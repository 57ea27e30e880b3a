//! Ordered composite of SharedStates.

use cpl_core::{NormKind, Real};

use crate::error::{StateError, StateResult};
use crate::field::Field;
use crate::state::SharedState;

/// An ordered composite of [`SharedState`]s.
///
/// Every operation is forwarded element-wise; the composite length is
/// validated before any element is touched, so mismatches fail fast with
/// nothing half-updated.
#[derive(Clone, Debug, Default)]
pub struct CollaborativeState<F: Field> {
    parts: Vec<SharedState<F>>,
}

impl<F: Field> CollaborativeState<F> {
    pub fn from_parts(parts: Vec<SharedState<F>>) -> Self {
        Self { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[SharedState<F>] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [SharedState<F>] {
        &mut self.parts
    }

    pub fn into_parts(self) -> Vec<SharedState<F>> {
        self.parts
    }

    fn check_len(&self, other: &Self) -> StateResult<()> {
        if self.parts.len() != other.parts.len() {
            return Err(StateError::CompositeLen {
                left: self.parts.len(),
                right: other.parts.len(),
            });
        }
        Ok(())
    }

    pub fn clone_empty(&self) -> Self {
        Self {
            parts: self.parts.iter().map(SharedState::clone_empty).collect(),
        }
    }

    pub fn copy_from(&mut self, other: &Self) -> StateResult<()> {
        self.check_len(other)?;
        for (dst, src) in self.parts.iter_mut().zip(&other.parts) {
            dst.copy_from(src)?;
        }
        Ok(())
    }

    pub fn add_assign(&mut self, other: &Self) -> StateResult<()> {
        self.check_len(other)?;
        for (dst, src) in self.parts.iter_mut().zip(&other.parts) {
            dst.add_assign(src)?;
        }
        Ok(())
    }

    pub fn sub_assign(&mut self, other: &Self) -> StateResult<()> {
        self.check_len(other)?;
        for (dst, src) in self.parts.iter_mut().zip(&other.parts) {
            dst.sub_assign(src)?;
        }
        Ok(())
    }

    pub fn scale(&mut self, s: Real) {
        for p in &mut self.parts {
            p.scale(s);
        }
    }

    /// Fused `self += s * other`; no-op for `s == 0`.
    pub fn imuladd(&mut self, s: Real, other: &Self) -> StateResult<()> {
        self.check_len(other)?;
        for (dst, src) in self.parts.iter_mut().zip(&other.parts) {
            dst.imuladd(s, src)?;
        }
        Ok(())
    }

    pub fn dot(&self, other: &Self) -> StateResult<Real> {
        self.check_len(other)?;
        let mut acc = 0.0;
        for (a, b) in self.parts.iter().zip(&other.parts) {
            acc += a.dot(b)?;
        }
        Ok(acc)
    }

    pub fn norm_max(&self) -> Real {
        self.parts.iter().fold(0.0, |m, p| m.max(p.norm_max()))
    }

    pub fn norm2(&self) -> Real {
        self.parts
            .iter()
            .map(SharedState::norm2_sq)
            .sum::<Real>()
            .sqrt()
    }

    pub fn norm(&self, kind: NormKind) -> Real {
        match kind {
            NormKind::Max => self.norm_max(),
            NormKind::Two => self.norm2(),
        }
    }

    pub fn sub(&self, other: &Self) -> StateResult<Self> {
        let mut out = self.clone();
        out.sub_assign(other)?;
        Ok(out)
    }

    pub fn mul(&self, s: Real) -> Self {
        let mut out = self.clone();
        out.scale(s);
        out
    }
}
