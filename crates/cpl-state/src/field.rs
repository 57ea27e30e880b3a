//! Opaque field contract and the dense reference implementation.

use crate::error::{StateError, StateResult};
use cpl_core::Real;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Contract every coupled field type must satisfy.
///
/// The coupling engines treat a field as an element of a vector space: they
/// add, scale, take dot products and norms, and clone. They never interpret
/// the contents. The mesh/interpolation subsystem supplies richer types; the
/// core mandates only [`DenseField`].
pub trait Field: Clone + Send + 'static {
    /// Number of degrees of freedom.
    fn dof(&self) -> usize;

    /// `self += other`.
    fn add_assign(&mut self, other: &Self) -> StateResult<()>;

    /// `self -= other`.
    fn sub_assign(&mut self, other: &Self) -> StateResult<()>;

    /// `self *= s`.
    fn scale(&mut self, s: Real);

    /// Fused `self += s * other`, without materializing `s * other`.
    fn axpy(&mut self, s: Real, other: &Self) -> StateResult<()>;

    /// Inner product.
    fn dot(&self, other: &Self) -> StateResult<Real>;

    /// Max absolute component.
    fn norm_max(&self) -> Real;

    /// Squared Euclidean norm (summable across composite states).
    fn norm2_sq(&self) -> Real;

    /// A field with the same structure and all components zero.
    fn zero_like(&self) -> Self;
}

/// Dense field backed by a `nalgebra` vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseField {
    data: DVector<Real>,
}

impl DenseField {
    pub fn from_vec(data: Vec<Real>) -> Self {
        Self {
            data: DVector::from_vec(data),
        }
    }

    pub fn zeros(dof: usize) -> Self {
        Self {
            data: DVector::zeros(dof),
        }
    }

    pub fn as_slice(&self) -> &[Real] {
        self.data.as_slice()
    }

    pub fn as_vector(&self) -> &DVector<Real> {
        &self.data
    }

    fn check_dof(&self, other: &Self, what: &'static str) -> StateResult<()> {
        if self.data.len() != other.data.len() {
            return Err(StateError::Shape {
                what,
                left: self.data.len(),
                right: other.data.len(),
            });
        }
        Ok(())
    }
}

impl Field for DenseField {
    fn dof(&self) -> usize {
        self.data.len()
    }

    fn add_assign(&mut self, other: &Self) -> StateResult<()> {
        self.check_dof(other, "add")?;
        self.data += &other.data;
        Ok(())
    }

    fn sub_assign(&mut self, other: &Self) -> StateResult<()> {
        self.check_dof(other, "sub")?;
        self.data -= &other.data;
        Ok(())
    }

    fn scale(&mut self, s: Real) {
        self.data *= s;
    }

    fn axpy(&mut self, s: Real, other: &Self) -> StateResult<()> {
        self.check_dof(other, "axpy")?;
        self.data.axpy(s, &other.data, 1.0);
        Ok(())
    }

    fn dot(&self, other: &Self) -> StateResult<Real> {
        self.check_dof(other, "dot")?;
        Ok(self.data.dot(&other.data))
    }

    fn norm_max(&self) -> Real {
        self.data.iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    fn norm2_sq(&self) -> Real {
        self.data.norm_squared()
    }

    fn zero_like(&self) -> Self {
        Self::zeros(self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axpy_matches_naive() {
        let mut a = DenseField::from_vec(vec![1.0, 2.0, -3.0]);
        let b = DenseField::from_vec(vec![0.5, -1.0, 4.0]);
        a.axpy(2.0, &b).unwrap();
        assert_eq!(a.as_slice(), &[2.0, 0.0, 5.0]);
    }

    #[test]
    fn shape_mismatch_is_fatal() {
        let mut a = DenseField::zeros(3);
        let b = DenseField::zeros(4);
        assert!(matches!(
            a.add_assign(&b),
            Err(StateError::Shape { left: 3, right: 4, .. })
        ));
    }

    #[test]
    fn norms() {
        let a = DenseField::from_vec(vec![3.0, -4.0]);
        assert_eq!(a.norm_max(), 4.0);
        assert_eq!(a.norm2_sq(), 25.0);
    }
}
