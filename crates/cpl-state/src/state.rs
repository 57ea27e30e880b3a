//! Named scalar/field collection with vector-space arithmetic.

use std::collections::BTreeMap;

use cpl_core::{NormKind, Real};
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};
use crate::field::Field;

/// A named collection of scalar values and opaque field values.
///
/// Two states are *compatible* for arithmetic iff they declare the same
/// scalar names and the same field names. Slots may be declared but unset
/// (this is what [`SharedState::clone_empty`] produces); arithmetic touching
/// an unset slot fails, compatibility checks do not.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "F: Serialize",
    deserialize = "F: serde::de::DeserializeOwned"
))]
pub struct SharedState<F: Field> {
    values: BTreeMap<String, Option<Real>>,
    fields: BTreeMap<String, Option<F>>,
}

impl<F: Field> Default for SharedState<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Field> SharedState<F> {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Declare a scalar slot without giving it a value.
    pub fn declare_value(&mut self, name: impl Into<String>) {
        self.values.entry(name.into()).or_insert(None);
    }

    /// Declare a field slot without giving it a value.
    pub fn declare_field(&mut self, name: impl Into<String>) {
        self.fields.entry(name.into()).or_insert(None);
    }

    /// Set a scalar, declaring the name if needed.
    pub fn set_value(&mut self, name: impl Into<String>, v: Real) {
        self.values.insert(name.into(), Some(v));
    }

    /// Set a field, declaring the name if needed.
    pub fn set_field(&mut self, name: impl Into<String>, f: F) {
        self.fields.insert(name.into(), Some(f));
    }

    pub fn get_value(&self, name: &str) -> StateResult<Real> {
        match self.values.get(name) {
            Some(Some(v)) => Ok(*v),
            Some(None) => Err(StateError::Unset { name: name.into() }),
            None => Err(StateError::Unknown { name: name.into() }),
        }
    }

    pub fn get_field(&self, name: &str) -> StateResult<&F> {
        match self.fields.get(name) {
            Some(Some(f)) => Ok(f),
            Some(None) => Err(StateError::Unset { name: name.into() }),
            None => Err(StateError::Unknown { name: name.into() }),
        }
    }

    pub fn value_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Total degrees of freedom over set slots (scalars count one each).
    pub fn dof(&self) -> usize {
        let fields: usize = self.fields.values().flatten().map(Field::dof).sum();
        fields + self.values.values().flatten().count()
    }

    /// Same scalar names and same field names.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self.fields.len() == other.fields.len()
            && self.values.keys().eq(other.values.keys())
            && self.fields.keys().eq(other.fields.keys())
    }

    fn check_compatible(&self, other: &Self, op: &'static str) -> StateResult<()> {
        if self.is_compatible(other) {
            Ok(())
        } else {
            Err(StateError::Incompatible { op })
        }
    }

    /// Structure only: same names, every slot unset.
    pub fn clone_empty(&self) -> Self {
        Self {
            values: self.values.keys().map(|k| (k.clone(), None)).collect(),
            fields: self.fields.keys().map(|k| (k.clone(), None)).collect(),
        }
    }

    /// In-place assignment from a compatible state.
    pub fn copy_from(&mut self, other: &Self) -> StateResult<()> {
        self.check_compatible(other, "copy")?;
        for (dst, src) in self.values.values_mut().zip(other.values.values()) {
            *dst = *src;
        }
        for (dst, src) in self.fields.values_mut().zip(other.fields.values()) {
            *dst = src.clone();
        }
        Ok(())
    }

    /// Walk paired slots, failing on the first unset one.
    fn zip_mut<'a>(
        a: &'a mut BTreeMap<String, Option<F>>,
        b: &'a BTreeMap<String, Option<F>>,
    ) -> impl Iterator<Item = (&'a String, &'a mut Option<F>, &'a Option<F>)> {
        // Compatibility was checked by the caller, so sorted keys line up.
        a.iter_mut()
            .zip(b.values())
            .map(|((k, dst), src)| (k, dst, src))
    }

    pub fn add_assign(&mut self, other: &Self) -> StateResult<()> {
        self.check_compatible(other, "add")?;
        for ((name, dst), src) in self.values.iter_mut().zip(other.values.values()) {
            let (a, b) = Self::both_set(name, dst.as_mut(), src.as_ref())?;
            *a += b;
        }
        for (name, dst, src) in Self::zip_mut(&mut self.fields, &other.fields) {
            let (a, b) = Self::both_set(name, dst.as_mut(), src.as_ref())?;
            a.add_assign(b)?;
        }
        Ok(())
    }

    pub fn sub_assign(&mut self, other: &Self) -> StateResult<()> {
        self.check_compatible(other, "sub")?;
        for ((name, dst), src) in self.values.iter_mut().zip(other.values.values()) {
            let (a, b) = Self::both_set(name, dst.as_mut(), src.as_ref())?;
            *a -= b;
        }
        for (name, dst, src) in Self::zip_mut(&mut self.fields, &other.fields) {
            let (a, b) = Self::both_set(name, dst.as_mut(), src.as_ref())?;
            a.sub_assign(b)?;
        }
        Ok(())
    }

    pub fn scale(&mut self, s: Real) {
        for v in self.values.values_mut().flatten() {
            *v *= s;
        }
        for f in self.fields.values_mut().flatten() {
            f.scale(s);
        }
    }

    /// Fused `self += s * other`, no temporary copy of `other`.
    ///
    /// `s == 0` is a no-op (compatibility is still enforced).
    pub fn imuladd(&mut self, s: Real, other: &Self) -> StateResult<()> {
        self.check_compatible(other, "imuladd")?;
        if s == 0.0 {
            return Ok(());
        }
        for ((name, dst), src) in self.values.iter_mut().zip(other.values.values()) {
            let (a, b) = Self::both_set(name, dst.as_mut(), src.as_ref())?;
            *a += s * b;
        }
        for (name, dst, src) in Self::zip_mut(&mut self.fields, &other.fields) {
            let (a, b) = Self::both_set(name, dst.as_mut(), src.as_ref())?;
            a.axpy(s, b)?;
        }
        Ok(())
    }

    pub fn dot(&self, other: &Self) -> StateResult<Real> {
        self.check_compatible(other, "dot")?;
        let mut acc = 0.0;
        for ((name, a), b) in self.values.iter().zip(other.values.values()) {
            let (a, b) = Self::both_ref(name, a.as_ref(), b.as_ref())?;
            acc += a * b;
        }
        for ((name, a), b) in self.fields.iter().zip(other.fields.values()) {
            let (a, b) = Self::both_ref(name, a.as_ref(), b.as_ref())?;
            acc += a.dot(b)?;
        }
        Ok(acc)
    }

    /// Max absolute value over all scalars and field components.
    pub fn norm_max(&self) -> Real {
        let scalars = self.values.values().flatten().fold(0.0_f64, |m, v| m.max(v.abs()));
        self.fields
            .values()
            .flatten()
            .fold(scalars, |m, f| m.max(f.norm_max()))
    }

    /// Euclidean norm over all components.
    pub fn norm2(&self) -> Real {
        self.norm2_sq().sqrt()
    }

    pub(crate) fn norm2_sq(&self) -> Real {
        let scalars: Real = self.values.values().flatten().map(|v| v * v).sum();
        let fields: Real = self.fields.values().flatten().map(Field::norm2_sq).sum();
        scalars + fields
    }

    pub fn norm(&self, kind: NormKind) -> Real {
        match kind {
            NormKind::Max => self.norm_max(),
            NormKind::Two => self.norm2(),
        }
    }

    /// Convenience: `self + other` as a new state.
    pub fn add(&self, other: &Self) -> StateResult<Self> {
        let mut out = self.clone();
        out.add_assign(other)?;
        Ok(out)
    }

    /// Convenience: `self - other` as a new state.
    pub fn sub(&self, other: &Self) -> StateResult<Self> {
        let mut out = self.clone();
        out.sub_assign(other)?;
        Ok(out)
    }

    /// Convenience: `self * s` as a new state.
    pub fn mul(&self, s: Real) -> Self {
        let mut out = self.clone();
        out.scale(s);
        out
    }

    fn both_set<'a, T>(
        name: &str,
        a: Option<&'a mut T>,
        b: Option<&'a T>,
    ) -> StateResult<(&'a mut T, &'a T)> {
        match (a, b) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(StateError::Unset { name: name.into() }),
        }
    }

    fn both_ref<'a, T>(
        name: &str,
        a: Option<&'a T>,
        b: Option<&'a T>,
    ) -> StateResult<(&'a T, &'a T)> {
        match (a, b) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(StateError::Unset { name: name.into() }),
        }
    }
}
