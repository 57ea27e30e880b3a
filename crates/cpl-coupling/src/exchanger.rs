//! Data movement between solvers and shared states.
//!
//! An exchanger is a binding between a transform and ordered lists of
//! (port, name) pairs: field reads, field writes, scalar reads, scalar
//! writes. Ports are indices into the owning engine's child/state tables,
//! which keeps ownership single-writer and lines up with the integer handles
//! used by remote worker tables.

use cpl_core::Real;
use cpl_solver::Solver;
use cpl_state::{Field, SharedState};

use crate::error::{CouplingError, CouplingResult};

/// Which table a binding addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortRef {
    /// Index into the engine's child solvers.
    Child(usize),
    /// Index into the engine's shared states.
    State(usize),
}

/// One (port, name) endpoint of an exchange.
#[derive(Clone, Debug)]
pub struct Binding {
    pub port: PortRef,
    pub name: String,
}

impl Binding {
    pub fn child(index: usize, name: impl Into<String>) -> Self {
        Self {
            port: PortRef::Child(index),
            name: name.into(),
        }
    }

    pub fn state(index: usize, name: impl Into<String>) -> Self {
        Self {
            port: PortRef::State(index),
            name: name.into(),
        }
    }
}

/// Pluggable transform applied between reads and writes.
///
/// `templates` carries the current shape of each destination field (when one
/// is available) so interpolating transforms can target the destination
/// discretization. Output arity must match the destination lists exactly.
pub trait ExchangeTransform<F: Field>: Send {
    fn apply(
        &self,
        fields: &[F],
        templates: &[Option<F>],
        values: &[Real],
    ) -> CouplingResult<(Vec<F>, Vec<Real>)>;
}

/// Identity transform: outputs are the inputs, in order.
pub struct DirectExchange;

impl<F: Field> ExchangeTransform<F> for DirectExchange {
    fn apply(
        &self,
        fields: &[F],
        _templates: &[Option<F>],
        values: &[Real],
    ) -> CouplingResult<(Vec<F>, Vec<Real>)> {
        Ok((fields.to_vec(), values.to_vec()))
    }
}

/// A transform plus its read/write bindings.
pub struct Exchanger<F: Field> {
    transform: Box<dyn ExchangeTransform<F>>,
    fields_to_get: Vec<Binding>,
    fields_to_set: Vec<Binding>,
    values_to_get: Vec<Binding>,
    values_to_set: Vec<Binding>,
}

impl<F: Field> Exchanger<F> {
    pub fn new(
        transform: Box<dyn ExchangeTransform<F>>,
        fields_to_get: Vec<Binding>,
        fields_to_set: Vec<Binding>,
        values_to_get: Vec<Binding>,
        values_to_set: Vec<Binding>,
    ) -> Self {
        Self {
            transform,
            fields_to_get,
            fields_to_set,
            values_to_get,
            values_to_set,
        }
    }

    /// Identity exchange over parallel (from, to) pairs.
    pub fn direct(fields: Vec<(Binding, Binding)>, values: Vec<(Binding, Binding)>) -> Self {
        let (fg, fs) = fields.into_iter().unzip();
        let (vg, vs) = values.into_iter().unzip();
        Self::new(Box::new(DirectExchange), fg, fs, vg, vs)
    }

    /// Run the exchange against the owning engine's tables.
    pub fn execute(
        &self,
        children: &mut [Box<dyn Solver<F>>],
        states: &mut [SharedState<F>],
    ) -> CouplingResult<()> {
        let mut fields = Vec::with_capacity(self.fields_to_get.len());
        for b in &self.fields_to_get {
            fields.push(read_field(b, children, states)?);
        }
        let mut values = Vec::with_capacity(self.values_to_get.len());
        for b in &self.values_to_get {
            values.push(read_value(b, children, states)?);
        }
        let templates: Vec<Option<F>> = self
            .fields_to_set
            .iter()
            .map(|b| read_field_template(b, children, states))
            .collect();

        let (out_fields, out_values) = self.transform.apply(&fields, &templates, &values)?;

        if out_fields.len() != self.fields_to_set.len() {
            return Err(CouplingError::Arity {
                what: "exchange transform field outputs",
                expected: self.fields_to_set.len(),
                got: out_fields.len(),
            });
        }
        if out_values.len() != self.values_to_set.len() {
            return Err(CouplingError::Arity {
                what: "exchange transform value outputs",
                expected: self.values_to_set.len(),
                got: out_values.len(),
            });
        }

        for (b, f) in self.fields_to_set.iter().zip(out_fields) {
            write_field(b, f, children, states)?;
        }
        for (b, v) in self.values_to_set.iter().zip(out_values) {
            write_value(b, v, children, states)?;
        }
        Ok(())
    }
}

fn child_at<'a, F: Field>(
    index: usize,
    children: &'a mut [Box<dyn Solver<F>>],
) -> CouplingResult<&'a mut Box<dyn Solver<F>>> {
    let len = children.len();
    children.get_mut(index).ok_or(CouplingError::PortOob {
        what: "child solver",
        index,
        len,
    })
}

fn state_at<'a, F: Field>(
    index: usize,
    states: &'a mut [SharedState<F>],
) -> CouplingResult<&'a mut SharedState<F>> {
    let len = states.len();
    states.get_mut(index).ok_or(CouplingError::PortOob {
        what: "shared state",
        index,
        len,
    })
}

fn read_field<F: Field>(
    b: &Binding,
    children: &mut [Box<dyn Solver<F>>],
    states: &mut [SharedState<F>],
) -> CouplingResult<F> {
    match b.port {
        PortRef::Child(i) => Ok(child_at(i, children)?.get_output_field(&b.name)?),
        PortRef::State(i) => Ok(state_at(i, states)?.get_field(&b.name)?.clone()),
    }
}

fn read_field_template<F: Field>(
    b: &Binding,
    children: &mut [Box<dyn Solver<F>>],
    states: &mut [SharedState<F>],
) -> Option<F> {
    match b.port {
        PortRef::Child(i) => children
            .get_mut(i)
            .and_then(|c| c.get_input_field_template(&b.name).ok()),
        PortRef::State(i) => states
            .get(i)
            .and_then(|s| s.get_field(&b.name).ok().cloned()),
    }
}

fn read_value<F: Field>(
    b: &Binding,
    children: &mut [Box<dyn Solver<F>>],
    states: &mut [SharedState<F>],
) -> CouplingResult<Real> {
    match b.port {
        PortRef::Child(i) => Ok(child_at(i, children)?.get_output_value(&b.name)?),
        PortRef::State(i) => Ok(state_at(i, states)?.get_value(&b.name)?),
    }
}

fn write_field<F: Field>(
    b: &Binding,
    field: F,
    children: &mut [Box<dyn Solver<F>>],
    states: &mut [SharedState<F>],
) -> CouplingResult<()> {
    match b.port {
        PortRef::Child(i) => Ok(child_at(i, children)?.set_input_field(&b.name, field)?),
        PortRef::State(i) => {
            state_at(i, states)?.set_field(b.name.clone(), field);
            Ok(())
        }
    }
}

fn write_value<F: Field>(
    b: &Binding,
    value: Real,
    children: &mut [Box<dyn Solver<F>>],
    states: &mut [SharedState<F>],
) -> CouplingResult<()> {
    match b.port {
        PortRef::Child(i) => Ok(child_at(i, children)?.set_input_value(&b.name, value)?),
        PortRef::State(i) => {
            state_at(i, states)?.set_value(b.name.clone(), value);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpl_state::DenseField;

    struct WrongArity;

    impl ExchangeTransform<DenseField> for WrongArity {
        fn apply(
            &self,
            _fields: &[DenseField],
            _templates: &[Option<DenseField>],
            _values: &[Real],
        ) -> CouplingResult<(Vec<DenseField>, Vec<Real>)> {
            Ok((Vec::new(), vec![1.0, 2.0]))
        }
    }

    #[test]
    fn direct_moves_values_between_states() {
        let mut src = SharedState::<DenseField>::new();
        src.set_value("out", 7.5);
        let mut dst = SharedState::<DenseField>::new();
        dst.declare_value("in");
        let mut states = vec![src, dst];
        let mut children: Vec<Box<dyn Solver<DenseField>>> = Vec::new();

        let ex = Exchanger::direct(
            vec![],
            vec![(Binding::state(0, "out"), Binding::state(1, "in"))],
        );
        ex.execute(&mut children, &mut states).unwrap();
        assert_eq!(states[1].get_value("in").unwrap(), 7.5);
    }

    #[test]
    fn wrong_output_arity_is_fatal() {
        let mut src = SharedState::<DenseField>::new();
        src.set_value("a", 1.0);
        let mut states = vec![src];
        let mut children: Vec<Box<dyn Solver<DenseField>>> = Vec::new();

        let ex = Exchanger::<DenseField>::new(
            Box::new(WrongArity),
            vec![],
            vec![],
            vec![Binding::state(0, "a")],
            vec![Binding::state(0, "a")],
        );
        let err = ex.execute(&mut children, &mut states).unwrap_err();
        assert!(matches!(
            err,
            CouplingError::Arity {
                expected: 1,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn port_out_of_range() {
        let mut states: Vec<SharedState<DenseField>> = Vec::new();
        let mut children: Vec<Box<dyn Solver<DenseField>>> = Vec::new();
        let ex = Exchanger::direct(
            vec![],
            vec![(Binding::state(3, "x"), Binding::state(0, "x"))],
        );
        assert!(matches!(
            ex.execute(&mut children, &mut states),
            Err(CouplingError::PortOob { index: 3, .. })
        ));
    }
}
