//! Forwarding decorator that journals every call.
//!
//! Replaces runtime method rewriting for tracing/replay tooling: the recorder
//! implements the same Solver contract, holds the wrapped component, forwards
//! every call and appends the method name to a journal.

use std::marker::PhantomData;

use cpl_core::{InstanceId, Real};
use cpl_state::Field;
use tracing::trace;

use crate::checkpoint::CheckpointMethod;
use crate::error::SolverResult;
use crate::solver::{IterateOutcome, Solver, TimeStepRequest};

/// Solver decorator recording the sequence of calls it forwards.
///
/// The instance id is assigned by the caller at construction, so log lines
/// can be attributed without any shared counter.
pub struct RecordingSolver<F: Field, S: Solver<F>> {
    id: InstanceId,
    inner: S,
    journal: Vec<&'static str>,
    _marker: PhantomData<fn() -> F>,
}

impl<F: Field, S: Solver<F>> RecordingSolver<F, S> {
    pub fn new(id: InstanceId, inner: S) -> Self {
        Self {
            id,
            inner,
            journal: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Calls forwarded so far, in order.
    pub fn journal(&self) -> &[&'static str] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn record(&mut self, method: &'static str) {
        trace!(instance = %self.id, method, "solver call");
        self.journal.push(method);
    }
}

impl<F: Field, S: Solver<F>> Solver<F> for RecordingSolver<F, S> {
    fn init(&mut self) -> SolverResult<()> {
        self.record("init");
        self.inner.init()
    }

    fn terminate(&mut self) -> SolverResult<()> {
        self.record("terminate");
        self.inner.terminate()
    }

    fn present_time(&self) -> Real {
        self.inner.present_time()
    }

    fn compute_time_step(&mut self) -> SolverResult<TimeStepRequest> {
        self.record("compute_time_step");
        self.inner.compute_time_step()
    }

    fn init_time_step(&mut self, dt: Real) -> SolverResult<()> {
        self.record("init_time_step");
        self.inner.init_time_step(dt)
    }

    fn solve(&mut self) -> SolverResult<bool> {
        self.record("solve");
        self.inner.solve()
    }

    fn iterate(&mut self) -> SolverResult<IterateOutcome> {
        self.record("iterate");
        self.inner.iterate()
    }

    fn validate_time_step(&mut self) -> SolverResult<()> {
        self.record("validate_time_step");
        self.inner.validate_time_step()
    }

    fn abort_time_step(&mut self) -> SolverResult<()> {
        self.record("abort_time_step");
        self.inner.abort_time_step()
    }

    fn set_stationary_mode(&mut self, stationary: bool) -> SolverResult<()> {
        self.record("set_stationary_mode");
        self.inner.set_stationary_mode(stationary)
    }

    fn is_stationary(&self) -> bool {
        self.inner.is_stationary()
    }

    fn save(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.record("save");
        self.inner.save(label, method)
    }

    fn restore(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.record("restore");
        self.inner.restore(label, method)
    }

    fn forget(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.record("forget");
        self.inner.forget(label, method)
    }

    fn set_checks_enabled(&mut self, enabled: bool) {
        self.inner.set_checks_enabled(enabled);
    }

    fn output_field_names(&self) -> Vec<String> {
        self.inner.output_field_names()
    }

    fn input_field_names(&self) -> Vec<String> {
        self.inner.input_field_names()
    }

    fn get_output_field(&self, name: &str) -> SolverResult<F> {
        self.inner.get_output_field(name)
    }

    fn get_input_field_template(&self, name: &str) -> SolverResult<F> {
        self.inner.get_input_field_template(name)
    }

    fn set_input_field(&mut self, name: &str, field: F) -> SolverResult<()> {
        self.record("set_input_field");
        self.inner.set_input_field(name, field)
    }

    fn get_output_value(&self, name: &str) -> SolverResult<Real> {
        self.inner.get_output_value(name)
    }

    fn set_input_value(&mut self, name: &str, value: Real) -> SolverResult<()> {
        self.record("set_input_value");
        self.inner.set_input_value(name, value)
    }
}
