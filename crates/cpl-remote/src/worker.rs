//! The dispatch loop run by a worker process.
//!
//! A worker owns exactly one local Solver plus tables of SharedStates and
//! Exchangers addressed by small integers. It receives one tagged command at
//! a time, performs the matching local call and sends the answer back.
//! Access is strictly sequential (one in-flight command per peer), so the
//! tables need no locking.

use cpl_coupling::Exchanger;
use cpl_solver::{Solver, SolverResult};
use cpl_state::SharedState;
use tracing::trace;

use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{Command, Handle, Reply, WireField};
use crate::transport::WorkerEndpoint;

/// Slot table with free-list recycling, so long runs do not grow the table
/// without bound.
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    free: Vec<Handle>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, value: T) -> Handle {
        match self.free.pop() {
            Some(h) => {
                self.slots[h as usize] = Some(value);
                h
            }
            None => {
                self.slots.push(Some(value));
                (self.slots.len() - 1) as Handle
            }
        }
    }

    pub fn get(&self, handle: Handle) -> RemoteResult<&T> {
        self.slots
            .get(handle as usize)
            .and_then(Option::as_ref)
            .ok_or(RemoteError::UnknownHandle {
                what: "state",
                handle,
            })
    }

    pub fn get_mut(&mut self, handle: Handle) -> RemoteResult<&mut T> {
        self.slots
            .get_mut(handle as usize)
            .and_then(Option::as_mut)
            .ok_or(RemoteError::UnknownHandle {
                what: "state",
                handle,
            })
    }

    /// Free a slot and recycle its handle.
    pub fn remove(&mut self, handle: Handle) -> RemoteResult<T> {
        let value = self
            .slots
            .get_mut(handle as usize)
            .and_then(Option::take)
            .ok_or(RemoteError::UnknownHandle {
                what: "state",
                handle,
            })?;
        self.free.push(handle);
        Ok(value)
    }

    /// Take a value out while keeping the slot reserved; pair with `put`.
    fn take(&mut self, handle: Handle) -> RemoteResult<T> {
        self.slots
            .get_mut(handle as usize)
            .and_then(Option::take)
            .ok_or(RemoteError::UnknownHandle {
                what: "state",
                handle,
            })
    }

    fn put(&mut self, handle: Handle, value: T) {
        self.slots[handle as usize] = Some(value);
    }
}

/// One worker process: a local solver, its state table and its exchangers.
pub struct Worker<F: WireField> {
    solver: Box<dyn Solver<F>>,
    states: HandleTable<SharedState<F>>,
    exchangers: Vec<Exchanger<F>>,
}

impl<F: WireField> Worker<F> {
    pub fn new(solver: Box<dyn Solver<F>>, exchangers: Vec<Exchanger<F>>) -> Self {
        Self {
            solver,
            states: HandleTable::new(),
            exchangers,
        }
    }

    /// Blocking dispatch loop. Returns after answering `Terminate`, or with
    /// an error when the master hangs up.
    pub fn run(mut self, endpoint: WorkerEndpoint<F>) -> RemoteResult<()> {
        loop {
            let command = endpoint.recv()?;
            let tag = command.tag();
            let done = matches!(command, Command::Terminate);
            let reply = match self.execute(command) {
                Ok(reply) => reply,
                Err(message) => Reply::Failure(message),
            };
            trace!(tag, reply = reply.describe(), "dispatched command");
            endpoint.send(reply)?;
            if done {
                return Ok(());
            }
        }
    }

    fn execute(&mut self, command: Command<F>) -> Result<Reply<F>, String> {
        match command {
            Command::Init => unit(self.solver.init()),
            Command::Terminate => unit(self.solver.terminate()),
            Command::PresentTime => Ok(Reply::Time(self.solver.present_time())),
            Command::ComputeTimeStep => match self.solver.compute_time_step() {
                Ok(req) => Ok(Reply::TimeStep(req)),
                Err(e) => Err(e.to_string()),
            },
            Command::InitTimeStep { dt } => unit(self.solver.init_time_step(dt)),
            Command::Solve => match self.solver.solve() {
                Ok(status) => Ok(Reply::Status(status)),
                Err(e) => Err(e.to_string()),
            },
            Command::Iterate => match self.solver.iterate() {
                Ok(out) => Ok(Reply::Outcome(out)),
                Err(e) => Err(e.to_string()),
            },
            Command::ValidateTimeStep => unit(self.solver.validate_time_step()),
            Command::AbortTimeStep => unit(self.solver.abort_time_step()),
            Command::SetStationaryMode { stationary } => {
                unit(self.solver.set_stationary_mode(stationary))
            }
            Command::IsStationary => Ok(Reply::Status(self.solver.is_stationary())),
            Command::Save { label, method } => unit(self.solver.save(&label, method)),
            Command::Restore { label, method } => unit(self.solver.restore(&label, method)),
            Command::Forget { label, method } => unit(self.solver.forget(&label, method)),
            Command::SetChecksEnabled { enabled } => {
                self.solver.set_checks_enabled(enabled);
                Ok(Reply::Unit)
            }

            Command::OutputFieldNames => Ok(Reply::Names(self.solver.output_field_names())),
            Command::InputFieldNames => Ok(Reply::Names(self.solver.input_field_names())),
            Command::GetOutputField { name } => match self.solver.get_output_field(&name) {
                Ok(field) => Ok(Reply::Field(field)),
                Err(e) => Err(e.to_string()),
            },
            Command::GetInputFieldTemplate { name } => {
                match self.solver.get_input_field_template(&name) {
                    Ok(field) => Ok(Reply::Field(field)),
                    Err(e) => Err(e.to_string()),
                }
            }
            Command::SetInputField { name, field } => {
                unit(self.solver.set_input_field(&name, field))
            }
            Command::GetOutputValue { name } => match self.solver.get_output_value(&name) {
                Ok(v) => Ok(Reply::Value(v)),
                Err(e) => Err(e.to_string()),
            },
            Command::SetInputValue { name, value } => {
                unit(self.solver.set_input_value(&name, value))
            }

            Command::CreateState { state } => Ok(Reply::Handle(self.states.insert(state))),
            Command::FetchState { handle } => {
                Ok(Reply::State(fallible(self.states.get(handle))?.clone()))
            }
            Command::CloneState { handle } => {
                let copy = fallible(self.states.get(handle))?.clone();
                Ok(Reply::Handle(self.states.insert(copy)))
            }
            Command::CloneEmpty { handle } => {
                let empty = fallible(self.states.get(handle))?.clone_empty();
                Ok(Reply::Handle(self.states.insert(empty)))
            }
            Command::CopyState { dst, src } => self.binary(dst, src, |d, s| d.copy_from(s)),
            Command::AddAssign { dst, src } => self.binary(dst, src, |d, s| d.add_assign(s)),
            Command::SubAssign { dst, src } => self.binary(dst, src, |d, s| d.sub_assign(s)),
            Command::Scale { handle, factor } => {
                fallible(self.states.get_mut(handle))?.scale(factor);
                Ok(Reply::Unit)
            }
            Command::Imuladd { dst, factor, src } => {
                self.binary(dst, src, |d, s| d.imuladd(factor, s))
            }
            Command::Dot { left, right } => {
                let a = fallible(self.states.get(left))?;
                let b = fallible(self.states.get(right))?;
                match a.dot(b) {
                    Ok(v) => Ok(Reply::Value(v)),
                    Err(e) => Err(e.to_string()),
                }
            }
            Command::Norm { handle, kind } => {
                Ok(Reply::Value(fallible(self.states.get(handle))?.norm(kind)))
            }
            Command::StateSetValue {
                handle,
                name,
                value,
            } => {
                fallible(self.states.get_mut(handle))?.set_value(name, value);
                Ok(Reply::Unit)
            }
            Command::StateGetValue { handle, name } => {
                match fallible(self.states.get(handle))?.get_value(&name) {
                    Ok(v) => Ok(Reply::Value(v)),
                    Err(e) => Err(e.to_string()),
                }
            }
            Command::DeleteHandles { handles } => {
                for h in handles {
                    fallible(self.states.remove(h))?;
                }
                Ok(Reply::Unit)
            }

            Command::RunExchange { index, states } => self.run_exchange(index, &states),
        }
    }

    /// Binary state op; the source is copied out first so a command with
    /// `dst == src` stays well defined.
    fn binary(
        &mut self,
        dst: Handle,
        src: Handle,
        op: impl FnOnce(&mut SharedState<F>, &SharedState<F>) -> cpl_state::StateResult<()>,
    ) -> Result<Reply<F>, String> {
        let source = fallible(self.states.get(src))?.clone();
        let target = fallible(self.states.get_mut(dst))?;
        match op(target, &source) {
            Ok(()) => Ok(Reply::Unit),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Run a local exchanger against the worker's solver and the listed
    /// states. States are taken out of the table for the duration of the
    /// exchange and restored under the same handles.
    fn run_exchange(&mut self, index: usize, handles: &[Handle]) -> Result<Reply<F>, String> {
        let len = self.exchangers.len();
        let exchanger = self
            .exchangers
            .get(index)
            .ok_or_else(|| format!("unknown exchanger index {index} (have {len})"))?;

        let mut taken = Vec::with_capacity(handles.len());
        for &h in handles {
            match self.states.take(h) {
                Ok(s) => taken.push(s),
                Err(e) => {
                    // Put back what was already taken before failing.
                    for (&h2, s) in handles.iter().zip(taken) {
                        self.states.put(h2, s);
                    }
                    return Err(e.to_string());
                }
            }
        }

        let result = exchanger.execute(std::slice::from_mut(&mut self.solver), &mut taken);
        for (&h, s) in handles.iter().zip(taken) {
            self.states.put(h, s);
        }
        match result {
            Ok(()) => Ok(Reply::Unit),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn unit<F: WireField>(result: SolverResult<()>) -> Result<Reply<F>, String> {
    match result {
        Ok(()) => Ok(Reply::Unit),
        Err(e) => Err(e.to_string()),
    }
}

fn fallible<T>(result: RemoteResult<T>) -> Result<T, String> {
    result.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_table_recycles_freed_slots() {
        let mut table = HandleTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_eq!((a, b), (0, 1));
        assert_eq!(table.remove(a).unwrap(), "a");
        assert_eq!(table.len(), 1);
        // Freed slot comes back before the table grows.
        assert_eq!(table.insert("c"), a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unknown_handle_is_an_error() {
        let table: HandleTable<u8> = HandleTable::new();
        assert!(matches!(
            table.get(7),
            Err(RemoteError::UnknownHandle { handle: 7, .. })
        ));
    }

    #[test]
    fn double_remove_fails() {
        let mut table = HandleTable::new();
        let h = table.insert(1);
        table.remove(h).unwrap();
        assert!(table.remove(h).is_err());
    }
}
