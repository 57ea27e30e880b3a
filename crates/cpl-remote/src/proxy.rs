//! Master-side proxies: local stand-ins for remote solvers and states.
//!
//! A [`RemoteProcess`] addresses one peer or a whole process group through
//! the same call surface; reductions over group replies follow the semantics
//! of the call (AND for statuses, min for time steps, sum for accumulations,
//! max for magnitudes). Handle releases queued by dropped data proxies are
//! flushed in one batch just before the next command to the same peer.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use cpl_core::{NormKind, Real};
use cpl_coupling::Exchanger;
use cpl_solver::{
    CheckpointMethod, IterateOutcome, Solver, SolverResult, TimeStepRequest,
};
use cpl_state::SharedState;
use tracing::trace;

use crate::error::{RemoteError, RemoteResult};
use crate::protocol::{Command, Handle, Reply, WireField};
use crate::transport::{Peer, Transport};

struct ProcessInner<F: WireField> {
    peer: Peer<F>,
    pending_releases: Vec<Handle>,
}

impl<F: WireField> ProcessInner<F> {
    fn call(&mut self, command: Command<F>) -> RemoteResult<Vec<Reply<F>>> {
        if !self.pending_releases.is_empty() {
            let handles = std::mem::take(&mut self.pending_releases);
            trace!(count = handles.len(), "flushing queued handle releases");
            self.peer.broadcast(&Command::DeleteHandles { handles })?;
            expect_unit(self.peer.gather()?)?;
        }
        self.peer.broadcast(&command)?;
        self.peer
            .gather()?
            .into_iter()
            .map(|reply| match reply {
                Reply::Failure(message) => Err(RemoteError::Remote { message }),
                other => Ok(other),
            })
            .collect()
    }
}

/// Handle to one remote peer or a collective process group.
pub struct RemoteProcess<F: WireField> {
    inner: Arc<Mutex<ProcessInner<F>>>,
}

impl<F: WireField> std::fmt::Debug for RemoteProcess<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess").finish_non_exhaustive()
    }
}

impl<F: WireField> Clone for RemoteProcess<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: WireField> RemoteProcess<F> {
    /// Point-to-point connection to a single peer.
    pub fn point_to_point(transport: impl Transport<F> + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProcessInner {
                peer: Peer::Single(Box::new(transport)),
                pending_releases: Vec::new(),
            })),
        }
    }

    /// Collective process group. The rank count is checked here so a
    /// misconfigured group fails fast instead of deadlocking at first use.
    pub fn group(
        members: Vec<Box<dyn Transport<F>>>,
        expected_ranks: usize,
    ) -> RemoteResult<Self> {
        if members.is_empty() || members.len() != expected_ranks {
            return Err(RemoteError::GroupSize {
                expected: expected_ranks,
                got: members.len(),
            });
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(ProcessInner {
                peer: Peer::Group(members),
                pending_releases: Vec::new(),
            })),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.lock().map(|g| g.peer.len()).unwrap_or(0)
    }

    fn call(&self, command: Command<F>) -> RemoteResult<Vec<Reply<F>>> {
        self.inner
            .lock()
            .map_err(|_| RemoteError::Disconnected)?
            .call(command)
    }

    fn queue_release(&self, handle: Handle) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.pending_releases.push(handle);
        }
    }
}

// ---- reply reductions ----

fn protocol_err<F: WireField, T>(expected: &'static str, reply: &Reply<F>) -> RemoteResult<T> {
    Err(RemoteError::Protocol {
        expected,
        got: reply.describe().to_string(),
    })
}

fn expect_unit<F: WireField>(replies: Vec<Reply<F>>) -> RemoteResult<()> {
    for reply in replies {
        match reply {
            Reply::Unit => {}
            Reply::Failure(message) => return Err(RemoteError::Remote { message }),
            other => return protocol_err("unit", &other),
        }
    }
    Ok(())
}

/// AND over all ranks, so every rank agrees on success before anyone moves
/// on to a different call sequence.
fn reduce_status<F: WireField>(replies: Vec<Reply<F>>) -> RemoteResult<bool> {
    let mut all = true;
    for reply in replies {
        match reply {
            Reply::Status(s) => all &= s,
            other => return protocol_err("status", &other),
        }
    }
    Ok(all)
}

fn reduce_outcome<F: WireField>(replies: Vec<Reply<F>>) -> RemoteResult<IterateOutcome> {
    let mut out = IterateOutcome {
        succeeded: true,
        converged: true,
    };
    for reply in replies {
        match reply {
            Reply::Outcome(o) => {
                out.succeeded &= o.succeeded;
                out.converged &= o.converged;
            }
            other => return protocol_err("iterate outcome", &other),
        }
    }
    Ok(out)
}

fn reduce_time<F: WireField>(replies: Vec<Reply<F>>) -> RemoteResult<Real> {
    let mut t: Real = 0.0;
    for reply in replies {
        match reply {
            Reply::Time(v) => t = t.max(v),
            other => return protocol_err("time", &other),
        }
    }
    Ok(t)
}

/// Min over requested steps, AND over stop requests.
fn reduce_time_step<F: WireField>(replies: Vec<Reply<F>>) -> RemoteResult<TimeStepRequest> {
    let mut dt = Real::INFINITY;
    let mut stop = true;
    for reply in replies {
        match reply {
            Reply::TimeStep(req) => {
                dt = dt.min(req.dt);
                stop &= req.stop;
            }
            other => return protocol_err("time step", &other),
        }
    }
    if !dt.is_finite() {
        dt = 0.0;
    }
    Ok(TimeStepRequest { dt, stop })
}

#[derive(Clone, Copy)]
enum ValueReduce {
    Sum,
    Max,
}

fn reduce_value<F: WireField>(replies: Vec<Reply<F>>, op: ValueReduce) -> RemoteResult<Real> {
    let mut acc: Option<Real> = None;
    for reply in replies {
        match reply {
            Reply::Value(v) => {
                acc = Some(match (acc, op) {
                    (None, _) => v,
                    (Some(a), ValueReduce::Sum) => a + v,
                    (Some(a), ValueReduce::Max) => a.max(v),
                });
            }
            other => return protocol_err("value", &other),
        }
    }
    acc.ok_or(RemoteError::Protocol {
        expected: "value",
        got: "no replies".into(),
    })
}

/// Each rank allocates from its own table; identical command sequences keep
/// the tables in lock step, so all ranks must report the same handle.
fn reduce_handle<F: WireField>(replies: Vec<Reply<F>>) -> RemoteResult<Handle> {
    let mut handle = None;
    for reply in replies {
        match reply {
            Reply::Handle(h) => match handle {
                None => handle = Some(h),
                Some(prev) if prev == h => {}
                Some(prev) => {
                    return Err(RemoteError::Protocol {
                        expected: "identical handles across ranks",
                        got: format!("{prev} vs {h}"),
                    });
                }
            },
            other => return protocol_err("handle", &other),
        }
    }
    handle.ok_or(RemoteError::Protocol {
        expected: "handle",
        got: "no replies".into(),
    })
}

fn single<F: WireField>(mut replies: Vec<Reply<F>>, expected: &'static str) -> RemoteResult<Reply<F>> {
    if replies.len() != 1 {
        return Err(RemoteError::Protocol {
            expected,
            got: format!("{} replies", replies.len()),
        });
    }
    Ok(replies.remove(0))
}

// ---- solver proxy ----

/// Implements the full Solver contract against a remote peer or group; a
/// coupling engine cannot tell it apart from a local child.
pub struct MasterSolverProxy<F: WireField> {
    process: RemoteProcess<F>,
    /// Last time reported by the peer, served when the transport is down.
    cached_time: Cell<Real>,
}

impl<F: WireField> MasterSolverProxy<F> {
    pub fn new(process: RemoteProcess<F>) -> Self {
        Self {
            process,
            cached_time: Cell::new(0.0),
        }
    }

    fn unit_call(&self, command: Command<F>) -> SolverResult<()> {
        expect_unit(self.process.call(command)?)?;
        Ok(())
    }
}

impl<F: WireField> Solver<F> for MasterSolverProxy<F> {
    fn init(&mut self) -> SolverResult<()> {
        self.unit_call(Command::Init)?;
        self.cached_time.set(0.0);
        Ok(())
    }

    fn terminate(&mut self) -> SolverResult<()> {
        self.unit_call(Command::Terminate)
    }

    fn present_time(&self) -> Real {
        match self.process.call(Command::PresentTime).and_then(reduce_time) {
            Ok(t) => {
                self.cached_time.set(t);
                t
            }
            Err(_) => self.cached_time.get(),
        }
    }

    fn compute_time_step(&mut self) -> SolverResult<TimeStepRequest> {
        Ok(reduce_time_step(self.process.call(Command::ComputeTimeStep)?)?)
    }

    fn init_time_step(&mut self, dt: Real) -> SolverResult<()> {
        self.unit_call(Command::InitTimeStep { dt })
    }

    fn solve(&mut self) -> SolverResult<bool> {
        Ok(reduce_status(self.process.call(Command::Solve)?)?)
    }

    fn iterate(&mut self) -> SolverResult<IterateOutcome> {
        Ok(reduce_outcome(self.process.call(Command::Iterate)?)?)
    }

    fn validate_time_step(&mut self) -> SolverResult<()> {
        self.unit_call(Command::ValidateTimeStep)
    }

    fn abort_time_step(&mut self) -> SolverResult<()> {
        self.unit_call(Command::AbortTimeStep)
    }

    fn set_stationary_mode(&mut self, stationary: bool) -> SolverResult<()> {
        self.unit_call(Command::SetStationaryMode { stationary })
    }

    fn is_stationary(&self) -> bool {
        self.process
            .call(Command::IsStationary)
            .and_then(reduce_status)
            .unwrap_or(false)
    }

    fn save(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.unit_call(Command::Save {
            label: label.into(),
            method,
        })
    }

    fn restore(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.unit_call(Command::Restore {
            label: label.into(),
            method,
        })
    }

    fn forget(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.unit_call(Command::Forget {
            label: label.into(),
            method,
        })
    }

    fn set_checks_enabled(&mut self, enabled: bool) {
        let _ = self.process.call(Command::SetChecksEnabled { enabled });
    }

    fn output_field_names(&self) -> Vec<String> {
        match self
            .process
            .call(Command::OutputFieldNames)
            .map(|mut r| r.pop())
        {
            Ok(Some(Reply::Names(names))) => names,
            _ => Vec::new(),
        }
    }

    fn input_field_names(&self) -> Vec<String> {
        match self
            .process
            .call(Command::InputFieldNames)
            .map(|mut r| r.pop())
        {
            Ok(Some(Reply::Names(names))) => names,
            _ => Vec::new(),
        }
    }

    fn get_output_field(&self, name: &str) -> SolverResult<F> {
        let reply = single(
            self.process.call(Command::GetOutputField { name: name.into() })?,
            "one field",
        )?;
        match reply {
            Reply::Field(f) => Ok(f),
            other => Ok(protocol_err("field", &other)?),
        }
    }

    fn get_input_field_template(&self, name: &str) -> SolverResult<F> {
        let reply = single(
            self.process
                .call(Command::GetInputFieldTemplate { name: name.into() })?,
            "one field",
        )?;
        match reply {
            Reply::Field(f) => Ok(f),
            other => Ok(protocol_err("field", &other)?),
        }
    }

    fn set_input_field(&mut self, name: &str, field: F) -> SolverResult<()> {
        self.unit_call(Command::SetInputField {
            name: name.into(),
            field,
        })
    }

    fn get_output_value(&self, name: &str) -> SolverResult<Real> {
        Ok(reduce_value(
            self.process.call(Command::GetOutputValue { name: name.into() })?,
            ValueReduce::Max,
        )?)
    }

    fn set_input_value(&mut self, name: &str, value: Real) -> SolverResult<()> {
        self.unit_call(Command::SetInputValue {
            name: name.into(),
            value,
        })
    }
}

// ---- data proxy ----

/// Addresses one SharedState entry in the remote table(s) by handle.
///
/// Arithmetic that produces a new state allocates a new remote handle and
/// returns a fresh proxy. Dropping a proxy queues its handle for release;
/// the release is sent, batched, just before the next command.
pub struct MasterDataProxy<F: WireField> {
    process: RemoteProcess<F>,
    handle: Handle,
}

impl<F: WireField> MasterDataProxy<F> {
    /// Upload `state` to every addressed rank and wrap the new handle.
    pub fn create(process: &RemoteProcess<F>, state: SharedState<F>) -> RemoteResult<Self> {
        let handle = reduce_handle(process.call(Command::CreateState { state })?)?;
        Ok(Self {
            process: process.clone(),
            handle,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn wrap(&self, replies: Vec<Reply<F>>) -> RemoteResult<Self> {
        Ok(Self {
            process: self.process.clone(),
            handle: reduce_handle(replies)?,
        })
    }

    /// Deep copy under a new remote handle.
    pub fn clone_remote(&self) -> RemoteResult<Self> {
        let replies = self.process.call(Command::CloneState {
            handle: self.handle,
        })?;
        self.wrap(replies)
    }

    /// Structure-only copy under a new remote handle.
    pub fn clone_empty(&self) -> RemoteResult<Self> {
        let replies = self.process.call(Command::CloneEmpty {
            handle: self.handle,
        })?;
        self.wrap(replies)
    }

    pub fn copy_from(&self, other: &Self) -> RemoteResult<()> {
        expect_unit(self.process.call(Command::CopyState {
            dst: self.handle,
            src: other.handle,
        })?)
    }

    pub fn add_assign(&self, other: &Self) -> RemoteResult<()> {
        expect_unit(self.process.call(Command::AddAssign {
            dst: self.handle,
            src: other.handle,
        })?)
    }

    pub fn sub_assign(&self, other: &Self) -> RemoteResult<()> {
        expect_unit(self.process.call(Command::SubAssign {
            dst: self.handle,
            src: other.handle,
        })?)
    }

    pub fn scale(&self, factor: Real) -> RemoteResult<()> {
        expect_unit(self.process.call(Command::Scale {
            handle: self.handle,
            factor,
        })?)
    }

    pub fn imuladd(&self, factor: Real, other: &Self) -> RemoteResult<()> {
        expect_unit(self.process.call(Command::Imuladd {
            dst: self.handle,
            factor,
            src: other.handle,
        })?)
    }

    pub fn add(&self, other: &Self) -> RemoteResult<Self> {
        let out = self.clone_remote()?;
        out.add_assign(other)?;
        Ok(out)
    }

    pub fn sub(&self, other: &Self) -> RemoteResult<Self> {
        let out = self.clone_remote()?;
        out.sub_assign(other)?;
        Ok(out)
    }

    pub fn mul(&self, factor: Real) -> RemoteResult<Self> {
        let out = self.clone_remote()?;
        out.scale(factor)?;
        Ok(out)
    }

    /// Dot product; each rank contributes its local part, summed here.
    pub fn dot(&self, other: &Self) -> RemoteResult<Real> {
        reduce_value(
            self.process.call(Command::Dot {
                left: self.handle,
                right: other.handle,
            })?,
            ValueReduce::Sum,
        )
    }

    pub fn norm(&self, kind: NormKind) -> RemoteResult<Real> {
        let replies = self.process.call(Command::Norm {
            handle: self.handle,
            kind,
        })?;
        match kind {
            NormKind::Max => reduce_value(replies, ValueReduce::Max),
            // Ranks report local Euclidean norms; combine their squares.
            NormKind::Two => {
                let mut acc = 0.0;
                for reply in replies {
                    match reply {
                        Reply::Value(v) => acc += v * v,
                        other => return protocol_err("value", &other),
                    }
                }
                Ok(Real::sqrt(acc))
            }
        }
    }

    pub fn set_value(&self, name: &str, value: Real) -> RemoteResult<()> {
        expect_unit(self.process.call(Command::StateSetValue {
            handle: self.handle,
            name: name.into(),
            value,
        })?)
    }

    pub fn get_value(&self, name: &str) -> RemoteResult<Real> {
        reduce_value(
            self.process.call(Command::StateGetValue {
                handle: self.handle,
                name: name.into(),
            })?,
            ValueReduce::Max,
        )
    }

    /// Download the state from a single peer.
    pub fn fetch(&self) -> RemoteResult<SharedState<F>> {
        let reply = single(
            self.process.call(Command::FetchState {
                handle: self.handle,
            })?,
            "one state",
        )?;
        match reply {
            Reply::State(s) => Ok(s),
            other => protocol_err("state", &other),
        }
    }

    /// Download every rank's local part, in rank order.
    pub fn fetch_parts(&self) -> RemoteResult<Vec<SharedState<F>>> {
        self.process
            .call(Command::FetchState {
                handle: self.handle,
            })?
            .into_iter()
            .map(|reply| match reply {
                Reply::State(s) => Ok(s),
                other => protocol_err("state", &other),
            })
            .collect()
    }
}

impl<F: WireField> Drop for MasterDataProxy<F> {
    fn drop(&mut self) {
        self.process.queue_release(self.handle);
    }
}

// ---- exchanger proxy ----

/// Triggers a worker-side exchange by index, passing the handles of the
/// remote states involved.
///
/// When the master itself takes part in the exchange it carries its own copy
/// of the exchanger, run against the master's local tables after the
/// broadcast ([`ExchangerProxy::run_with_master`]).
pub struct ExchangerProxy<F: WireField> {
    process: RemoteProcess<F>,
    index: usize,
    local: Option<Exchanger<F>>,
}

impl<F: WireField> ExchangerProxy<F> {
    pub fn new(process: RemoteProcess<F>, index: usize) -> Self {
        Self {
            process,
            index,
            local: None,
        }
    }

    /// Master-participating variant; `local` is the master's copy of the
    /// exchange.
    pub fn with_local(process: RemoteProcess<F>, index: usize, local: Exchanger<F>) -> Self {
        Self {
            process,
            index,
            local: Some(local),
        }
    }

    /// Trigger the exchange on every addressed peer.
    pub fn run(&self, states: &[&MasterDataProxy<F>]) -> RemoteResult<()> {
        let handles = states.iter().map(|s| s.handle()).collect();
        expect_unit(self.process.call(Command::RunExchange {
            index: self.index,
            states: handles,
        })?)
    }

    /// Trigger the exchange on every addressed peer, then run the master's
    /// own copy against its local children and states.
    pub fn run_with_master(
        &self,
        states: &[&MasterDataProxy<F>],
        children: &mut [Box<dyn Solver<F>>],
        local_states: &mut [SharedState<F>],
    ) -> RemoteResult<()> {
        self.run(states)?;
        if let Some(local) = &self.local {
            local
                .execute(children, local_states)
                .map_err(|e| RemoteError::Remote {
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpl_state::DenseField;

    type R = Reply<DenseField>;

    #[test]
    fn status_reduces_by_and() {
        let replies: Vec<R> = vec![Reply::Status(true), Reply::Status(false), Reply::Status(true)];
        assert!(!reduce_status(replies).unwrap());
    }

    #[test]
    fn time_step_reduces_min_dt_and_stop() {
        let replies: Vec<R> = vec![
            Reply::TimeStep(TimeStepRequest {
                dt: 0.5,
                stop: true,
            }),
            Reply::TimeStep(TimeStepRequest {
                dt: 0.2,
                stop: false,
            }),
        ];
        let req = reduce_time_step(replies).unwrap();
        assert_eq!(req.dt, 0.2);
        assert!(!req.stop);
    }

    #[test]
    fn values_reduce_by_sum_or_max() {
        let replies: Vec<R> = vec![Reply::Value(1.5), Reply::Value(-2.0), Reply::Value(0.5)];
        assert_eq!(reduce_value(replies.clone(), ValueReduce::Sum).unwrap(), 0.0);
        assert_eq!(reduce_value(replies, ValueReduce::Max).unwrap(), 1.5);
    }

    #[test]
    fn mismatched_reply_is_a_protocol_error() {
        let replies: Vec<R> = vec![Reply::Unit];
        assert!(matches!(
            reduce_status(replies),
            Err(RemoteError::Protocol { expected: "status", .. })
        ));
    }

    #[test]
    fn diverged_group_handles_are_rejected() {
        let replies: Vec<R> = vec![Reply::Handle(3), Reply::Handle(4)];
        assert!(reduce_handle(replies).is_err());
    }

    #[test]
    fn empty_group_fails_at_construction() {
        let err = RemoteProcess::<DenseField>::group(Vec::new(), 0).unwrap_err();
        assert!(matches!(err, RemoteError::GroupSize { .. }));
    }
}
