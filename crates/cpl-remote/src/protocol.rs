//! Tagged wire protocol between a master and its workers.
//!
//! Every message is one tagged command with its payload; answers come back as
//! one [`Reply`] per addressed peer. Tags enumerate every Solver, SharedState
//! and Exchanger operation; numbering is part of the wire contract and must
//! not be reshuffled.

use cpl_core::{NormKind, Real};
use cpl_solver::{CheckpointMethod, IterateOutcome, TimeStepRequest};
use cpl_state::{Field, SharedState};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// A field type that can cross the wire.
pub trait WireField: Field + Serialize + DeserializeOwned {}

impl<T: Field + Serialize + DeserializeOwned> WireField for T {}

/// Index into a worker's SharedState table.
pub type Handle = u32;

/// One command from the master to a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "F: Serialize",
    deserialize = "F: DeserializeOwned"
))]
pub enum Command<F: Field> {
    // Solver lifecycle.
    Init,
    /// Terminates the remote solver and ends the worker's dispatch loop.
    Terminate,
    PresentTime,
    ComputeTimeStep,
    InitTimeStep { dt: Real },
    Solve,
    Iterate,
    ValidateTimeStep,
    AbortTimeStep,
    SetStationaryMode { stationary: bool },
    IsStationary,
    Save { label: String, method: CheckpointMethod },
    Restore { label: String, method: CheckpointMethod },
    Forget { label: String, method: CheckpointMethod },
    SetChecksEnabled { enabled: bool },

    // Solver data access.
    OutputFieldNames,
    InputFieldNames,
    GetOutputField { name: String },
    GetInputFieldTemplate { name: String },
    SetInputField { name: String, field: F },
    GetOutputValue { name: String },
    SetInputValue { name: String, value: Real },

    // SharedState handle table.
    CreateState { state: SharedState<F> },
    FetchState { handle: Handle },
    CloneState { handle: Handle },
    CloneEmpty { handle: Handle },
    CopyState { dst: Handle, src: Handle },
    AddAssign { dst: Handle, src: Handle },
    SubAssign { dst: Handle, src: Handle },
    Scale { handle: Handle, factor: Real },
    Imuladd { dst: Handle, factor: Real, src: Handle },
    Dot { left: Handle, right: Handle },
    Norm { handle: Handle, kind: NormKind },
    StateSetValue { handle: Handle, name: String, value: Real },
    StateGetValue { handle: Handle, name: String },
    /// Batched release of handles queued by dropped proxies.
    DeleteHandles { handles: Vec<Handle> },

    // Exchangers.
    RunExchange { index: usize, states: Vec<Handle> },
}

impl<F: Field> Command<F> {
    /// Wire tag of this command.
    pub fn tag(&self) -> u8 {
        match self {
            Command::Init => 1,
            Command::Terminate => 2,
            Command::PresentTime => 3,
            Command::ComputeTimeStep => 4,
            Command::InitTimeStep { .. } => 5,
            Command::Solve => 6,
            Command::Iterate => 7,
            Command::ValidateTimeStep => 8,
            Command::AbortTimeStep => 9,
            Command::SetStationaryMode { .. } => 10,
            Command::IsStationary => 11,
            Command::Save { .. } => 12,
            Command::Restore { .. } => 13,
            Command::Forget { .. } => 14,
            Command::SetChecksEnabled { .. } => 15,
            Command::OutputFieldNames => 20,
            Command::InputFieldNames => 21,
            Command::GetOutputField { .. } => 22,
            Command::GetInputFieldTemplate { .. } => 23,
            Command::SetInputField { .. } => 24,
            Command::GetOutputValue { .. } => 25,
            Command::SetInputValue { .. } => 26,
            Command::CreateState { .. } => 40,
            Command::FetchState { .. } => 41,
            Command::CloneState { .. } => 42,
            Command::CloneEmpty { .. } => 43,
            Command::CopyState { .. } => 44,
            Command::AddAssign { .. } => 45,
            Command::SubAssign { .. } => 46,
            Command::Scale { .. } => 47,
            Command::Imuladd { .. } => 48,
            Command::Dot { .. } => 49,
            Command::Norm { .. } => 50,
            Command::StateSetValue { .. } => 51,
            Command::StateGetValue { .. } => 52,
            Command::DeleteHandles { .. } => 53,
            Command::RunExchange { .. } => 60,
        }
    }
}

/// One answer from a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "F: Serialize",
    deserialize = "F: DeserializeOwned"
))]
pub enum Reply<F: Field> {
    Unit,
    Status(bool),
    Time(Real),
    TimeStep(TimeStepRequest),
    Outcome(IterateOutcome),
    Value(Real),
    Names(Vec<String>),
    Field(F),
    State(SharedState<F>),
    Handle(Handle),
    /// The remote call failed; carries the remote error text.
    Failure(String),
}

impl<F: Field> Reply<F> {
    /// Wire tag: plain answers, bulk data, or a reported failure.
    pub fn tag(&self) -> u8 {
        match self {
            Reply::Field(_) | Reply::State(_) => 201,
            Reply::Failure(_) => 202,
            _ => 200,
        }
    }

    /// Short description of the payload, for protocol-mismatch errors.
    pub fn describe(&self) -> &'static str {
        match self {
            Reply::Unit => "unit",
            Reply::Status(_) => "status",
            Reply::Time(_) => "time",
            Reply::TimeStep(_) => "time step",
            Reply::Outcome(_) => "iterate outcome",
            Reply::Value(_) => "value",
            Reply::Names(_) => "names",
            Reply::Field(_) => "field",
            Reply::State(_) => "state",
            Reply::Handle(_) => "handle",
            Reply::Failure(_) => "failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpl_state::DenseField;

    #[test]
    fn tags_are_stable() {
        assert_eq!(Command::<DenseField>::Init.tag(), 1);
        assert_eq!(Command::<DenseField>::Terminate.tag(), 2);
        assert_eq!(Command::<DenseField>::Solve.tag(), 6);
        assert_eq!(
            Command::<DenseField>::DeleteHandles { handles: vec![] }.tag(),
            53
        );
        assert_eq!(Reply::<DenseField>::Unit.tag(), 200);
        assert_eq!(Reply::<DenseField>::Failure(String::new()).tag(), 202);
    }
}
