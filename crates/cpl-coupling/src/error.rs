//! Error types for coupling engines and exchangers.

use cpl_solver::SolverError;
use cpl_state::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CouplingError {
    /// An exchange transform returned the wrong number of outputs.
    /// Always fatal to the current call, never silently truncated.
    #[error("Arity mismatch in {what}: expected {expected}, got {got}")]
    Arity {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Port out of range: {what} (index={index}, len={len})")]
    PortOob {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Invalid configuration: {what}")]
    InvalidConfig { what: &'static str },

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type CouplingResult<T> = Result<T, CouplingError>;

impl From<CouplingError> for SolverError {
    fn from(e: CouplingError) -> Self {
        match e {
            CouplingError::Solver(inner) => inner,
            CouplingError::State(inner) => SolverError::State(inner),
            other => SolverError::Backend {
                message: other.to_string(),
            },
        }
    }
}
