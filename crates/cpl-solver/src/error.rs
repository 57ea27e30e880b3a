//! Error types for solver lifecycle and data access.

use cpl_state::StateError;
use thiserror::Error;

/// Errors surfaced by Solver implementations.
#[derive(Error, Debug)]
pub enum SolverError {
    /// Lifecycle violation: a method was called outside its permitted state.
    /// Never retried; the guard that raises it can be disabled per instance.
    #[error("Wrong context for {method}: requires {expected}, state is {actual}")]
    WrongContext {
        method: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Unknown checkpoint label: {label}")]
    UnknownCheckpoint { label: String },

    #[error("Unknown data name: {name}")]
    UnknownName { name: String },

    #[error("Not supported: {what}")]
    NotSupported { what: &'static str },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Backend error: {message}")]
    Backend { message: String },
}

pub type SolverResult<T> = Result<T, SolverError>;

impl From<cpl_core::CoreError> for SolverError {
    fn from(e: cpl_core::CoreError) -> Self {
        SolverError::Backend {
            message: e.to_string(),
        }
    }
}
