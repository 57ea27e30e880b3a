//! Error types for the remote proxy and dispatch layer.

use cpl_solver::SolverError;
use thiserror::Error;

/// Errors surfaced by transports, proxies and workers.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The peer hung up or was never connected.
    #[error("transport disconnected")]
    Disconnected,

    /// The peer answered with the wrong reply shape for the command sent.
    #[error("protocol mismatch: expected {expected}, got {got}")]
    Protocol { expected: &'static str, got: String },

    /// Process-group arity mismatch, checked at proxy construction so a bad
    /// group fails fast instead of deadlocking at first use.
    #[error("process group size mismatch: expected {expected}, got {got}")]
    GroupSize { expected: usize, got: usize },

    /// A handle that is not (or no longer) present in the worker's table.
    #[error("unknown {what} handle {handle}")]
    UnknownHandle { what: &'static str, handle: u32 },

    /// The remote call itself failed; carries the remote error text.
    #[error("remote call failed: {message}")]
    Remote { message: String },
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl From<RemoteError> for SolverError {
    fn from(e: RemoteError) -> Self {
        SolverError::Backend {
            message: e.to_string(),
        }
    }
}
