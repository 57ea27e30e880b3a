//! Error types for state arithmetic.

use thiserror::Error;

/// Errors from SharedState / CollaborativeState operations.
///
/// Structural mismatches are always fatal to the current call; nothing is
/// silently truncated.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Incompatible states for {op}: scalar/field name sets differ")]
    Incompatible { op: &'static str },

    #[error("Unknown name: {name}")]
    Unknown { name: String },

    #[error("Value not set: {name}")]
    Unset { name: String },

    #[error("Field shape mismatch for {what}: left={left}, right={right}")]
    Shape {
        what: &'static str,
        left: usize,
        right: usize,
    },

    #[error("Composite length mismatch: left={left}, right={right}")]
    CompositeLen { left: usize, right: usize },
}

pub type StateResult<T> = Result<T, StateError>;
