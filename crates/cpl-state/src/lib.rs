//! cpl-state: the distributed-vector data model used for coupling.
//!
//! A `SharedState` maps names to scalar values and opaque "field" values and
//! supports the vector-space arithmetic the coupling engines need for
//! convergence control. The engines never look inside a field; anything
//! implementing the `Field` contract can be coupled.

pub mod collab;
pub mod error;
pub mod field;
pub mod state;

pub use collab::CollaborativeState;
pub use error::{StateError, StateResult};
pub use field::{DenseField, Field};
pub use state::SharedState;
