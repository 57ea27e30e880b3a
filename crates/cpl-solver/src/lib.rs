//! cpl-solver: the lifecycle contract every coupled component satisfies.
//!
//! A `Solver` is one coupled component: it carries a present time, a pending
//! time-step length and a lifecycle state, and exposes named input/output
//! fields and values so exchangers (and remote dispatch) can address it
//! uniformly. Coupling engines implement this same trait and hold child
//! solvers, so couplers-of-couplers nest without inheritance chains.

pub mod checkpoint;
pub mod error;
pub mod lifecycle;
pub mod recorder;
pub mod solver;
pub mod toy;

pub use checkpoint::{CheckpointMethod, MemoryCheckpoints};
pub use error::{SolverError, SolverResult};
pub use lifecycle::{LifecycleGuard, LifecycleState};
pub use recorder::RecordingSolver;
pub use solver::{IterateOutcome, Solver, TimeStepRequest};
pub use toy::{AffineToy, MatrixToy, ResidualToy};
