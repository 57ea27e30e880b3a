//! cpl-core: the numeric foundation of the coupler workspace.
//!
//! - numeric: the scalar type, convergence-norm selection, tolerance-based
//!   comparison and finiteness checks
//! - ids: caller-assigned instance identity for wrappers and proxies
//! - error: the shared error type of the numeric helpers

pub mod error;
pub mod ids;
pub mod numeric;

pub use error::{CoreError, CoreResult};
pub use ids::InstanceId;
pub use numeric::{ensure_finite, nearly_equal, NormKind, Real, Tolerances};
