//! cpl-coupling: iterative coupling engines.
//!
//! A coupling engine is itself a [`cpl_solver::Solver`]: it owns child
//! solvers, SharedStates and Exchangers, and drives one iteration algorithm
//! (damped fixed point, Anderson acceleration, Jacobian-free Newton-Krylov,
//! residual balancing) until the composite state stops moving. Because the
//! engine satisfies the same contract as its children, couplers of couplers
//! nest without any inheritance machinery.

pub mod anderson;
pub mod chassis;
pub mod error;
pub mod exchanger;
pub mod fixed_point;
pub mod jfnk;
pub mod qr;
pub mod residual_balance;

pub use anderson::{Anderson, AndersonConfig, AndersonCoupler};
pub use chassis::{Algorithm, Coupler, CouplerCore};
pub use error::{CouplingError, CouplingResult};
pub use exchanger::{Binding, DirectExchange, ExchangeTransform, Exchanger, PortRef};
pub use fixed_point::{FixedPoint, FixedPointConfig, FixedPointCoupler};
pub use jfnk::{Jfnk, JfnkConfig, JfnkCoupler};
pub use residual_balance::{ResidualBalance, ResidualBalanceConfig, ResidualBalanceCoupler};
