//! The Solver trait: the contract every coupled component satisfies.

use cpl_core::Real;
use cpl_state::Field;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointMethod;
use crate::error::{SolverError, SolverResult};

/// Result of one coupling sub-iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterateOutcome {
    /// The computation itself succeeded (no numerical breakdown).
    pub succeeded: bool,
    /// The component considers itself converged for this time step.
    pub converged: bool,
}

/// Answer to `compute_time_step`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeStepRequest {
    /// Preferred next time-step length. `0.0` signals a steady-state solve.
    pub dt: Real,
    /// The component wants the transient to stop.
    pub stop: bool,
}

/// One coupled component.
///
/// Lifecycle: created uninitialized → `init` → repeated
/// `{init_time_step → solve/iterate → validate_time_step | abort_time_step}`
/// → `terminate`. Methods are only callable in the lifecycle state that
/// permits them; violations surface as [`SolverError::WrongContext`].
///
/// The data-access surface (named fields and values) is how exchangers and
/// remote dispatch move data in and out; components without fields keep the
/// default `NotSupported` implementations, like the optional methods of
/// component traits elsewhere in this workspace.
pub trait Solver<F: Field>: Send {
    fn init(&mut self) -> SolverResult<()>;

    fn terminate(&mut self) -> SolverResult<()>;

    /// Present simulation time (advanced by `validate_time_step`).
    fn present_time(&self) -> Real;

    /// Preferred next time step and stop request. Outside the step window.
    fn compute_time_step(&mut self) -> SolverResult<TimeStepRequest>;

    /// Open a time-step window. `dt == 0.0` requests a steady-state solve.
    fn init_time_step(&mut self, dt: Real) -> SolverResult<()>;

    /// Full nonlinear solve of the open step. `Ok(false)` is a numerical
    /// failure (recoverable via `abort_time_step`), not an error.
    fn solve(&mut self) -> SolverResult<bool>;

    /// One coupling sub-iteration of the open step.
    ///
    /// Default: a full `solve`, reported as converged iff it succeeded.
    fn iterate(&mut self) -> SolverResult<IterateOutcome> {
        let succeeded = self.solve()?;
        Ok(IterateOutcome {
            succeeded,
            converged: succeeded,
        })
    }

    /// Commit the open step and advance present time by `dt`.
    fn validate_time_step(&mut self) -> SolverResult<()>;

    /// Discard the open step, keep present time, prepare a retry.
    fn abort_time_step(&mut self) -> SolverResult<()>;

    fn set_stationary_mode(&mut self, stationary: bool) -> SolverResult<()>;

    fn is_stationary(&self) -> bool {
        false
    }

    /// Checkpoint current state under `label`.
    fn save(&mut self, _label: &str, _method: CheckpointMethod) -> SolverResult<()> {
        Err(SolverError::NotSupported {
            what: "save not implemented for this solver",
        })
    }

    /// Roll back to the checkpoint saved under `label`.
    fn restore(&mut self, _label: &str, _method: CheckpointMethod) -> SolverResult<()> {
        Err(SolverError::NotSupported {
            what: "restore not implemented for this solver",
        })
    }

    /// Drop the checkpoint saved under `label`.
    fn forget(&mut self, _label: &str, _method: CheckpointMethod) -> SolverResult<()> {
        Err(SolverError::NotSupported {
            what: "forget not implemented for this solver",
        })
    }

    /// Disable/re-enable the advisory lifecycle checks for this instance.
    fn set_checks_enabled(&mut self, _enabled: bool) {}

    // ---- data access ----

    fn output_field_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn input_field_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn get_output_field(&self, name: &str) -> SolverResult<F> {
        Err(SolverError::UnknownName { name: name.into() })
    }

    /// Current shape of an input field, for transforms that interpolate onto
    /// the destination discretization.
    fn get_input_field_template(&self, name: &str) -> SolverResult<F> {
        Err(SolverError::UnknownName { name: name.into() })
    }

    fn set_input_field(&mut self, name: &str, _field: F) -> SolverResult<()> {
        Err(SolverError::UnknownName { name: name.into() })
    }

    fn get_output_value(&self, name: &str) -> SolverResult<Real> {
        Err(SolverError::UnknownName { name: name.into() })
    }

    fn set_input_value(&mut self, name: &str, _value: Real) -> SolverResult<()> {
        Err(SolverError::UnknownName { name: name.into() })
    }
}
