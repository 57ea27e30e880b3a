//! The solver lifecycle state machine.
//!
//! `Unconstructed → Initialized → (TimeStepOpen ⇄ TimeStepClosed) → Terminated`
//!
//! Every Solver implementation embeds a [`LifecycleGuard`] and routes each
//! method through it. The guard is advisory: it can be disabled per instance
//! for trusted callers, in which case transitions are still tracked but no
//! precondition is enforced.

use crate::error::{SolverError, SolverResult};

/// Lifecycle state of a solver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, `init` not yet called.
    #[default]
    Unconstructed,
    /// `init` done, no time step taken yet.
    Initialized,
    /// Inside a time-step window (`init_time_step` called).
    TimeStepOpen,
    /// Between time steps (`validate_time_step` / `abort_time_step` done).
    TimeStepClosed,
    /// `terminate` called; `init` may re-construct.
    Terminated,
}

impl LifecycleState {
    fn name(self) -> &'static str {
        match self {
            LifecycleState::Unconstructed => "Unconstructed",
            LifecycleState::Initialized => "Initialized",
            LifecycleState::TimeStepOpen => "TimeStepOpen",
            LifecycleState::TimeStepClosed => "TimeStepClosed",
            LifecycleState::Terminated => "Terminated",
        }
    }

    /// Between time steps (auxiliary calls are allowed here).
    fn is_between_steps(self) -> bool {
        matches!(
            self,
            LifecycleState::Initialized | LifecycleState::TimeStepClosed
        )
    }
}

/// Per-instance lifecycle tracker and precondition checker.
#[derive(Clone, Debug, Default)]
pub struct LifecycleGuard {
    state: LifecycleState,
    checks_enabled: bool,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Unconstructed,
            checks_enabled: true,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Disable or re-enable precondition checks for this instance.
    pub fn set_checks_enabled(&mut self, enabled: bool) {
        self.checks_enabled = enabled;
    }

    fn violation(&self, method: &'static str, expected: &'static str) -> SolverError {
        SolverError::WrongContext {
            method,
            expected,
            actual: self.state.name(),
        }
    }

    fn ensure(&self, ok: bool, method: &'static str, expected: &'static str) -> SolverResult<()> {
        if !ok && self.checks_enabled {
            return Err(self.violation(method, expected));
        }
        Ok(())
    }

    /// `init`: only from Unconstructed or Terminated. A second `init` without
    /// an intervening `terminate` is an error, never a silent reset.
    pub fn init(&mut self) -> SolverResult<()> {
        self.ensure(
            matches!(
                self.state,
                LifecycleState::Unconstructed | LifecycleState::Terminated
            ),
            "init",
            "Unconstructed or Terminated",
        )?;
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// `init_time_step`: only between steps.
    pub fn open_time_step(&mut self) -> SolverResult<()> {
        self.ensure(
            self.state.is_between_steps(),
            "init_time_step",
            "Initialized or TimeStepClosed",
        )?;
        self.state = LifecycleState::TimeStepOpen;
        Ok(())
    }

    /// `solve` / `iterate`: only inside the time-step window.
    pub fn check_inside_step(&self, method: &'static str) -> SolverResult<()> {
        self.ensure(
            self.state == LifecycleState::TimeStepOpen,
            method,
            "TimeStepOpen",
        )
    }

    /// `validate_time_step` / `abort_time_step`: close the window.
    pub fn close_time_step(&mut self, method: &'static str) -> SolverResult<()> {
        self.ensure(
            self.state == LifecycleState::TimeStepOpen,
            method,
            "TimeStepOpen",
        )?;
        self.state = LifecycleState::TimeStepClosed;
        Ok(())
    }

    /// Auxiliary calls (`compute_time_step`, checkpoints, stationary mode):
    /// only outside the time-step window, after `init`.
    pub fn check_between_steps(&self, method: &'static str) -> SolverResult<()> {
        self.ensure(
            self.state.is_between_steps(),
            method,
            "Initialized or TimeStepClosed",
        )
    }

    /// `terminate`: from any state where the component is initialized.
    pub fn terminate(&mut self) -> SolverResult<()> {
        self.ensure(
            !matches!(
                self.state,
                LifecycleState::Unconstructed | LifecycleState::Terminated
            ),
            "terminate",
            "any initialized state",
        )?;
        self.state = LifecycleState::Terminated;
        Ok(())
    }
}
