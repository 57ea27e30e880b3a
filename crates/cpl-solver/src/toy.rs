//! Toy solvers for exercising coupling engines and remote dispatch.
//!
//! These are the in-tree stand-ins for wrapped simulation codes: small,
//! deterministic components with the full lifecycle surface, used by the
//! coupling and remote test suites.
//!
//! - [`AffineToy`]: scalar `y = a + b·x`. Two of these, cross-wired, make the
//!   canonical fixed-point scenario.
//! - [`MatrixToy`]: normalized matrix application `y = A·x / ‖A·x‖`, one
//!   power-iteration step per solve.
//! - [`ResidualToy`]: geometric contraction toward a known solution, driven
//!   by an accuracy request; exercises residual balancing.

use cpl_core::Real;
use cpl_state::{DenseField, Field};
use nalgebra::DMatrix;

use crate::checkpoint::{CheckpointMethod, MemoryCheckpoints};
use crate::error::{SolverError, SolverResult};
use crate::lifecycle::LifecycleGuard;
use crate::solver::{IterateOutcome, Solver, TimeStepRequest};

/// Scalar affine component: output `y = a + b·x`.
pub struct AffineToy {
    a: Real,
    b: Real,
    x: Real,
    y: Real,
    time: Real,
    dt: Real,
    stationary: bool,
    guard: LifecycleGuard,
    checkpoints: MemoryCheckpoints<(Real, Real, Real)>,
}

impl AffineToy {
    pub fn new(a: Real, b: Real) -> Self {
        Self {
            a,
            b,
            x: 0.0,
            y: 0.0,
            time: 0.0,
            dt: 0.0,
            stationary: false,
            guard: LifecycleGuard::new(),
            checkpoints: MemoryCheckpoints::new(),
        }
    }
}

impl<F: Field> Solver<F> for AffineToy {
    fn init(&mut self) -> SolverResult<()> {
        self.guard.init()?;
        self.x = 0.0;
        self.y = 0.0;
        self.time = 0.0;
        Ok(())
    }

    fn terminate(&mut self) -> SolverResult<()> {
        self.guard.terminate()?;
        self.checkpoints.clear();
        Ok(())
    }

    fn present_time(&self) -> Real {
        self.time
    }

    fn compute_time_step(&mut self) -> SolverResult<TimeStepRequest> {
        self.guard.check_between_steps("compute_time_step")?;
        Ok(TimeStepRequest {
            dt: 1.0,
            stop: false,
        })
    }

    fn init_time_step(&mut self, dt: Real) -> SolverResult<()> {
        self.guard.open_time_step()?;
        self.dt = dt;
        Ok(())
    }

    fn solve(&mut self) -> SolverResult<bool> {
        self.guard.check_inside_step("solve")?;
        self.y = self.a + self.b * self.x;
        Ok(true)
    }

    fn validate_time_step(&mut self) -> SolverResult<()> {
        self.guard.close_time_step("validate_time_step")?;
        self.time += self.dt;
        Ok(())
    }

    fn abort_time_step(&mut self) -> SolverResult<()> {
        self.guard.close_time_step("abort_time_step")?;
        Ok(())
    }

    fn set_stationary_mode(&mut self, stationary: bool) -> SolverResult<()> {
        self.guard.check_between_steps("set_stationary_mode")?;
        self.stationary = stationary;
        Ok(())
    }

    fn is_stationary(&self) -> bool {
        self.stationary
    }

    fn save(&mut self, label: &str, _method: CheckpointMethod) -> SolverResult<()> {
        self.guard.check_between_steps("save")?;
        self.checkpoints.save(label, (self.x, self.y, self.time));
        Ok(())
    }

    fn restore(&mut self, label: &str, _method: CheckpointMethod) -> SolverResult<()> {
        self.guard.check_between_steps("restore")?;
        let (x, y, time) = self.checkpoints.restore(label)?;
        self.x = x;
        self.y = y;
        self.time = time;
        Ok(())
    }

    fn forget(&mut self, label: &str, _method: CheckpointMethod) -> SolverResult<()> {
        self.guard.check_between_steps("forget")?;
        self.checkpoints.forget(label)
    }

    fn set_checks_enabled(&mut self, enabled: bool) {
        self.guard.set_checks_enabled(enabled);
    }

    fn get_output_value(&self, name: &str) -> SolverResult<Real> {
        match name {
            "y" => Ok(self.y),
            _ => Err(SolverError::UnknownName { name: name.into() }),
        }
    }

    fn set_input_value(&mut self, name: &str, value: Real) -> SolverResult<()> {
        match name {
            "x" => {
                self.x = value;
                Ok(())
            }
            _ => Err(SolverError::UnknownName { name: name.into() }),
        }
    }
}

/// Normalized matrix application: `y = A·x / ‖A·x‖₂`.
///
/// Iterating this to its fixed point is power iteration; the fixed point is
/// the dominant eigenvector of `A`, which gives the accelerated couplers a
/// nontrivial vector-valued problem with a known answer.
pub struct MatrixToy {
    a: DMatrix<Real>,
    x: DenseField,
    y: DenseField,
    time: Real,
    dt: Real,
    guard: LifecycleGuard,
}

impl MatrixToy {
    pub fn new(a: DMatrix<Real>) -> Self {
        let n = a.nrows();
        Self {
            a,
            x: DenseField::zeros(n),
            y: DenseField::zeros(n),
            time: 0.0,
            dt: 0.0,
            guard: LifecycleGuard::new(),
        }
    }

    /// Rayleigh quotient of the current output, an eigenvalue estimate.
    pub fn eigenvalue_estimate(&self) -> Real {
        let y = self.y.as_vector();
        let ay = &self.a * y;
        let denom = y.dot(y);
        if denom == 0.0 { 0.0 } else { y.dot(&ay) / denom }
    }
}

impl Solver<DenseField> for MatrixToy {
    fn init(&mut self) -> SolverResult<()> {
        self.guard.init()?;
        let n = self.a.nrows();
        self.x = DenseField::from_vec(vec![1.0; n]);
        self.y = DenseField::zeros(n);
        self.time = 0.0;
        Ok(())
    }

    fn terminate(&mut self) -> SolverResult<()> {
        self.guard.terminate()?;
        Ok(())
    }

    fn present_time(&self) -> Real {
        self.time
    }

    fn compute_time_step(&mut self) -> SolverResult<TimeStepRequest> {
        self.guard.check_between_steps("compute_time_step")?;
        Ok(TimeStepRequest {
            dt: 1.0,
            stop: false,
        })
    }

    fn init_time_step(&mut self, dt: Real) -> SolverResult<()> {
        self.guard.open_time_step()?;
        self.dt = dt;
        Ok(())
    }

    fn solve(&mut self) -> SolverResult<bool> {
        self.guard.check_inside_step("solve")?;
        let ax = &self.a * self.x.as_vector();
        let norm = ax.norm();
        if norm == 0.0 {
            // x in the null space: a numerical failure, not an error.
            return Ok(false);
        }
        self.y = DenseField::from_vec((ax / norm).iter().copied().collect());
        Ok(true)
    }

    fn validate_time_step(&mut self) -> SolverResult<()> {
        self.guard.close_time_step("validate_time_step")?;
        self.time += self.dt;
        Ok(())
    }

    fn abort_time_step(&mut self) -> SolverResult<()> {
        self.guard.close_time_step("abort_time_step")?;
        Ok(())
    }

    fn set_stationary_mode(&mut self, _stationary: bool) -> SolverResult<()> {
        self.guard.check_between_steps("set_stationary_mode")
    }

    fn set_checks_enabled(&mut self, enabled: bool) {
        self.guard.set_checks_enabled(enabled);
    }

    fn output_field_names(&self) -> Vec<String> {
        vec!["y".into()]
    }

    fn input_field_names(&self) -> Vec<String> {
        vec!["x".into()]
    }

    fn get_output_field(&self, name: &str) -> SolverResult<DenseField> {
        match name {
            "y" => Ok(self.y.clone()),
            _ => Err(SolverError::UnknownName { name: name.into() }),
        }
    }

    fn get_input_field_template(&self, name: &str) -> SolverResult<DenseField> {
        match name {
            "x" => Ok(self.x.clone()),
            _ => Err(SolverError::UnknownName { name: name.into() }),
        }
    }

    fn set_input_field(&mut self, name: &str, field: DenseField) -> SolverResult<()> {
        match name {
            "x" => {
                self.x = field;
                Ok(())
            }
            _ => Err(SolverError::UnknownName { name: name.into() }),
        }
    }
}

/// Geometric contraction toward a known solution, driven by an accuracy
/// request. `iterate` performs one relaxation step; `solve` iterates until
/// the residual meets the requested accuracy.
pub struct ResidualToy {
    solution: Real,
    u: Real,
    rate: Real,
    accuracy: Real,
    time: Real,
    dt: Real,
    guard: LifecycleGuard,
}

impl ResidualToy {
    /// `rate` is the per-iteration error contraction factor, in `(0, 1)`.
    pub fn new(solution: Real, start: Real, rate: Real) -> Self {
        Self {
            solution,
            u: start,
            rate,
            accuracy: 1e-12,
            time: 0.0,
            dt: 0.0,
            guard: LifecycleGuard::new(),
        }
    }

    pub fn value(&self) -> Real {
        self.u
    }

    fn residual(&self) -> Real {
        (self.u - self.solution).abs()
    }
}

impl<F: Field> Solver<F> for ResidualToy {
    fn init(&mut self) -> SolverResult<()> {
        self.guard.init()?;
        self.time = 0.0;
        Ok(())
    }

    fn terminate(&mut self) -> SolverResult<()> {
        self.guard.terminate()?;
        Ok(())
    }

    fn present_time(&self) -> Real {
        self.time
    }

    fn compute_time_step(&mut self) -> SolverResult<TimeStepRequest> {
        self.guard.check_between_steps("compute_time_step")?;
        Ok(TimeStepRequest {
            dt: 1.0,
            stop: false,
        })
    }

    fn init_time_step(&mut self, dt: Real) -> SolverResult<()> {
        self.guard.open_time_step()?;
        self.dt = dt;
        Ok(())
    }

    fn solve(&mut self) -> SolverResult<bool> {
        self.guard.check_inside_step("solve")?;
        let mut iters = 0;
        while self.residual() > self.accuracy {
            self.u = self.solution + self.rate * (self.u - self.solution);
            iters += 1;
            if iters > 10_000 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn iterate(&mut self) -> SolverResult<IterateOutcome> {
        self.guard.check_inside_step("iterate")?;
        self.u = self.solution + self.rate * (self.u - self.solution);
        Ok(IterateOutcome {
            succeeded: true,
            converged: self.residual() <= self.accuracy,
        })
    }

    fn validate_time_step(&mut self) -> SolverResult<()> {
        self.guard.close_time_step("validate_time_step")?;
        self.time += self.dt;
        Ok(())
    }

    fn abort_time_step(&mut self) -> SolverResult<()> {
        self.guard.close_time_step("abort_time_step")?;
        Ok(())
    }

    fn set_stationary_mode(&mut self, _stationary: bool) -> SolverResult<()> {
        self.guard.check_between_steps("set_stationary_mode")
    }

    fn set_checks_enabled(&mut self, enabled: bool) {
        self.guard.set_checks_enabled(enabled);
    }

    fn get_output_value(&self, name: &str) -> SolverResult<Real> {
        match name {
            "residual" => Ok(self.residual()),
            "u" => Ok(self.u),
            _ => Err(SolverError::UnknownName { name: name.into() }),
        }
    }

    fn set_input_value(&mut self, name: &str, value: Real) -> SolverResult<()> {
        match name {
            "accuracy" => {
                self.accuracy = value;
                Ok(())
            }
            _ => Err(SolverError::UnknownName { name: name.into() }),
        }
    }
}
