//! Shared chassis for coupling engines.
//!
//! `CouplerCore` owns the children, shared states and exchangers; an
//! [`Algorithm`] supplies the iteration rule. `Coupler` glues the two into a
//! full [`Solver`], so an engine can itself be the child of another engine.

use cpl_core::Real;
use cpl_solver::{
    CheckpointMethod, IterateOutcome, LifecycleGuard, MemoryCheckpoints, Solver, SolverResult,
    TimeStepRequest,
};
use cpl_state::{CollaborativeState, Field, SharedState};
use tracing::debug;

use crate::error::CouplingResult;
use crate::exchanger::Exchanger;

/// Children, states and exchangers of one coupling engine.
pub struct CouplerCore<F: Field> {
    children: Vec<Box<dyn Solver<F>>>,
    states: Vec<SharedState<F>>,
    exchangers: Vec<Exchanger<F>>,
    /// Exchanger indices run before the child solves (states → children).
    distribute: Vec<usize>,
    /// Exchanger indices run after the child solves (children → states).
    collect: Vec<usize>,
    guard: LifecycleGuard,
    time: Real,
    dt: Real,
    stationary: bool,
    checkpoints: MemoryCheckpoints<(Vec<SharedState<F>>, Real)>,
}

impl<F: Field> CouplerCore<F> {
    pub fn new(
        children: Vec<Box<dyn Solver<F>>>,
        states: Vec<SharedState<F>>,
        exchangers: Vec<Exchanger<F>>,
        distribute: Vec<usize>,
        collect: Vec<usize>,
    ) -> Self {
        Self {
            children,
            states,
            exchangers,
            distribute,
            collect,
            guard: LifecycleGuard::new(),
            time: 0.0,
            dt: 0.0,
            stationary: false,
            checkpoints: MemoryCheckpoints::new(),
        }
    }

    pub fn children(&self) -> &[Box<dyn Solver<F>>] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Box<dyn Solver<F>>] {
        &mut self.children
    }

    pub fn states(&self) -> &[SharedState<F>] {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut [SharedState<F>] {
        &mut self.states
    }

    /// Deep copy of the shared states as one composite vector.
    pub fn snapshot(&self) -> CollaborativeState<F> {
        CollaborativeState::from_parts(self.states.clone())
    }

    /// Write a composite vector back into the shared states.
    pub fn write_states(&mut self, x: &CollaborativeState<F>) -> CouplingResult<()> {
        for (dst, src) in self.states.iter_mut().zip(x.parts()) {
            dst.copy_from(src)?;
        }
        Ok(())
    }

    pub fn run_exchanger(&mut self, index: usize) -> CouplingResult<()> {
        let Self {
            children,
            states,
            exchangers,
            ..
        } = self;
        let len = exchangers.len();
        let ex = exchangers
            .get(index)
            .ok_or(crate::error::CouplingError::PortOob {
                what: "exchanger",
                index,
                len,
            })?;
        ex.execute(children, states)
    }

    /// Evaluate `F(x)`: push `x` to the children, run every child solve, pull
    /// the outputs back. The boolean is the AND of the child solve statuses;
    /// the residual bookkeeping of the caller still runs when it is false.
    pub fn eval_f(
        &mut self,
        x: &CollaborativeState<F>,
    ) -> CouplingResult<(CollaborativeState<F>, bool)> {
        self.write_states(x)?;
        for i in self.distribute.clone() {
            self.run_exchanger(i)?;
        }
        let mut ok = true;
        for child in &mut self.children {
            ok &= child.solve()?;
        }
        for i in self.collect.clone() {
            self.run_exchanger(i)?;
        }
        Ok((self.snapshot(), ok))
    }
}

/// One iteration rule over a [`CouplerCore`].
pub trait Algorithm<F: Field>: Send {
    /// Perform one coupling sub-iteration.
    fn iterate(&mut self, core: &mut CouplerCore<F>) -> CouplingResult<IterateOutcome>;

    /// Iteration budget for a full `solve` of the open step.
    fn max_iter(&self) -> usize;

    /// Called when a time-step window opens; clears per-step memory.
    fn begin_step(&mut self) {}

    /// Structural requirements on the chassis, checked at construction.
    fn validate(&self, _core: &CouplerCore<F>) -> CouplingResult<()> {
        Ok(())
    }
}

/// A coupling engine: a chassis driven by an algorithm, exposed as a Solver.
pub struct Coupler<F: Field, A: Algorithm<F>> {
    core: CouplerCore<F>,
    algo: A,
}

impl<F: Field, A: Algorithm<F>> Coupler<F, A> {
    /// Structural mismatches (e.g. an algorithm needing exactly two
    /// children) fail here, not at first use.
    pub fn new(core: CouplerCore<F>, algo: A) -> CouplingResult<Self> {
        algo.validate(&core)?;
        Ok(Self { core, algo })
    }

    pub fn core(&self) -> &CouplerCore<F> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut CouplerCore<F> {
        &mut self.core
    }

    pub fn algorithm_mut(&mut self) -> &mut A {
        &mut self.algo
    }
}

impl<F: Field, A: Algorithm<F>> Solver<F> for Coupler<F, A> {
    fn init(&mut self) -> SolverResult<()> {
        self.core.guard.init()?;
        for child in &mut self.core.children {
            child.init()?;
        }
        self.core.time = 0.0;
        Ok(())
    }

    fn terminate(&mut self) -> SolverResult<()> {
        self.core.guard.terminate()?;
        for child in &mut self.core.children {
            child.terminate()?;
        }
        self.core.checkpoints.clear();
        Ok(())
    }

    fn present_time(&self) -> Real {
        self.core.time
    }

    fn compute_time_step(&mut self) -> SolverResult<TimeStepRequest> {
        self.core.guard.check_between_steps("compute_time_step")?;
        let mut dt = Real::INFINITY;
        let mut stop = true;
        for child in &mut self.core.children {
            let req = child.compute_time_step()?;
            dt = dt.min(req.dt);
            stop &= req.stop;
        }
        if !dt.is_finite() {
            dt = 0.0;
        }
        Ok(TimeStepRequest { dt, stop })
    }

    fn init_time_step(&mut self, dt: Real) -> SolverResult<()> {
        self.core.guard.open_time_step()?;
        for child in &mut self.core.children {
            child.init_time_step(dt)?;
        }
        self.core.dt = dt;
        self.algo.begin_step();
        Ok(())
    }

    /// Iterate until the algorithm reports convergence. Success iff the last
    /// child solve succeeded and the tolerance was met within the budget.
    fn solve(&mut self) -> SolverResult<bool> {
        self.core.guard.check_inside_step("solve")?;
        for n in 0..self.algo.max_iter() {
            let out = self.algo.iterate(&mut self.core)?;
            debug!(
                iteration = n,
                succeeded = out.succeeded,
                converged = out.converged,
                "coupling iteration"
            );
            if !out.succeeded {
                return Ok(false);
            }
            if out.converged {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn iterate(&mut self) -> SolverResult<IterateOutcome> {
        self.core.guard.check_inside_step("iterate")?;
        Ok(self.algo.iterate(&mut self.core)?)
    }

    fn validate_time_step(&mut self) -> SolverResult<()> {
        self.core.guard.close_time_step("validate_time_step")?;
        for child in &mut self.core.children {
            child.validate_time_step()?;
        }
        self.core.time += self.core.dt;
        Ok(())
    }

    fn abort_time_step(&mut self) -> SolverResult<()> {
        self.core.guard.close_time_step("abort_time_step")?;
        for child in &mut self.core.children {
            child.abort_time_step()?;
        }
        Ok(())
    }

    fn set_stationary_mode(&mut self, stationary: bool) -> SolverResult<()> {
        self.core.guard.check_between_steps("set_stationary_mode")?;
        for child in &mut self.core.children {
            child.set_stationary_mode(stationary)?;
        }
        self.core.stationary = stationary;
        Ok(())
    }

    fn is_stationary(&self) -> bool {
        self.core.stationary
    }

    fn save(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.core.guard.check_between_steps("save")?;
        for child in &mut self.core.children {
            child.save(label, method)?;
        }
        self.core
            .checkpoints
            .save(label, (self.core.states.clone(), self.core.time));
        Ok(())
    }

    fn restore(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.core.guard.check_between_steps("restore")?;
        for child in &mut self.core.children {
            child.restore(label, method)?;
        }
        let (states, time) = self.core.checkpoints.restore(label)?;
        self.core.states = states;
        self.core.time = time;
        Ok(())
    }

    fn forget(&mut self, label: &str, method: CheckpointMethod) -> SolverResult<()> {
        self.core.guard.check_between_steps("forget")?;
        for child in &mut self.core.children {
            child.forget(label, method)?;
        }
        self.core.checkpoints.forget(label)
    }

    fn set_checks_enabled(&mut self, enabled: bool) {
        self.core.guard.set_checks_enabled(enabled);
        for child in &mut self.core.children {
            child.set_checks_enabled(enabled);
        }
    }
}
