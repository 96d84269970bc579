//! Gauss-Newton step strategy.
//!
//! Each iteration solves the undamped linear least-squares problem
//!
//! ```text
//! δ = argmin ½‖J·δ + r‖²      (equivalently JᵀJ·δ = -Jᵀr)
//! ```
//!
//! and retracts the full step onto the estimate. There is no step control: near the solution
//! convergence is quadratic, far from it the error may increase, which the driver's
//! convergence policy treats as termination.
//!
//! For poor initial estimates prefer
//! [`LevenbergMarquardt`](crate::optimizer::LevenbergMarquardt) or
//! [`DogLeg`](crate::optimizer::DogLeg).

use tracing::debug;

use crate::core::problem::NonlinearProblem;
use crate::optimizer::{
    LinearSolveDispatcher, NonlinearOptimizerParams, OptimizerResult, OptimizerState,
    OptimizerType, StepDiagnostics, StepStrategy,
};

#[derive(Debug, Clone, Default)]
pub struct GaussNewton {
    last: StepDiagnostics,
}

impl GaussNewton {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: NonlinearProblem> StepStrategy<P> for GaussNewton {
    fn optimizer_type(&self) -> OptimizerType {
        OptimizerType::GaussNewton
    }

    fn iterate(
        &mut self,
        problem: &P,
        state: &OptimizerState<P::Values>,
        params: &NonlinearOptimizerParams,
        dispatcher: &mut LinearSolveDispatcher,
    ) -> OptimizerResult<OptimizerState<P::Values>> {
        let system = problem.linearize(state.values())?;
        let step = dispatcher.solve(&system, params)?;
        let values = problem.retract(state.values(), &step)?;

        self.last = StepDiagnostics {
            step_norm: step.norm(),
            inner_iterations: 1,
            ..StepDiagnostics::default()
        };
        Ok(state.advance(problem, values)?)
    }

    fn diagnostics(&self) -> StepDiagnostics {
        self.last.clone()
    }

    fn print_configuration(&self) {
        debug!("Step strategy: Gauss-Newton (full steps, no damping)");
    }
}
