//! Nonlinear optimization driver and step strategies.
//!
//! The [`NonlinearOptimizer`] owns an [`OptimizerState`] and repeats
//! linearize → solve → retract through a pluggable [`StepStrategy`] until the
//! [`convergence`] policy, the iteration cap or a cancellation hook stops it:
//! - [`GaussNewton`]: plain Gauss-Newton steps
//! - [`LevenbergMarquardt`]: damped steps with Nielsen's damping update
//! - [`DogLeg`]: Powell's dog leg inside an adaptive trust region
//!
//! Linear sub-problems are routed to a solver family by the [`LinearSolveDispatcher`].

use std::fmt;

use thiserror::Error;
use tracing::{debug, error};

use crate::core::CoreError;
use crate::core::problem::NonlinearProblem;
use crate::linalg::LinAlgError;

pub mod convergence;
pub mod dispatch;
pub mod dog_leg;
pub mod driver;
pub mod gauss_newton;
pub mod levenberg_marquardt;
pub mod params;
pub mod state;

pub use convergence::{ConvergenceVerdict, check_convergence, check_convergence_with_params};
pub use dispatch::LinearSolveDispatcher;
pub use dog_leg::{DogLeg, DogLegParams};
pub use driver::{NonlinearOptimizer, OptimizationOutcome, TerminationReason};
pub use gauss_newton::GaussNewton;
pub use levenberg_marquardt::{LevenbergMarquardt, LevenbergMarquardtParams};
pub use params::{IterativeParams, LinearSolverType, NonlinearOptimizerParams, Verbosity};
pub use state::OptimizerState;

pub use crate::observers::{OptObserver, OptObserverVec};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerType {
    #[default]
    LevenbergMarquardt,
    GaussNewton,
    DogLeg,
}

impl fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerType::LevenbergMarquardt => write!(f, "Levenberg-Marquardt"),
            OptimizerType::GaussNewton => write!(f, "Gauss-Newton"),
            OptimizerType::DogLeg => write!(f, "Dog Leg"),
        }
    }
}

/// Failures that end a run.
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Solver family and companion parameters do not fit together
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Linear algebra error
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] LinAlgError),

    /// Problem evaluation failed
    #[error("Problem evaluation failed: {0}")]
    Core(#[from] CoreError),
}

impl OptimizerError {
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// What a strategy did during its last iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepDiagnostics {
    /// Norm of the accepted tangent step
    pub step_norm: f64,
    /// Levenberg-Marquardt damping after the iteration
    pub damping: Option<f64>,
    /// Dog leg trust region radius after the iteration
    pub trust_radius: Option<f64>,
    /// Ratio of actual to predicted error reduction of the accepted step
    pub step_quality: Option<f64>,
    /// Linear solves performed, including rejected trials
    pub inner_iterations: usize,
}

/// One optimization step: linearize at the current state, solve, retract, evaluate.
///
/// Implementations return a new state with `iterations + 1`; they never mutate the input.
pub trait StepStrategy<P: NonlinearProblem> {
    fn optimizer_type(&self) -> OptimizerType;

    fn iterate(
        &mut self,
        problem: &P,
        state: &OptimizerState<P::Values>,
        params: &NonlinearOptimizerParams,
        dispatcher: &mut LinearSolveDispatcher,
    ) -> OptimizerResult<OptimizerState<P::Values>>;

    /// Diagnostics of the most recent `iterate` call.
    fn diagnostics(&self) -> StepDiagnostics {
        StepDiagnostics::default()
    }

    fn print_configuration(&self) {}
}

/// Per-iteration row of the debug table printed by the driver.
#[derive(Debug, Clone)]
pub struct IterationStats {
    pub iteration: usize,
    pub error: f64,
    pub error_change: f64,
    pub step_norm: f64,
    pub damping_or_radius: Option<f64>,
    pub inner_iterations: usize,
    pub iter_time_ms: f64,
    pub total_time_ms: f64,
}

impl IterationStats {
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>11}  {:>11}  {:>6}  {:>11}  {:>13}",
            "iter", "error", "error_change", "|step|", "λ/Δ", "inner", "iter_time", "total_time"
        );
    }

    pub fn print_line(&self) {
        let damping = self
            .damping_or_radius
            .map_or_else(|| "-".to_string(), |v| format!("{v:.2e}"));
        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>11.2e}  {:>11}  {:>6}  {:>9.2}ms  {:>11.2}ms",
            self.iteration,
            self.error,
            self.error_change,
            self.step_norm,
            damping,
            self.inner_iterations,
            self.iter_time_ms,
            self.total_time_ms
        );
    }
}
