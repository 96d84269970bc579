//! Iteration control loop shared by every step strategy.
//!
//! ```text
//! error ≤ error_tol            → stop, no iteration
//! iterations ≥ max_iterations  → stop, no iteration
//! loop:
//!     state ← strategy.iterate(state)
//!     stop if converged, max_iterations reached or cancelled
//! ```
//!
//! # Example
//!
//! ```
//! use graphopt::core::factor_graph::FactorGraph;
//! use graphopt::core::values::Values;
//! use graphopt::factors::PriorFactor;
//! use graphopt::optimizer::{NonlinearOptimizer, NonlinearOptimizerParams};
//! use nalgebra::DVector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = FactorGraph::new();
//! graph.add_factor(&[0], Box::new(PriorFactor::new(DVector::from_vec(vec![1.0, 2.0]))), None)?;
//!
//! let mut initial = Values::new();
//! initial.insert(0, DVector::from_vec(vec![0.0, 0.0]));
//!
//! let mut optimizer =
//!     NonlinearOptimizer::levenberg_marquardt(&graph, initial, NonlinearOptimizerParams::new())?;
//! let result = optimizer.optimize()?;
//! assert!((result.vector(0)?[1] - 2.0).abs() < 1e-6);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use tracing::{debug, info};
use web_time::Instant;

use crate::core::problem::NonlinearProblem;
use crate::observers::{OptObserver, OptObserverVec};
use crate::optimizer::convergence::check_convergence_with_params;
use crate::optimizer::params::{NonlinearOptimizerParams, Verbosity};
use crate::optimizer::{
    DogLeg, GaussNewton, IterationStats, LevenbergMarquardt, LinearSolveDispatcher,
    OptimizerError, OptimizerResult, OptimizerState, StepStrategy,
};

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Initial error already within `error_tol`; no iteration ran
    AlreadyConverged,
    MaxIterationsReached,
    Converged,
    /// The last iteration increased the error; its estimate is kept
    Diverged,
    /// The cancellation hook asked to stop
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::AlreadyConverged => write!(f, "initial error within tolerance"),
            TerminationReason::MaxIterationsReached => write!(f, "maximum iterations reached"),
            TerminationReason::Converged => write!(f, "converged"),
            TerminationReason::Diverged => write!(f, "error increased"),
            TerminationReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of [`NonlinearOptimizer::optimize_safely`].
#[derive(Debug, Clone)]
pub enum OptimizationOutcome<V> {
    Completed {
        state: OptimizerState<V>,
        termination: TerminationReason,
    },
    Failed {
        reason: OptimizerError,
        /// Iterations completed before the failure
        iterations: usize,
    },
}

impl<V> OptimizationOutcome<V> {
    pub fn is_success(&self) -> bool {
        matches!(self, OptimizationOutcome::Completed { .. })
    }

    pub fn values(&self) -> Option<&V> {
        match self {
            OptimizationOutcome::Completed { state, .. } => Some(state.values()),
            OptimizationOutcome::Failed { .. } => None,
        }
    }

    pub fn into_result(self) -> OptimizerResult<V> {
        match self {
            OptimizationOutcome::Completed { state, .. } => Ok(state.into_values()),
            OptimizationOutcome::Failed { reason, .. } => Err(reason),
        }
    }
}

impl<V: Default> OptimizationOutcome<V> {
    /// Final values, or empty values when the run failed.
    pub fn values_or_empty(self) -> V {
        match self {
            OptimizationOutcome::Completed { state, .. } => state.into_values(),
            OptimizationOutcome::Failed { .. } => V::default(),
        }
    }
}

type CancellationHook<'a, V> = Box<dyn Fn(&OptimizerState<V>) -> bool + 'a>;

/// Drives a [`StepStrategy`] over a borrowed problem until a stopping rule fires.
pub struct NonlinearOptimizer<'a, P: NonlinearProblem, S: StepStrategy<P>> {
    problem: &'a P,
    params: NonlinearOptimizerParams,
    strategy: S,
    state: OptimizerState<P::Values>,
    dispatcher: LinearSolveDispatcher,
    observers: OptObserverVec<P::Values>,
    cancellation: Option<CancellationHook<'a, P::Values>>,
    termination: Option<TerminationReason>,
}

impl<'a, P: NonlinearProblem> NonlinearOptimizer<'a, P, GaussNewton> {
    pub fn gauss_newton(
        problem: &'a P,
        initial: P::Values,
        params: NonlinearOptimizerParams,
    ) -> OptimizerResult<Self> {
        Self::new(problem, initial, params, GaussNewton::new())
    }
}

impl<'a, P: NonlinearProblem> NonlinearOptimizer<'a, P, LevenbergMarquardt> {
    pub fn levenberg_marquardt(
        problem: &'a P,
        initial: P::Values,
        params: NonlinearOptimizerParams,
    ) -> OptimizerResult<Self> {
        Self::new(problem, initial, params, LevenbergMarquardt::new())
    }
}

impl<'a, P: NonlinearProblem> NonlinearOptimizer<'a, P, DogLeg> {
    pub fn dog_leg(
        problem: &'a P,
        initial: P::Values,
        params: NonlinearOptimizerParams,
    ) -> OptimizerResult<Self> {
        Self::new(problem, initial, params, DogLeg::new())
    }
}

impl<'a, P: NonlinearProblem, S: StepStrategy<P>> NonlinearOptimizer<'a, P, S> {
    /// Evaluates the initial error; fails if the problem cannot evaluate `initial`.
    pub fn new(
        problem: &'a P,
        initial: P::Values,
        params: NonlinearOptimizerParams,
        strategy: S,
    ) -> OptimizerResult<Self> {
        let state = OptimizerState::new(problem, initial)?;
        Ok(Self {
            problem,
            params,
            strategy,
            state,
            dispatcher: LinearSolveDispatcher::new(),
            observers: OptObserverVec::new(),
            cancellation: None,
            termination: None,
        })
    }

    /// Stop after any iteration for which `hook` returns true.
    pub fn with_cancellation(
        mut self,
        hook: impl Fn(&OptimizerState<P::Values>) -> bool + 'a,
    ) -> Self {
        self.cancellation = Some(Box::new(hook));
        self
    }

    pub fn add_observer(&mut self, observer: impl OptObserver<P::Values> + 'static) {
        self.observers.add(observer);
    }

    /// Iterate until a stopping rule fires. The final state stays queryable through the
    /// accessors, also after an error.
    pub fn run(&mut self) -> OptimizerResult<()> {
        self.termination = None;
        let termination = self.run_loop()?;
        self.termination = Some(termination);
        Ok(())
    }

    /// [`run`](Self::run), then borrow the final values.
    pub fn optimize(&mut self) -> OptimizerResult<&P::Values> {
        self.run()?;
        Ok(self.state.values())
    }

    /// Run to completion, turning any failure into [`OptimizationOutcome::Failed`].
    pub fn optimize_safely(&mut self) -> OptimizationOutcome<P::Values> {
        match self.run() {
            Ok(()) => OptimizationOutcome::Completed {
                state: self.state.clone(),
                termination: self.termination.unwrap_or(TerminationReason::Converged),
            },
            Err(reason) => OptimizationOutcome::Failed {
                reason,
                iterations: self.state.iterations(),
            },
        }
    }

    /// Run a single strategy step and replace the state, bypassing the stopping rules.
    pub fn iterate(&mut self) -> OptimizerResult<&OptimizerState<P::Values>> {
        self.state = self.strategy.iterate(
            self.problem,
            &self.state,
            &self.params,
            &mut self.dispatcher,
        )?;
        Ok(&self.state)
    }

    fn run_loop(&mut self) -> OptimizerResult<TerminationReason> {
        let verbosity = self.params.verbosity;
        let start = Instant::now();

        if verbosity >= Verbosity::Termination {
            debug!("Solver: {}", self.strategy.optimizer_type());
            self.params.print_configuration();
            self.strategy.print_configuration();
        }
        if verbosity >= Verbosity::Values {
            debug!("initial values: {:?}", self.state.values());
        }
        if verbosity >= Verbosity::Error {
            debug!("initial error: {:.6e}", self.state.error());
        }

        if self.state.error() <= self.params.error_tol {
            return Ok(self.finish(TerminationReason::AlreadyConverged, start));
        }
        if self.state.iterations() >= self.params.max_iterations {
            return Ok(self.finish(TerminationReason::MaxIterationsReached, start));
        }

        if verbosity >= Verbosity::Error {
            IterationStats::print_header();
        }

        loop {
            let iter_start = Instant::now();
            let current_error = self.state.error();
            self.iterate()?;
            let new_error = self.state.error();
            let diagnostics = self.strategy.diagnostics();

            if verbosity >= Verbosity::Error {
                IterationStats {
                    iteration: self.state.iterations(),
                    error: new_error,
                    error_change: current_error - new_error,
                    step_norm: diagnostics.step_norm,
                    damping_or_radius: diagnostics.damping.or(diagnostics.trust_radius),
                    inner_iterations: diagnostics.inner_iterations,
                    iter_time_ms: iter_start.elapsed().as_secs_f64() * 1000.0,
                    total_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                }
                .print_line();
            }
            if verbosity >= Verbosity::Values {
                debug!("values: {:?}", self.state.values());
            }
            if !self.observers.is_empty() {
                self.observers.set_iteration_metrics(new_error, &diagnostics);
                self.observers
                    .notify(self.state.values(), self.state.iterations());
            }

            if check_convergence_with_params(&self.params, current_error, new_error) {
                let reason = if new_error > current_error && new_error > self.params.error_tol {
                    TerminationReason::Diverged
                } else {
                    TerminationReason::Converged
                };
                return Ok(self.finish(reason, start));
            }
            if self.state.iterations() >= self.params.max_iterations {
                return Ok(self.finish(TerminationReason::MaxIterationsReached, start));
            }
            if let Some(hook) = &self.cancellation
                && hook(&self.state)
            {
                return Ok(self.finish(TerminationReason::Cancelled, start));
            }
        }
    }

    fn finish(&self, reason: TerminationReason, start: Instant) -> TerminationReason {
        if self.params.verbosity >= Verbosity::Termination {
            info!(
                "{} stopped after {} iterations ({}): error {:.6e}, {:.2}ms",
                self.strategy.optimizer_type(),
                self.state.iterations(),
                reason,
                self.state.error(),
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
        reason
    }

    pub fn error(&self) -> f64 {
        self.state.error()
    }

    pub fn iterations(&self) -> usize {
        self.state.iterations()
    }

    pub fn values(&self) -> &P::Values {
        self.state.values()
    }

    pub fn state(&self) -> &OptimizerState<P::Values> {
        &self.state
    }

    pub fn params(&self) -> &NonlinearOptimizerParams {
        &self.params
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Why the last successful [`run`](Self::run) stopped; `None` before a run or after a
    /// failed one.
    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    pub fn into_values(self) -> P::Values {
        self.state.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CoreError, CoreResult, Key};
    use crate::linalg::{LinearSystem, VectorValues};
    use crate::optimizer::OptimizerType;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// The estimate is the error itself.
    struct ScalarError;

    impl NonlinearProblem for ScalarError {
        type Values = f64;

        fn error(&self, values: &f64) -> CoreResult<f64> {
            if values.is_nan() {
                return Err(CoreError::InvalidInput("NaN estimate".to_string()));
            }
            Ok(*values)
        }

        fn linearize(&self, _values: &f64) -> CoreResult<LinearSystem> {
            Ok(LinearSystem::new())
        }

        fn retract(&self, values: &f64, _step: &VectorValues) -> CoreResult<f64> {
            Ok(*values)
        }

        fn keys(&self) -> Vec<Key> {
            vec![0]
        }
    }

    /// Multiplies the error by the next factor of a schedule, repeating the last one.
    struct Scripted {
        factors: Vec<f64>,
        calls: usize,
    }

    impl Scripted {
        fn constant(factor: f64) -> Self {
            Self::schedule(vec![factor])
        }

        fn schedule(factors: Vec<f64>) -> Self {
            Self { factors, calls: 0 }
        }
    }

    impl StepStrategy<ScalarError> for Scripted {
        fn optimizer_type(&self) -> OptimizerType {
            OptimizerType::GaussNewton
        }

        fn iterate(
            &mut self,
            problem: &ScalarError,
            state: &OptimizerState<f64>,
            _params: &NonlinearOptimizerParams,
            _dispatcher: &mut LinearSolveDispatcher,
        ) -> OptimizerResult<OptimizerState<f64>> {
            let factor = self
                .factors
                .get(self.calls)
                .or(self.factors.last())
                .copied()
                .unwrap_or(1.0);
            self.calls += 1;
            Ok(state.advance(problem, state.values() * factor)?)
        }
    }

    struct Failing;

    impl StepStrategy<ScalarError> for Failing {
        fn optimizer_type(&self) -> OptimizerType {
            OptimizerType::LevenbergMarquardt
        }

        fn iterate(
            &mut self,
            problem: &ScalarError,
            state: &OptimizerState<f64>,
            _params: &NonlinearOptimizerParams,
            _dispatcher: &mut LinearSolveDispatcher,
        ) -> OptimizerResult<OptimizerState<f64>> {
            Ok(state.advance(problem, f64::NAN)?)
        }
    }

    fn optimizer(
        initial: f64,
        params: NonlinearOptimizerParams,
        strategy: Scripted,
    ) -> OptimizerResult<NonlinearOptimizer<'static, ScalarError, Scripted>> {
        NonlinearOptimizer::new(&ScalarError, initial, params, strategy)
    }

    #[test]
    fn test_max_iterations_zero_runs_nothing() -> TestResult {
        let params = NonlinearOptimizerParams::new()
            .with_max_iterations(0)
            .with_error_tol(1.0);
        let mut opt = optimizer(50.0, params, Scripted::constant(0.5))?;
        opt.run()?;
        assert_eq!(opt.iterations(), 0);
        assert_eq!(opt.error(), 50.0);
        assert_eq!(opt.strategy().calls, 0);
        assert_eq!(opt.termination(), Some(TerminationReason::MaxIterationsReached));
        Ok(())
    }

    #[test]
    fn test_initial_error_within_tolerance_runs_nothing() -> TestResult {
        let params = NonlinearOptimizerParams::new().with_error_tol(1.0);
        let mut opt = optimizer(0.5, params, Scripted::constant(0.5))?;
        assert_eq!(*opt.optimize()?, 0.5);
        assert_eq!(opt.iterations(), 0);
        assert_eq!(opt.error(), 0.5);
        assert_eq!(opt.termination(), Some(TerminationReason::AlreadyConverged));
        Ok(())
    }

    #[test]
    fn test_steady_one_percent_decrease_runs_to_max_iterations() -> TestResult {
        let params = NonlinearOptimizerParams::new()
            .with_max_iterations(10)
            .with_relative_error_tol(0.005);
        let mut opt = optimizer(100.0, params, Scripted::constant(0.99))?;
        opt.run()?;
        assert_eq!(opt.iterations(), 10);
        assert_eq!(opt.strategy().calls, 10);
        assert!((opt.error() - 100.0 * 0.99_f64.powi(10)).abs() < 1e-9);
        assert_eq!(opt.termination(), Some(TerminationReason::MaxIterationsReached));
        Ok(())
    }

    #[test]
    fn test_stops_once_relative_decrease_is_small() -> TestResult {
        let params = NonlinearOptimizerParams::new()
            .with_max_iterations(10)
            .with_relative_error_tol(0.005);
        let schedule = vec![0.98, 0.985, 0.99, 0.996, 0.98];
        let mut opt = optimizer(100.0, params, Scripted::schedule(schedule))?;
        opt.run()?;
        assert_eq!(opt.iterations(), 4);
        assert_eq!(opt.termination(), Some(TerminationReason::Converged));
        Ok(())
    }

    #[test]
    fn test_divergence_keeps_degraded_state() -> TestResult {
        let mut opt = optimizer(10.0, NonlinearOptimizerParams::new(), Scripted::constant(1.1))?;
        opt.run()?;
        assert_eq!(opt.iterations(), 1);
        assert!((opt.error() - 11.0).abs() < 1e-12);
        assert_eq!(opt.termination(), Some(TerminationReason::Diverged));
        Ok(())
    }

    #[test]
    fn test_reaching_error_tol_during_run() -> TestResult {
        let params = NonlinearOptimizerParams::new().with_error_tol(1.0);
        let mut opt = optimizer(100.0, params, Scripted::constant(0.5))?;
        opt.run()?;
        // 100 → 50 → … → 0.78125
        assert_eq!(opt.iterations(), 7);
        assert_eq!(opt.termination(), Some(TerminationReason::Converged));
        Ok(())
    }

    #[test]
    fn test_cancellation_is_checked_after_each_iteration() -> TestResult {
        let checks = Cell::new(0);
        let mut opt = NonlinearOptimizer::new(
            &ScalarError,
            100.0,
            NonlinearOptimizerParams::new(),
            Scripted::constant(0.5),
        )?
        .with_cancellation(|state| {
            checks.set(checks.get() + 1);
            state.iterations() >= 3
        });
        opt.run()?;
        assert_eq!(opt.iterations(), 3);
        assert_eq!(opt.termination(), Some(TerminationReason::Cancelled));
        drop(opt);
        assert_eq!(checks.get(), 3);
        Ok(())
    }

    #[test]
    fn test_observers_see_every_iteration() -> TestResult {
        #[derive(Clone, Default)]
        struct Recorder(Arc<Mutex<Vec<(usize, f64)>>>);

        impl OptObserver<f64> for Recorder {
            fn on_step(&self, values: &f64, iteration: usize) {
                if let Ok(mut seen) = self.0.lock() {
                    seen.push((iteration, *values));
                }
            }
        }

        let recorder = Recorder::default();
        let params = NonlinearOptimizerParams::new().with_max_iterations(3);
        let mut opt = optimizer(8.0, params, Scripted::constant(0.5))?;
        opt.add_observer(recorder.clone());
        opt.run()?;

        let seen = recorder.0.lock().map_err(|e| e.to_string())?;
        assert_eq!(*seen, vec![(1, 4.0), (2, 2.0), (3, 1.0)]);
        Ok(())
    }

    #[test]
    fn test_failure_is_surfaced() -> TestResult {
        let mut opt =
            NonlinearOptimizer::new(&ScalarError, 3.0, NonlinearOptimizerParams::new(), Failing)?;
        assert!(matches!(opt.run(), Err(OptimizerError::Core(_))));
        assert_eq!(opt.termination(), None);
        // the last good state survives
        assert_eq!(opt.error(), 3.0);
        assert_eq!(opt.iterations(), 0);
        Ok(())
    }

    #[test]
    fn test_optimize_safely_outcomes() -> TestResult {
        let mut opt =
            NonlinearOptimizer::new(&ScalarError, 3.0, NonlinearOptimizerParams::new(), Failing)?;
        let outcome = opt.optimize_safely();
        assert!(!outcome.is_success());
        assert!(outcome.values().is_none());
        assert!(matches!(outcome, OptimizationOutcome::Failed { iterations: 0, .. }));
        assert_eq!(outcome.values_or_empty(), 0.0);

        let params = NonlinearOptimizerParams::new().with_error_tol(1.0);
        let mut opt = optimizer(0.5, params, Scripted::constant(0.5))?;
        let outcome = opt.optimize_safely();
        assert!(outcome.is_success());
        match &outcome {
            OptimizationOutcome::Completed { state, termination } => {
                assert_eq!(state.iterations(), 0);
                assert_eq!(*termination, TerminationReason::AlreadyConverged);
            }
            OptimizationOutcome::Failed { reason, .. } => panic!("unexpected failure: {reason}"),
        }
        assert_eq!(outcome.into_result()?, 0.5);
        Ok(())
    }

    #[test]
    fn test_run_continues_from_current_state() -> TestResult {
        let params = NonlinearOptimizerParams::new().with_max_iterations(2);
        let mut opt = optimizer(16.0, params, Scripted::constant(0.5))?;
        opt.run()?;
        assert_eq!(opt.iterations(), 2);
        // already at the cap: a second run is a no-op
        opt.run()?;
        assert_eq!(opt.iterations(), 2);
        assert_eq!(opt.error(), 4.0);
        Ok(())
    }

    #[test]
    fn test_construction_fails_on_unevaluable_estimate() {
        assert!(
            optimizer(
                f64::NAN,
                NonlinearOptimizerParams::new(),
                Scripted::constant(1.0)
            )
            .is_err()
        );
    }
}
