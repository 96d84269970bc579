//! Levenberg-Marquardt step strategy.
//!
//! Each iteration solves the damped problem
//!
//! ```text
//! (JᵀJ + λ·D)·δ = -Jᵀr
//! ```
//!
//! where `D` is the identity or, with diagonal damping, `diag(JᵀJ)` clamped to
//! `[min_diagonal, max_diagonal]`. The damping is applied as extra unary factors, so every
//! linear solver family handles it unchanged.
//!
//! A trial step is scored by the gain ratio
//!
//! ```text
//! ρ = (f(x) - f(x ⊕ δ)) / (L(0) - L(δ)),   L(δ) = ½‖J·δ + r‖²
//! ```
//!
//! Steps with `ρ > 0` are accepted and `λ` shrinks by Nielsen's rule
//! `λ ← λ·max(1/3, 1 - (2ρ - 1)³)`. Rejected steps (or singular damped systems) grow `λ` by
//! `ν`, doubling `ν` each time, and the step is retried. Once `λ` passes
//! `lambda_upper_bound` the iteration gives up and returns the unchanged estimate, which the
//! driver's convergence policy reads as zero decrease.

use tracing::debug;

use crate::core::problem::NonlinearProblem;
use crate::linalg::{LinearSystem, VectorValues};
use crate::optimizer::{
    LinearSolveDispatcher, NonlinearOptimizerParams, OptimizerError, OptimizerResult,
    OptimizerState, OptimizerType, StepDiagnostics, StepStrategy,
};

/// Configuration parameters for the Levenberg-Marquardt strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct LevenbergMarquardtParams {
    /// Initial damping parameter
    pub initial_lambda: f64,
    /// Damping never drops below this value
    pub lambda_lower_bound: f64,
    /// Give up on an iteration once damping exceeds this value
    pub lambda_upper_bound: f64,
    /// Initial growth factor for rejected steps
    pub initial_nu: f64,
    /// Scale damping by the Hessian diagonal instead of the identity
    pub diagonal_damping: bool,
    /// Minimum diagonal value for diagonal damping
    pub min_diagonal: f64,
    /// Maximum diagonal value for diagonal damping
    pub max_diagonal: f64,
}

impl Default for LevenbergMarquardtParams {
    fn default() -> Self {
        Self {
            initial_lambda: 1e-5,
            lambda_lower_bound: 0.0,
            lambda_upper_bound: 1e5,
            initial_nu: 2.0,
            diagonal_damping: false,
            min_diagonal: 1e-6,
            max_diagonal: 1e32,
        }
    }
}

impl LevenbergMarquardtParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }

    pub fn with_lambda_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lambda_lower_bound = lower;
        self.lambda_upper_bound = upper;
        self
    }

    pub fn with_diagonal_damping(mut self, diagonal_damping: bool) -> Self {
        self.diagonal_damping = diagonal_damping;
        self
    }

    pub fn with_diagonal_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_diagonal = min;
        self.max_diagonal = max;
        self
    }

    pub fn print_configuration(&self) {
        debug!(
            "Step strategy: Levenberg-Marquardt\n  Initial lambda:      {:.2e}\n  Lambda range:        [{:.2e}, {:.2e}]\n  Diagonal damping:    {}\n  Diagonal range:      [{:.2e}, {:.2e}]",
            self.initial_lambda,
            self.lambda_lower_bound,
            self.lambda_upper_bound,
            if self.diagonal_damping {
                "enabled"
            } else {
                "disabled"
            },
            self.min_diagonal,
            self.max_diagonal,
        );
    }
}

#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    params: LevenbergMarquardtParams,
    lambda: f64,
    nu: f64,
    last: StepDiagnostics,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::with_params(LevenbergMarquardtParams::default())
    }
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: LevenbergMarquardtParams) -> Self {
        Self {
            lambda: params.initial_lambda,
            nu: params.initial_nu,
            params,
            last: StepDiagnostics::default(),
        }
    }

    pub fn params(&self) -> &LevenbergMarquardtParams {
        &self.params
    }

    /// Current damping.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Nielsen update after an accepted step.
    fn decrease_lambda(&mut self, rho: f64) {
        let coff = 2.0 * rho - 1.0;
        self.lambda *= (1.0_f64 / 3.0).max(1.0 - coff * coff * coff);
        self.lambda = self.lambda.max(self.params.lambda_lower_bound);
        self.nu = self.params.initial_nu;
    }

    /// Grow damping after a rejected step; false once the upper bound is passed.
    fn increase_lambda(&mut self) -> bool {
        // a zero lambda would never grow
        self.lambda = (self.lambda * self.nu).max(f64::MIN_POSITIVE);
        self.nu *= 2.0;
        self.lambda <= self.params.lambda_upper_bound
    }

    fn damping_diagonal(&self, system: &LinearSystem) -> Option<VectorValues> {
        self.params.diagonal_damping.then(|| {
            system
                .hessian_diagonal()
                .iter()
                .map(|(key, d)| {
                    let clamped =
                        d.map(|v| v.clamp(self.params.min_diagonal, self.params.max_diagonal));
                    (key, clamped)
                })
                .collect()
        })
    }
}

fn step_quality(actual_reduction: f64, predicted_reduction: f64) -> f64 {
    if predicted_reduction.abs() < 1e-15 {
        if actual_reduction > 0.0 { 1.0 } else { 0.0 }
    } else {
        actual_reduction / predicted_reduction
    }
}

impl<P: NonlinearProblem> StepStrategy<P> for LevenbergMarquardt {
    fn optimizer_type(&self) -> OptimizerType {
        OptimizerType::LevenbergMarquardt
    }

    fn iterate(
        &mut self,
        problem: &P,
        state: &OptimizerState<P::Values>,
        params: &NonlinearOptimizerParams,
        dispatcher: &mut LinearSolveDispatcher,
    ) -> OptimizerResult<OptimizerState<P::Values>> {
        let system = problem.linearize(state.values())?;
        let diagonal = self.damping_diagonal(&system);
        let model_error = system.error(&VectorValues::zero(system.dims()));
        let mut inner_iterations = 0;

        loop {
            inner_iterations += 1;
            let damped = system.damped(self.lambda, diagonal.as_ref())?;
            let step = match dispatcher.solve(&damped, params) {
                Ok(step) => step,
                Err(OptimizerError::LinAlg(e)) => {
                    debug!("damped system with λ = {:.2e} not solvable: {e}", self.lambda);
                    if self.increase_lambda() {
                        continue;
                    }
                    break;
                }
                Err(e) => return Err(e),
            };

            let predicted_reduction = model_error - system.error(&step);
            let values = problem.retract(state.values(), &step)?;
            let new_error = problem.error(&values)?;
            let rho = step_quality(state.error() - new_error, predicted_reduction);

            if rho > 0.0 && new_error.is_finite() {
                self.decrease_lambda(rho);
                self.last = StepDiagnostics {
                    step_norm: step.norm(),
                    damping: Some(self.lambda),
                    trust_radius: None,
                    step_quality: Some(rho),
                    inner_iterations,
                };
                return Ok(state.successor(values, new_error));
            }

            debug!(
                "rejected step: ρ = {rho:.3e}, error {new_error:.6e}, λ = {:.2e}",
                self.lambda
            );
            if !self.increase_lambda() {
                break;
            }
        }

        debug!(
            "damping exceeded {:.2e} without an acceptable step",
            self.params.lambda_upper_bound
        );
        // next iteration starts from a usable damping again
        self.lambda = self.params.lambda_upper_bound;
        self.nu = self.params.initial_nu;
        self.last = StepDiagnostics {
            step_norm: 0.0,
            damping: Some(self.lambda),
            trust_radius: None,
            step_quality: None,
            inner_iterations,
        };
        Ok(state.successor(state.values().clone(), state.error()))
    }

    fn diagnostics(&self) -> StepDiagnostics {
        self.last.clone()
    }

    fn print_configuration(&self) {
        self.params.print_configuration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nielsen_update() {
        let mut lm = LevenbergMarquardt::with_params(
            LevenbergMarquardtParams::new().with_initial_lambda(1.0),
        );
        // perfect model: λ shrinks by the 1/3 floor
        lm.decrease_lambda(1.0);
        assert!((lm.lambda() - 1.0 / 3.0).abs() < 1e-12);
        // ρ = 0.5 leaves λ unchanged
        lm.decrease_lambda(0.5);
        assert!((lm.lambda() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejections_grow_geometrically_until_bound() {
        let mut lm = LevenbergMarquardt::with_params(
            LevenbergMarquardtParams::new()
                .with_initial_lambda(1.0)
                .with_lambda_bounds(0.0, 100.0),
        );
        assert!(lm.increase_lambda()); // 2
        assert!(lm.increase_lambda()); // 8
        assert!(lm.increase_lambda()); // 64
        assert_eq!(lm.lambda(), 64.0);
        assert!(!lm.increase_lambda()); // 1024
        lm.decrease_lambda(1.0);
        assert_eq!(lm.nu, 2.0);
    }

    #[test]
    fn test_step_quality() {
        assert_eq!(step_quality(1.0, 2.0), 0.5);
        assert_eq!(step_quality(1.0, 0.0), 1.0);
        assert_eq!(step_quality(-1.0, 0.0), 0.0);
    }
}
