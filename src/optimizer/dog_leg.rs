//! Powell's dog leg step strategy.
//!
//! The step follows the piecewise path from the origin through the Cauchy point
//! `δ_c = -α·g` (with `α = gᵀg / gᵀHg`, `g = Jᵀr`, `H = JᵀJ`) to the Gauss-Newton step
//! `δ_gn`, cut at the trust region radius `Δ`:
//!
//! - `‖δ_gn‖ ≤ Δ`: take `δ_gn`
//! - `‖δ_c‖ ≥ Δ`: scaled steepest descent `-(Δ/‖g‖)·g`
//! - otherwise `δ_c + β·(δ_gn - δ_c)` with `β ∈ [0, 1]` putting the step on the boundary
//!
//! The radius follows the gain ratio `ρ`: it grows to `max(Δ, 3‖δ‖)` when `ρ > 0.75` and
//! halves when `ρ < 0.25`. Steps that do not lower the error halve the radius and are
//! retried until it drops below `min_radius`.

use tracing::debug;

use crate::core::problem::NonlinearProblem;
use crate::linalg::VectorValues;
use crate::optimizer::{
    LinearSolveDispatcher, NonlinearOptimizerParams, OptimizerResult, OptimizerState,
    OptimizerType, StepDiagnostics, StepStrategy,
};

#[derive(Debug, Clone, PartialEq)]
pub struct DogLegParams {
    /// Initial trust region radius
    pub initial_radius: f64,
    /// Give up on an iteration once the radius falls below this value
    pub min_radius: f64,
    pub max_radius: f64,
    /// Gain ratio above which the radius grows
    pub good_step_quality: f64,
    /// Gain ratio below which the radius shrinks
    pub poor_step_quality: f64,
}

impl Default for DogLegParams {
    fn default() -> Self {
        Self {
            initial_radius: 1.0,
            min_radius: 1e-10,
            max_radius: 1e10,
            good_step_quality: 0.75,
            poor_step_quality: 0.25,
        }
    }
}

impl DogLegParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_radius(mut self, radius: f64) -> Self {
        self.initial_radius = radius;
        self
    }

    pub fn with_radius_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_radius = min;
        self.max_radius = max;
        self
    }

    pub fn with_step_quality_thresholds(mut self, poor: f64, good: f64) -> Self {
        self.poor_step_quality = poor;
        self.good_step_quality = good;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepType {
    GaussNewton,
    SteepestDescent,
    DogLeg,
}

#[derive(Debug, Clone)]
pub struct DogLeg {
    params: DogLegParams,
    radius: f64,
    last: StepDiagnostics,
}

impl Default for DogLeg {
    fn default() -> Self {
        Self::with_params(DogLegParams::default())
    }
}

impl DogLeg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: DogLegParams) -> Self {
        Self {
            radius: params.initial_radius,
            params,
            last: StepDiagnostics::default(),
        }
    }

    /// Current trust region radius.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    fn update_radius(&mut self, rho: f64, step_norm: f64) {
        if rho > self.params.good_step_quality {
            self.radius = self.radius.max(3.0 * step_norm).min(self.params.max_radius);
        } else if rho < self.params.poor_step_quality {
            self.radius *= 0.5;
        }
    }
}

/// Point on the dog leg path at distance `radius`, or the Gauss-Newton step if it fits.
fn dog_leg_step(
    gradient: &VectorValues,
    cauchy: &VectorValues,
    gauss_newton: &VectorValues,
    radius: f64,
) -> (VectorValues, StepType) {
    if gauss_newton.norm() <= radius {
        return (gauss_newton.clone(), StepType::GaussNewton);
    }

    let cauchy_norm = cauchy.norm();
    let gradient_norm = gradient.norm();
    if cauchy_norm >= radius && gradient_norm > 0.0 {
        return (gradient.scale(-radius / gradient_norm), StepType::SteepestDescent);
    }

    // ‖δ_c + β·v‖ = Δ, v = δ_gn - δ_c
    let v = gauss_newton.sub(cauchy);
    let a = v.squared_norm();
    let b = cauchy.dot(&v);
    let c = cauchy_norm * cauchy_norm - radius * radius;
    let d_squared = b * b - a * c;

    let beta = if d_squared < 0.0 || a < 1e-15 {
        1.0
    } else {
        let d = d_squared.sqrt();
        // avoid cancellation
        if b <= 0.0 { (-b + d) / a } else { -c / (b + d) }
    };
    (cauchy.axpy(beta.clamp(0.0, 1.0), &v), StepType::DogLeg)
}

impl<P: NonlinearProblem> StepStrategy<P> for DogLeg {
    fn optimizer_type(&self) -> OptimizerType {
        OptimizerType::DogLeg
    }

    fn iterate(
        &mut self,
        problem: &P,
        state: &OptimizerState<P::Values>,
        params: &NonlinearOptimizerParams,
        dispatcher: &mut LinearSolveDispatcher,
    ) -> OptimizerResult<OptimizerState<P::Values>> {
        let system = problem.linearize(state.values())?;
        let gauss_newton = dispatcher.solve(&system, params)?;

        let gradient = system.gradient();
        let curvature = gradient.dot(&system.hessian_vector(&gradient));
        let alpha = if curvature.abs() > 1e-15 {
            gradient.squared_norm() / curvature
        } else {
            1.0
        };
        let cauchy = gradient.scale(-alpha);
        let model_error = system.error(&VectorValues::zero(system.dims()));

        let mut inner_iterations = 0;
        while self.radius >= self.params.min_radius {
            inner_iterations += 1;
            let (step, step_type) = dog_leg_step(&gradient, &cauchy, &gauss_newton, self.radius);
            let step_norm = step.norm();

            let predicted_reduction = model_error - system.error(&step);
            let values = problem.retract(state.values(), &step)?;
            let new_error = problem.error(&values)?;
            let actual_reduction = state.error() - new_error;
            let rho = if predicted_reduction.abs() < 1e-15 {
                if actual_reduction > 0.0 { 1.0 } else { 0.0 }
            } else {
                actual_reduction / predicted_reduction
            };
            if rho > 0.0 && new_error.is_finite() {
                self.update_radius(rho, step_norm);
                self.last = StepDiagnostics {
                    step_norm,
                    damping: None,
                    trust_radius: Some(self.radius),
                    step_quality: Some(rho),
                    inner_iterations,
                };
                debug!("accepted {step_type:?} step, Δ = {:.2e}", self.radius);
                return Ok(state.successor(values, new_error));
            }
            self.radius *= 0.5;
            debug!(
                "rejected {step_type:?} step: ρ = {rho:.3e}, Δ now {:.2e}",
                self.radius
            );
        }

        debug!(
            "trust region radius fell below {:.2e} without an acceptable step",
            self.params.min_radius
        );
        // start the next iteration from a fresh region
        self.radius = self.params.initial_radius.max(self.params.min_radius);
        self.last = StepDiagnostics {
            step_norm: 0.0,
            damping: None,
            trust_radius: Some(self.radius),
            step_quality: None,
            inner_iterations,
        };
        Ok(state.successor(state.values().clone(), state.error()))
    }

    fn diagnostics(&self) -> StepDiagnostics {
        self.last.clone()
    }

    fn print_configuration(&self) {
        debug!(
            "Step strategy: Dog Leg\n  Initial radius:      {:.2e}\n  Radius range:        [{:.2e}, {:.2e}]\n  Step quality:        poor < {:.2}, good > {:.2}",
            self.params.initial_radius,
            self.params.min_radius,
            self.params.max_radius,
            self.params.poor_step_quality,
            self.params.good_step_quality,
        );
    }
}
