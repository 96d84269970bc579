use std::fmt::Debug;

use crate::core::{CoreResult, Key};
use crate::linalg::{LinearSystem, VectorValues};

/// Capability the optimizer needs from a nonlinear least-squares problem.
///
/// The optimizer never inspects the problem beyond these operations, so any graph-structured
/// error function can be driven as long as it can be evaluated, linearized and updated.
pub trait NonlinearProblem {
    /// Estimate type; `Default` is the empty estimate returned on failure.
    type Values: Clone + Default + Debug;

    /// Total error `½ Σ ‖whitened residual‖²` at `values`.
    fn error(&self, values: &Self::Values) -> CoreResult<f64>;

    /// Linearize every factor at `values`.
    fn linearize(&self, values: &Self::Values) -> CoreResult<LinearSystem>;

    /// Apply a tangent-space step, producing a new estimate.
    fn retract(&self, values: &Self::Values, step: &VectorValues) -> CoreResult<Self::Values>;

    /// Keys of all variables touched by the problem, used to build orderings.
    fn keys(&self) -> Vec<Key>;
}
