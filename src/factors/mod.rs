//! Factor implementations for pose-graph problems.
//!
//! A factor computes a residual `r(x)` over the variables it connects and, on request, the
//! Jacobian `J = ∂r/∂x` with respect to their tangent spaces, stacked horizontally in key
//! order. Noise weighting is applied by [`FactorGraph`](crate::core::factor_graph::FactorGraph),
//! not by the factors themselves.
//!
//! - [`PriorFactor`]: Euclidean prior `r = x - x₀`
//! - [`Pose2PriorFactor`]: SE(2) prior `r = Log(x₀⁻¹ ∘ x)`
//! - [`BetweenFactor`]: SE(2) relative measurement `r = Log(z⁻¹ ∘ xᵢ⁻¹ ∘ xⱼ)`

use nalgebra::{DMatrix, DVector};

use crate::core::{CoreError, CoreResult};

pub mod between_factor;
pub mod prior_factor;

pub use between_factor::BetweenFactor;
pub use prior_factor::{Pose2PriorFactor, PriorFactor};

pub trait Factor: Send + Sync {
    /// Residual and, when `compute_jacobian` is set, the Jacobian for the given variable
    /// coordinates (one vector per connected key).
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)>;

    /// Residual dimension.
    fn get_dimension(&self) -> usize;
}

/// Check that a factor received `expected` parameter vectors.
pub(crate) fn expect_params(params: &[DVector<f64>], expected: usize) -> CoreResult<()> {
    if params.len() == expected {
        Ok(())
    } else {
        Err(CoreError::FactorLinearization(format!(
            "expected {expected} variables, got {}",
            params.len()
        ))
        .log())
    }
}
