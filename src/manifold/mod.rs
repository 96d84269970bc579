//! Manifold representations for optimization on non-Euclidean spaces.
//!
//! Only the planar rigid motion group SE(2) is needed by the pose-graph helpers; Euclidean
//! variables are plain `nalgebra::DVector`s and live directly in
//! [`VariableEnum`](crate::core::values::VariableEnum).
//!
//! Lie group M,° | size | dim | X ∈ M            | Exp(T)    | Comp. | Action
//! ------------- | ---- | --- | ---------------- | --------- | ----- | ------
//! Rigid motion  | 9    | 3   | M = [R t; 0 1]   | Exp([v̂])  | M₁M₂  | Rx+t
//!
//! Perturbations are applied on the right: `X ⊕ δ = X ∘ Exp(δ)` and
//! `Y ⊖ X = Log(X⁻¹ ∘ Y)`.

use thiserror::Error;
use tracing::error;

pub mod se2;

pub use se2::SE2;

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    /// Tangent or coordinate vector has the wrong length
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// NaN or Inf detected in a manifold element
    #[error("Invalid number (NaN or Inf) in manifold element")]
    InvalidNumber,
}

impl ManifoldError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for manifold operations
pub type ManifoldResult<T> = Result<T, ManifoldError>;
