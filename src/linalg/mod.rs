//! Linear algebra layer: linearized systems, orderings and the solver back ends.
//!
//! A [`LinearSystem`] is a list of Jacobian factors; every back end consumes it and returns a
//! keyed [`VectorValues`] step minimizing `½‖J·δ + r‖²`:
//!
//! - [`multifrontal`]: faer sparse Cholesky of `JᵀJ` or sparse QR of `J`
//! - [`sequential`]: dense nalgebra elimination in ordering order
//! - [`pcg`]: matrix-free preconditioned conjugate gradients
//! - [`subgraph`]: conjugate gradients preconditioned by a spanning subgraph
//! - [`SparseCholeskySolver`] / [`SparseQRSolver`]: normal-equation solvers on assembled
//!   sparse matrices behind the [`SparseLinearSolver`] trait

pub mod cholesky;
pub mod linear_system;
pub mod multifrontal;
pub mod ordering;
pub mod pcg;
pub mod qr;
pub mod sequential;
pub mod subgraph;
pub mod vector_values;

use faer::{Mat, sparse::SparseColMat};
use thiserror::Error;
use tracing::error;

pub use cholesky::SparseCholeskySolver;
pub use linear_system::{ColumnLayout, JacobianFactor, LinearSystem};
pub use ordering::{Ordering, OrderingType};
pub use qr::SparseQRSolver;
pub use vector_values::VectorValues;

/// Dense kernel used when eliminating variables.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EliminationFunction {
    /// Orthogonal factorization of the Jacobian; robust to poor conditioning
    Qr,
    /// Cholesky factorization of the normal equations
    #[default]
    Cholesky,
}

impl std::fmt::Display for EliminationFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EliminationFunction::Qr => write!(f, "QR"),
            EliminationFunction::Cholesky => write!(f, "CHOLESKY"),
        }
    }
}

/// Failures of the linear solver back ends.
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    #[error("Linear algebra error: matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// The factored matrix has no usable inverse
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    #[error("Failed to create sparse matrix: {0}")]
    SparseMatrixCreation(String),

    #[error("Matrix conversion failed: {0}")]
    MatrixConversion(String),

    /// Ordering does not cover the keys of the system
    #[error("Invalid ordering: {0}")]
    InvalidOrdering(String),

    /// Block sizes disagree with the system layout
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

impl LinAlgError {
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log together with the faer or nalgebra error that caused it.
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Sparse solvers working on an assembled Jacobian and residual column.
pub trait SparseLinearSolver {
    /// Step `dx` with `JᵀJ·dx = -Jᵀr`, in the column order of `jacobians`.
    fn solve_normal_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<Mat<f64>>;

    /// `JᵀJ` from the last solve
    fn get_hessian(&self) -> Option<&SparseColMat<usize, f64>>;

    /// `Jᵀr` from the last solve
    fn get_gradient(&self) -> Option<&Mat<f64>>;

    /// Drop any cached symbolic factorization; required when the sparsity pattern changes.
    fn reset(&mut self);
}

/// Form `H = JᵀJ` and `g = Jᵀr` from an assembled system.
pub(crate) fn normal_equations(
    residuals: &Mat<f64>,
    jacobians: &SparseColMat<usize, f64>,
) -> LinAlgResult<(SparseColMat<usize, f64>, Mat<f64>)> {
    use std::ops::Mul;

    let hessian = jacobians
        .as_ref()
        .transpose()
        .to_col_major()
        .map_err(|e| {
            LinAlgError::MatrixConversion(
                "Failed to convert transposed Jacobian to column-major format".to_string(),
            )
            .log_with_source(e)
        })?
        .mul(jacobians.as_ref());
    let gradient = jacobians.as_ref().transpose().mul(residuals);
    Ok((hessian, gradient))
}

/// Whether two assembled matrices have the same nonzero pattern.
pub(crate) fn same_pattern(a: &SparseColMat<usize, f64>, b: &SparseColMat<usize, f64>) -> bool {
    let (a, b) = (a.symbolic(), b.symbolic());
    a.nrows() == b.nrows()
        && a.ncols() == b.ncols()
        && a.col_ptr() == b.col_ptr()
        && a.row_idx() == b.row_idx()
}
