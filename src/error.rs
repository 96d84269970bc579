//! Error types for the graphopt library
//!
//! Each module owns a `thiserror` enum (`CoreError`, `LinAlgError`, `ManifoldError`,
//! `OptimizerError`); `GraphOptError` wraps them transparently for callers that want a
//! single error type while keeping the source chain intact.
//!
//! Example error chain:
//! ```text
//! GraphOptError::Optimizer(
//!     OptimizerError::LinAlg(
//!         LinAlgError::FactorizationFailed("Cholesky factorization failed")
//!     )
//! )
//! ```

use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    core::CoreError, linalg::LinAlgError, manifold::ManifoldError, optimizer::OptimizerError,
};

/// Main result type used throughout the graphopt library
pub type GraphOptResult<T> = Result<T, GraphOptError>;

/// Top-level error type for the graphopt library
#[derive(Debug, Error)]
pub enum GraphOptError {
    /// Problem construction and factor evaluation errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Optimization driver, dispatch and configuration errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Manifold operation errors
    #[error(transparent)]
    Manifold(#[from] ManifoldError),
}

impl GraphOptError {
    /// Full error chain, one cause per line.
    ///
    /// ```rust,ignore
    /// if let Err(e) = optimizer.run() {
    ///     warn!("Full chain: {}", GraphOptError::from(e).chain());
    /// }
    /// ```
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Single-line error chain with arrow separators.
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}
