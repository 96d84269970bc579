//! Core problem components for the graphopt library
//!
//! This module contains the building blocks the optimizer consumes:
//! - the [`NonlinearProblem`](problem::NonlinearProblem) capability trait
//! - keyed [`Values`](values::Values) estimates over Euclidean and SE(2) variables
//! - diagonal noise models for whitening residuals
//! - the reference [`FactorGraph`](factor_graph::FactorGraph) problem type

pub mod factor_graph;
pub mod noise_model;
pub mod problem;
pub mod values;

use thiserror::Error;
use tracing::error;

use crate::manifold::ManifoldError;

/// Identifier of a variable in a factor graph.
pub type Key = usize;

/// Core module error types for problems, values and factors
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Variable missing from the estimate or of the wrong kind
    #[error("Variable error: {0}")]
    Variable(String),

    /// Factor linearization failed
    #[error("Factor linearization failed: {0}")]
    FactorLinearization(String),

    /// Dimension mismatch between residual/Jacobian/variables
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Manifold operation failed while updating a variable
    #[error("Manifold error: {0}")]
    Manifold(#[from] ManifoldError),
}

impl CoreError {
    /// Emit at ERROR and pass the error on, e.g.
    /// `.ok_or_else(|| CoreError::Variable(format!("missing key {key}")).log())?`.
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the third-party error that caused it
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
