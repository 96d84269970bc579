//! Stopping rule applied after every iteration.
//!
//! ```text
//! converged ⇔ new ≤ error_tol
//!           ∨ (relative_tol ≠ 0 ∧ (current - new) / current ≤ relative_tol)
//!           ∨ (current - new) ≤ absolute_tol
//! ```
//!
//! An increase in error gives a negative absolute decrease, so divergence always stops the
//! loop. A zero current error counts as converged without forming the relative decrease.

use tracing::{debug, info, warn};

use crate::optimizer::params::{NonlinearOptimizerParams, Verbosity};

/// Outcome of comparing the error before and after one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceVerdict {
    pub converged: bool,
    /// The error went up
    pub diverged: bool,
    pub absolute_decrease: f64,
    /// Zero when the current error is zero
    pub relative_decrease: f64,
}

impl ConvergenceVerdict {
    pub fn evaluate(
        relative_error_tol: f64,
        absolute_error_tol: f64,
        error_tol: f64,
        current_error: f64,
        new_error: f64,
    ) -> Self {
        let absolute_decrease = current_error - new_error;
        let diverged = absolute_decrease < 0.0;

        if new_error <= error_tol {
            return ConvergenceVerdict {
                converged: true,
                diverged,
                absolute_decrease,
                relative_decrease: relative_decrease(absolute_decrease, current_error),
            };
        }
        if current_error == 0.0 {
            return ConvergenceVerdict {
                converged: true,
                diverged,
                absolute_decrease,
                relative_decrease: 0.0,
            };
        }

        let relative_decrease = absolute_decrease / current_error;
        let relative_reduction =
            relative_error_tol != 0.0 && relative_decrease <= relative_error_tol;
        let absolute_reduction = absolute_decrease <= absolute_error_tol;
        ConvergenceVerdict {
            converged: relative_reduction || absolute_reduction,
            diverged,
            absolute_decrease,
            relative_decrease,
        }
    }
}

fn relative_decrease(absolute_decrease: f64, current_error: f64) -> f64 {
    if current_error == 0.0 {
        0.0
    } else {
        absolute_decrease / current_error
    }
}

/// Decide whether the loop should stop after an iteration took the error from
/// `current_error` to `new_error`.
pub fn check_convergence(
    relative_error_tol: f64,
    absolute_error_tol: f64,
    error_tol: f64,
    current_error: f64,
    new_error: f64,
    verbosity: Verbosity,
) -> bool {
    let verdict = ConvergenceVerdict::evaluate(
        relative_error_tol,
        absolute_error_tol,
        error_tol,
        current_error,
        new_error,
    );

    if verbosity >= Verbosity::Error {
        if new_error <= error_tol {
            debug!("error {new_error:.6e} within threshold {error_tol:.6e}");
        } else {
            debug!("new error {new_error:.6e}, threshold {error_tol:.6e}");
            debug!(
                "absolute decrease {:.6e}, tolerance {absolute_error_tol:.6e}",
                verdict.absolute_decrease
            );
            debug!(
                "relative decrease {:.6e}, tolerance {relative_error_tol:.6e}",
                verdict.relative_decrease
            );
        }
    }

    if verdict.converged && verbosity >= Verbosity::Termination {
        if new_error <= error_tol {
            info!("error {new_error:.6e} below threshold {error_tol:.6e}");
        } else if verdict.diverged {
            warn!(
                "stopping nonlinear iterations: error increased from {current_error:.6e} \
                 to {new_error:.6e}"
            );
        } else {
            info!(
                "converged: absolute decrease {:.6e}, relative decrease {:.6e}",
                verdict.absolute_decrease, verdict.relative_decrease
            );
        }
    }
    verdict.converged
}

pub fn check_convergence_with_params(
    params: &NonlinearOptimizerParams,
    current_error: f64,
    new_error: f64,
) -> bool {
    check_convergence(
        params.relative_error_tol,
        params.absolute_error_tol,
        params.error_tol,
        current_error,
        new_error,
        params.verbosity,
    )
}
