//! Observer pattern for monitoring optimization progress.
//!
//! Observers are notified by the driver after every completed iteration with the new estimate.
//! They never influence control flow; use the driver's cancellation hook to stop a run.
//!
//! ```no_run
//! use graphopt::core::values::Values;
//! use graphopt::observers::OptObserver;
//!
//! struct PrintObserver;
//!
//! impl OptObserver<Values> for PrintObserver {
//!     fn on_step(&self, values: &Values, iteration: usize) {
//!         println!("iteration {iteration}: {} variables", values.len());
//!     }
//! }
//! ```

use crate::optimizer::StepDiagnostics;

/// Receives the estimate after each optimizer iteration.
///
/// Methods take `&self`; use interior mutability (`Mutex`, atomics) to record state.
pub trait OptObserver<V>: Send {
    fn on_step(&self, values: &V, iteration: usize);

    /// Per-iteration scalars: error after the step and the strategy's diagnostics.
    fn set_iteration_metrics(&self, _error: f64, _diagnostics: &StepDiagnostics) {}
}

/// Collection of observers notified in insertion order.
pub struct OptObserverVec<V> {
    observers: Vec<Box<dyn OptObserver<V>>>,
}

impl<V> Default for OptObserverVec<V> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
        }
    }
}

impl<V> OptObserverVec<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: impl OptObserver<V> + 'static) {
        self.observers.push(Box::new(observer));
    }

    #[inline]
    pub fn set_iteration_metrics(&self, error: f64, diagnostics: &StepDiagnostics) {
        for observer in &self.observers {
            observer.set_iteration_metrics(error, diagnostics);
        }
    }

    #[inline]
    pub fn notify(&self, values: &V, iteration: usize) {
        for observer in &self.observers {
            observer.on_step(values, iteration);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observers.len()
    }
}
