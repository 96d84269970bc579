use crate::core::CoreResult;
use crate::core::problem::NonlinearProblem;

/// Immutable snapshot of an optimization run: estimate, its error and the iteration count.
///
/// The error is always evaluated from the problem and the stored values; a state is replaced
/// wholesale each iteration, never edited.
#[derive(Debug, Clone)]
pub struct OptimizerState<V> {
    values: V,
    error: f64,
    iterations: usize,
}

impl<V> OptimizerState<V> {
    /// Initial state with zero iterations.
    pub fn new<P>(problem: &P, values: V) -> CoreResult<Self>
    where
        P: NonlinearProblem<Values = V>,
    {
        let error = problem.error(&values)?;
        Ok(OptimizerState {
            values,
            error,
            iterations: 0,
        })
    }

    /// Successor state holding `values`, one iteration further.
    pub fn advance<P>(&self, problem: &P, values: V) -> CoreResult<Self>
    where
        P: NonlinearProblem<Values = V>,
    {
        let error = problem.error(&values)?;
        Ok(self.successor(values, error))
    }

    /// Successor whose `error` the caller has just evaluated with `problem.error(&values)`.
    pub(crate) fn successor(&self, values: V, error: f64) -> Self {
        OptimizerState {
            values,
            error,
            iterations: self.iterations + 1,
        }
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn values(&self) -> &V {
        &self.values
    }

    pub fn into_values(self) -> V {
        self.values
    }
}
