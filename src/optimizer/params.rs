//! Driver configuration and the string surface for its enumerated options.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::linalg::pcg::PcgParams;
use crate::linalg::subgraph::SubgraphParams;
use crate::linalg::{EliminationFunction, Ordering, OrderingType};
use crate::optimizer::OptimizerError;

/// Tiers of diagnostic output. Higher tiers include everything below them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verbosity {
    #[default]
    Silent,
    /// Termination reason and divergence warnings
    Termination,
    /// Error after every iteration
    Error,
    /// Full estimate after every iteration
    Values,
}

/// Family of linear solvers used for the sub-problem of each iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinearSolverType {
    #[default]
    Multifrontal,
    Sequential,
    Iterative,
    ExternalQr,
    ExternalCholesky,
}

/// Companion parameters of the iterative family.
#[derive(Debug, Clone, PartialEq)]
pub enum IterativeParams {
    Pcg(PcgParams),
    Subgraph(SubgraphParams),
}

impl From<PcgParams> for IterativeParams {
    fn from(params: PcgParams) -> Self {
        IterativeParams::Pcg(params)
    }
}

impl From<SubgraphParams> for IterativeParams {
    fn from(params: SubgraphParams) -> Self {
        IterativeParams::Subgraph(params)
    }
}

/// Parameters shared by every step strategy.
///
/// Consistency between `linear_solver_type` and its companion parameters
/// (`iterative_params`, `ordering`) is checked when a linear system is solved, not here.
#[derive(Debug, Clone)]
pub struct NonlinearOptimizerParams {
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Stop when the per-iteration relative error decrease falls to this value; 0 disables
    pub relative_error_tol: f64,
    /// Stop when the per-iteration absolute error decrease falls to this value
    pub absolute_error_tol: f64,
    /// Stop when the error itself falls to this value
    pub error_tol: f64,
    pub verbosity: Verbosity,
    /// Explicit elimination ordering; computed from `ordering_type` when absent
    pub ordering: Option<Ordering>,
    pub ordering_type: OrderingType,
    pub linear_solver_type: LinearSolverType,
    pub elimination_function: EliminationFunction,
    /// Required by [`LinearSolverType::Iterative`]
    pub iterative_params: Option<IterativeParams>,
}

impl Default for NonlinearOptimizerParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            relative_error_tol: 1e-5,
            absolute_error_tol: 1e-5,
            error_tol: 0.0,
            verbosity: Verbosity::Silent,
            ordering: None,
            ordering_type: OrderingType::default(),
            linear_solver_type: LinearSolverType::default(),
            elimination_function: EliminationFunction::default(),
            iterative_params: None,
        }
    }
}

impl NonlinearOptimizerParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_relative_error_tol(mut self, relative_error_tol: f64) -> Self {
        self.relative_error_tol = relative_error_tol;
        self
    }

    pub fn with_absolute_error_tol(mut self, absolute_error_tol: f64) -> Self {
        self.absolute_error_tol = absolute_error_tol;
        self
    }

    pub fn with_error_tol(mut self, error_tol: f64) -> Self {
        self.error_tol = error_tol;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_ordering(mut self, ordering: impl Into<Ordering>) -> Self {
        self.ordering = Some(ordering.into());
        self
    }

    pub fn with_ordering_type(mut self, ordering_type: OrderingType) -> Self {
        self.ordering_type = ordering_type;
        self
    }

    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn with_elimination_function(mut self, elimination_function: EliminationFunction) -> Self {
        self.elimination_function = elimination_function;
        self
    }

    pub fn with_iterative_params(mut self, iterative_params: impl Into<IterativeParams>) -> Self {
        self.iterative_params = Some(iterative_params.into());
        self
    }

    /// Select solver family and elimination kind from one name, e.g. `"MULTIFRONTAL_QR"`,
    /// `"SEQUENTIAL_CHOLESKY"`, `"ITERATIVE"` or `"EXTERNAL_QR"`.
    ///
    /// A bare `"MULTIFRONTAL"` or `"SEQUENTIAL"` keeps the current elimination function.
    pub fn with_linear_solver_name(mut self, name: &str) -> Result<Self, OptimizerError> {
        let upper = name.trim().to_ascii_uppercase();
        let (family, elimination) = match upper.rsplit_once('_') {
            Some((family @ ("MULTIFRONTAL" | "SEQUENTIAL"), kind)) => {
                (family, Some(kind.parse::<EliminationFunction>()?))
            }
            _ => (upper.as_str(), None),
        };
        self.linear_solver_type = family.parse()?;
        if let Some(elimination) = elimination {
            self.elimination_function = elimination;
        }
        Ok(self)
    }

    pub fn is_multifrontal(&self) -> bool {
        self.linear_solver_type == LinearSolverType::Multifrontal
    }

    pub fn is_sequential(&self) -> bool {
        self.linear_solver_type == LinearSolverType::Sequential
    }

    pub fn is_iterative(&self) -> bool {
        self.linear_solver_type == LinearSolverType::Iterative
    }

    /// Print configuration parameters (verbose mode only)
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Linear solver:       {}\n  Elimination:         {}\n  Ordering:            {}\n  Iterative params:    {:?}\n  Convergence Criteria:\n  Max iterations:      {}\n  Relative error tol:  {:.2e}\n  Absolute error tol:  {:.2e}\n  Error tol:           {:.2e}\n  Verbosity:           {}",
            self.linear_solver_type,
            self.elimination_function,
            self.ordering.as_ref().map_or_else(
                || self.ordering_type.to_string(),
                |o| format!("explicit ({} keys)", o.len())
            ),
            self.iterative_params,
            self.max_iterations,
            self.relative_error_tol,
            self.absolute_error_tol,
            self.error_tol,
            self.verbosity,
        );
    }
}

fn invalid_parameter(kind: &str, value: &str) -> OptimizerError {
    OptimizerError::Configuration(format!(
        "Optimization parameter is invalid: unknown {kind} '{value}'"
    ))
    .log()
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verbosity::Silent => write!(f, "SILENT"),
            Verbosity::Termination => write!(f, "TERMINATION"),
            Verbosity::Error => write!(f, "ERROR"),
            Verbosity::Values => write!(f, "VALUES"),
        }
    }
}

impl FromStr for Verbosity {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SILENT" => Ok(Verbosity::Silent),
            "TERMINATION" => Ok(Verbosity::Termination),
            "ERROR" => Ok(Verbosity::Error),
            "VALUES" => Ok(Verbosity::Values),
            _ => Err(invalid_parameter("verbosity", s)),
        }
    }
}

impl fmt::Display for LinearSolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::Multifrontal => write!(f, "MULTIFRONTAL"),
            LinearSolverType::Sequential => write!(f, "SEQUENTIAL"),
            LinearSolverType::Iterative => write!(f, "ITERATIVE"),
            LinearSolverType::ExternalQr => write!(f, "EXTERNAL_QR"),
            LinearSolverType::ExternalCholesky => write!(f, "EXTERNAL_CHOLESKY"),
        }
    }
}

impl FromStr for LinearSolverType {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MULTIFRONTAL" => Ok(LinearSolverType::Multifrontal),
            "SEQUENTIAL" => Ok(LinearSolverType::Sequential),
            "ITERATIVE" => Ok(LinearSolverType::Iterative),
            "EXTERNAL_QR" => Ok(LinearSolverType::ExternalQr),
            "EXTERNAL_CHOLESKY" => Ok(LinearSolverType::ExternalCholesky),
            _ => Err(invalid_parameter("linear solver type", s)),
        }
    }
}

impl FromStr for EliminationFunction {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QR" => Ok(EliminationFunction::Qr),
            "CHOLESKY" => Ok(EliminationFunction::Cholesky),
            _ => Err(invalid_parameter("elimination function", s)),
        }
    }
}

impl FromStr for OrderingType {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NATURAL" => Ok(OrderingType::Natural),
            "MINIMUM_DEGREE" | "COLAMD" | "METIS" => Ok(OrderingType::MinimumDegree),
            _ => Err(invalid_parameter("ordering type", s)),
        }
    }
}
