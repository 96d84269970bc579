//! # graphopt
//!
//! Iterative nonlinear least-squares optimization over factor graphs.
//!
//! Each iteration linearizes the current estimate, solves the linear sub-problem with one of
//! several interchangeable solver families, retracts the step onto the estimate and decides
//! whether to stop.
//!
//! ## Step strategies
//!
//! - **Gauss-Newton**: full undamped steps
//! - **Levenberg-Marquardt**: adaptive damping with Nielsen's update
//! - **Dog Leg**: trust region blend of Gauss-Newton and steepest descent
//!
//! ## Linear solver families
//!
//! - **Multifrontal**: sparse Cholesky of `JᵀJ` or sparse QR of `J` (faer)
//! - **Sequential**: dense elimination in ordering order (nalgebra)
//! - **Iterative**: preconditioned conjugate gradients, optionally with a spanning-subgraph
//!   preconditioner
//! - **External QR / Cholesky**: generic sparse normal-equation solvers
//!
//! The driver is generic over any [`NonlinearProblem`]; [`FactorGraph`] and
//! [`PoseGraph2D`](slam::PoseGraph2D) are ready-made problems.

pub mod core;
pub mod error;
pub mod factors;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod observers;
pub mod optimizer;
pub mod slam;

pub use core::Key;
pub use core::factor_graph::FactorGraph;
pub use core::problem::NonlinearProblem;
pub use core::values::Values;
pub use error::{GraphOptError, GraphOptResult};

pub use factors::{BetweenFactor, Factor, Pose2PriorFactor, PriorFactor};

pub use linalg::{
    EliminationFunction, Ordering, OrderingType, SparseCholeskySolver, SparseLinearSolver,
    SparseQRSolver, VectorValues,
};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use manifold::SE2;
pub use optimizer::{
    DogLeg, GaussNewton, IterativeParams, LevenbergMarquardt, LinearSolveDispatcher,
    LinearSolverType, NonlinearOptimizer, NonlinearOptimizerParams, OptObserver, OptObserverVec,
    OptimizationOutcome, OptimizerState, OptimizerType, StepStrategy, TerminationReason,
    Verbosity,
};
