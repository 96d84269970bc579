//! End-to-end driver behaviour on a small curve-fitting problem.

use graphopt::core::{CoreResult, Key};
use graphopt::linalg::pcg::{PcgParams, PreconditionerType};
use graphopt::linalg::subgraph::SubgraphParams;
use graphopt::linalg::{EliminationFunction, JacobianFactor, LinearSystem, VectorValues};
use graphopt::optimizer::{
    DogLeg, GaussNewton, LevenbergMarquardt, LevenbergMarquardtParams, OptimizerError,
    check_convergence,
};
use graphopt::{
    LinearSolverType, NonlinearOptimizer, NonlinearOptimizerParams, NonlinearProblem,
    OptimizationOutcome, StepStrategy, TerminationReason, Verbosity,
};
use nalgebra::{DMatrix, DVector};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, Clone, Default, PartialEq)]
struct Curve {
    a: f64,
    b: f64,
}

/// Fit `y = a·exp(b·t)` to noiseless samples.
struct ExponentialFit {
    samples: Vec<(f64, f64)>,
}

impl ExponentialFit {
    fn new(a: f64, b: f64) -> Self {
        let samples = (0..12)
            .map(|i| {
                let t = 0.2 * i as f64;
                (t, a * (b * t).exp())
            })
            .collect();
        Self { samples }
    }
}

impl NonlinearProblem for ExponentialFit {
    type Values = Curve;

    fn error(&self, values: &Curve) -> CoreResult<f64> {
        Ok(0.5
            * self
                .samples
                .iter()
                .map(|(t, y)| (values.a * (values.b * t).exp() - y).powi(2))
                .sum::<f64>())
    }

    fn linearize(&self, values: &Curve) -> CoreResult<LinearSystem> {
        let mut system = LinearSystem::new();
        for (t, y) in &self.samples {
            let e = (values.b * t).exp();
            let block = DMatrix::from_row_slice(1, 2, &[e, values.a * t * e]);
            let residual = DVector::from_element(1, values.a * e - y);
            let factor = JacobianFactor::new(vec![0], vec![block], residual)
                .map_err(|e| graphopt::core::CoreError::FactorLinearization(e.to_string()))?;
            system
                .push(factor)
                .map_err(|e| graphopt::core::CoreError::DimensionMismatch(e.to_string()))?;
        }
        Ok(system)
    }

    fn retract(&self, values: &Curve, step: &VectorValues) -> CoreResult<Curve> {
        let delta = step
            .get(0)
            .cloned()
            .unwrap_or_else(|| DVector::zeros(2));
        Ok(Curve {
            a: values.a + delta[0],
            b: values.b + delta[1],
        })
    }

    fn keys(&self) -> Vec<Key> {
        vec![0]
    }
}

fn tight() -> NonlinearOptimizerParams {
    NonlinearOptimizerParams::new()
        .with_relative_error_tol(1e-12)
        .with_absolute_error_tol(1e-16)
        .with_error_tol(1e-20)
}

fn solve_with<S: StepStrategy<ExponentialFit>>(
    strategy: S,
    initial: Curve,
    params: NonlinearOptimizerParams,
) -> Result<Curve, OptimizerError> {
    let problem = ExponentialFit::new(2.0, 0.3);
    let mut optimizer = NonlinearOptimizer::new(&problem, initial, params, strategy)?;
    optimizer.run()?;
    assert!(optimizer.iterations() <= optimizer.params().max_iterations);
    Ok(optimizer.into_values())
}

fn assert_recovered(curve: &Curve) {
    assert!((curve.a - 2.0).abs() < 1e-6, "a = {}", curve.a);
    assert!((curve.b - 0.3).abs() < 1e-6, "b = {}", curve.b);
}

#[test]
fn every_strategy_recovers_the_curve() -> TestResult {
    let start = Curve { a: 1.0, b: 0.1 };
    assert_recovered(&solve_with(LevenbergMarquardt::new(), start.clone(), tight())?);
    assert_recovered(&solve_with(DogLeg::new(), start.clone(), tight())?);
    assert_recovered(&solve_with(
        GaussNewton::new(),
        Curve { a: 1.8, b: 0.25 },
        tight(),
    )?);
    Ok(())
}

#[test]
fn every_solver_family_gives_the_same_answer() -> TestResult {
    let families = [
        tight(),
        tight().with_elimination_function(EliminationFunction::Qr),
        tight().with_linear_solver_type(LinearSolverType::Sequential),
        tight()
            .with_linear_solver_type(LinearSolverType::Sequential)
            .with_elimination_function(EliminationFunction::Qr),
        tight()
            .with_linear_solver_type(LinearSolverType::Iterative)
            .with_iterative_params(
                PcgParams::new().with_preconditioner(PreconditionerType::BlockJacobi),
            ),
        tight()
            .with_linear_solver_type(LinearSolverType::Iterative)
            .with_iterative_params(SubgraphParams::new())
            .with_ordering(vec![0]),
        tight().with_linear_solver_type(LinearSolverType::ExternalQr),
        tight().with_linear_solver_type(LinearSolverType::ExternalCholesky),
    ];
    for params in families {
        let family = params.linear_solver_type;
        let curve = solve_with(LevenbergMarquardt::new(), Curve { a: 1.0, b: 0.1 }, params)?;
        assert_recovered(&curve);
        assert!(curve.a.is_finite(), "{family}");
    }
    Ok(())
}

#[test]
fn diagonal_damping_converges() -> TestResult {
    let strategy = LevenbergMarquardt::with_params(
        LevenbergMarquardtParams::new()
            .with_diagonal_damping(true)
            .with_initial_lambda(1e-3),
    );
    assert_recovered(&solve_with(strategy, Curve { a: 1.0, b: 0.1 }, tight())?);
    Ok(())
}

#[test]
fn iterative_family_without_parameters_fails_the_run() -> TestResult {
    let problem = ExponentialFit::new(2.0, 0.3);
    let params =
        NonlinearOptimizerParams::new().with_linear_solver_type(LinearSolverType::Iterative);
    let mut optimizer =
        NonlinearOptimizer::gauss_newton(&problem, Curve { a: 1.0, b: 0.1 }, params)?;

    assert!(matches!(optimizer.run(), Err(OptimizerError::Configuration(_))));
    assert_eq!(optimizer.iterations(), 0);
    assert_eq!(optimizer.termination(), None);
    Ok(())
}

#[test]
fn subgraph_without_ordering_reports_the_missing_ordering() -> TestResult {
    let problem = ExponentialFit::new(2.0, 0.3);
    let params = NonlinearOptimizerParams::new()
        .with_linear_solver_type(LinearSolverType::Iterative)
        .with_iterative_params(SubgraphParams::new());
    let mut optimizer =
        NonlinearOptimizer::levenberg_marquardt(&problem, Curve { a: 1.0, b: 0.1 }, params)?;

    match optimizer.optimize_safely() {
        OptimizationOutcome::Failed {
            reason: OptimizerError::Configuration(msg),
            iterations,
        } => {
            assert!(msg.contains("ordering"), "{msg}");
            assert_eq!(iterations, 0);
        }
        other => panic!("expected configuration failure, got {other:?}"),
    }
    Ok(())
}

#[test]
fn failed_run_can_still_yield_empty_values() -> TestResult {
    let problem = ExponentialFit::new(2.0, 0.3);
    let params =
        NonlinearOptimizerParams::new().with_linear_solver_type(LinearSolverType::Iterative);
    let mut optimizer = NonlinearOptimizer::dog_leg(&problem, Curve { a: 1.0, b: 0.1 }, params)?;
    assert_eq!(optimizer.optimize_safely().values_or_empty(), Curve::default());
    Ok(())
}

#[test]
fn unknown_solver_name_is_a_configuration_error() {
    let result = "SUPERNODAL".parse::<LinearSolverType>();
    assert!(matches!(result, Err(OptimizerError::Configuration(_))));
    assert!(
        NonlinearOptimizerParams::new()
            .with_linear_solver_name("SEQUENTIAL_LU")
            .is_err()
    );
}

#[test]
fn cancellation_stops_a_real_run() -> TestResult {
    let problem = ExponentialFit::new(2.0, 0.3);
    let mut optimizer =
        NonlinearOptimizer::levenberg_marquardt(&problem, Curve { a: 1.0, b: 0.1 }, tight())?
            .with_cancellation(|state| state.iterations() >= 1);
    optimizer.run()?;
    assert_eq!(optimizer.iterations(), 1);
    assert_eq!(optimizer.termination(), Some(TerminationReason::Cancelled));
    Ok(())
}

#[test]
fn verbose_runs_match_silent_runs() -> TestResult {
    #[cfg(feature = "logging")]
    graphopt::init_logger_with_level(tracing::Level::DEBUG);

    let silent = solve_with(LevenbergMarquardt::new(), Curve { a: 1.0, b: 0.1 }, tight())?;
    let verbose = solve_with(
        LevenbergMarquardt::new(),
        Curve { a: 1.0, b: 0.1 },
        tight().with_verbosity(Verbosity::Values),
    )?;
    assert_eq!(silent, verbose);
    Ok(())
}

#[test]
fn checker_literal_scenarios() {
    // 100 → 99.9999 is a 1e-6 relative decrease
    assert!(check_convergence(1e-5, 1e-5, 0.0, 100.0, 99.9999, Verbosity::Silent));
    // an increase always stops
    assert!(check_convergence(1e-5, 1e-5, 0.0, 10.0, 11.0, Verbosity::Silent));
    assert!(!check_convergence(1e-5, 1e-5, 0.0, 10.0, 5.0, Verbosity::Silent));
}
