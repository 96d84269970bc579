//! Planar pose graph optimization across strategies and linear solver families.

use graphopt::core::noise_model::DiagonalNoise;
use graphopt::linalg::pcg::{PcgParams, PreconditionerType};
use graphopt::linalg::subgraph::SubgraphParams;
use graphopt::slam::{PoseGraph2D, circle};
use graphopt::{
    EliminationFunction, LinearSolverType, NonlinearOptimizer, NonlinearOptimizerParams,
    NonlinearProblem, Ordering, OrderingType, SE2, TerminationReason, Values,
};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const POSES: usize = 8;

/// Circle with exact odometry, one loop closure and the first pose pinned.
fn circle_graph() -> Result<(PoseGraph2D, Values), Box<dyn std::error::Error>> {
    let truth = circle(POSES, 5.0);
    let mut graph = PoseGraph2D::new();
    graph.add_hard_constraint(0, truth.pose2(0)?.clone())?;
    let noise = DiagonalNoise::from_sigmas(nalgebra::DVector::from_vec(vec![0.1, 0.1, 0.05]))?;
    for i in 0..POSES {
        let j = (i + 1) % POSES;
        let z = truth.pose2(i)?.between(truth.pose2(j)?);
        graph.add_between(i, j, z, noise.clone())?;
    }
    Ok((graph, truth))
}

fn perturbed(truth: &Values, seed: u64) -> Result<Values, Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut initial = Values::new();
    for key in truth.keys() {
        let pose = truth.pose2(key)?;
        let delta = if key == 0 {
            Vector3::zeros()
        } else {
            Vector3::new(
                rng.random_range(-0.2..0.2),
                rng.random_range(-0.2..0.2),
                rng.random_range(-0.1..0.1),
            )
        };
        initial.insert(key, pose.retract(&delta));
    }
    Ok(initial)
}

fn max_pose_error(truth: &Values, estimate: &Values) -> Result<f64, Box<dyn std::error::Error>> {
    let mut worst = 0.0_f64;
    for key in truth.keys() {
        worst = worst.max(truth.pose2(key)?.local(estimate.pose2(key)?).norm());
    }
    Ok(worst)
}

fn families(graph: &PoseGraph2D) -> Vec<NonlinearOptimizerParams> {
    let base = NonlinearOptimizerParams::new()
        .with_relative_error_tol(1e-10)
        .with_absolute_error_tol(1e-12);
    vec![
        base.clone(),
        base.clone().with_elimination_function(EliminationFunction::Qr),
        base.clone().with_ordering_type(OrderingType::Natural),
        base.clone()
            .with_linear_solver_type(LinearSolverType::Sequential)
            .with_ordering(graph.keys().into_iter().rev().collect::<Vec<_>>()),
        base.clone()
            .with_linear_solver_type(LinearSolverType::Sequential)
            .with_elimination_function(EliminationFunction::Qr),
        base.clone()
            .with_linear_solver_type(LinearSolverType::Iterative)
            .with_iterative_params(
                PcgParams::new()
                    .with_max_iterations(2000)
                    .with_preconditioner(PreconditionerType::BlockJacobi),
            ),
        base.clone()
            .with_linear_solver_type(LinearSolverType::Iterative)
            .with_iterative_params(SubgraphParams::new())
            .with_ordering(Ordering::natural(graph.keys())),
        base.clone().with_linear_solver_type(LinearSolverType::ExternalCholesky),
        base.with_linear_solver_type(LinearSolverType::ExternalQr),
    ]
}

#[test]
fn levenberg_marquardt_with_every_family() -> TestResult {
    let (graph, truth) = circle_graph()?;
    let initial = perturbed(&truth, 42)?;
    for params in families(&graph) {
        let family = params.linear_solver_type;
        let mut optimizer =
            NonlinearOptimizer::levenberg_marquardt(&graph, initial.clone(), params)?;
        optimizer.run()?;
        let worst = max_pose_error(&truth, optimizer.values())?;
        assert!(worst < 1e-4, "{family}: worst pose error {worst}");
    }
    Ok(())
}

#[test]
fn gauss_newton_and_dog_leg_agree() -> TestResult {
    let (graph, truth) = circle_graph()?;
    let initial = perturbed(&truth, 7)?;
    let params = NonlinearOptimizerParams::new()
        .with_relative_error_tol(1e-10)
        .with_absolute_error_tol(1e-12);

    let mut gn = NonlinearOptimizer::gauss_newton(&graph, initial.clone(), params.clone())?;
    gn.run()?;
    let mut dl = NonlinearOptimizer::dog_leg(&graph, initial, params)?;
    dl.run()?;

    assert!(max_pose_error(&truth, gn.values())? < 1e-4);
    assert!(max_pose_error(&truth, dl.values())? < 1e-4);
    assert!(max_pose_error(gn.values(), dl.values())? < 1e-4);
    Ok(())
}

#[test]
fn error_decreases_monotonically_with_levenberg_marquardt() -> TestResult {
    let (graph, truth) = circle_graph()?;
    let initial = perturbed(&truth, 3)?;
    let initial_error = graph.error(&initial)?;

    let params = NonlinearOptimizerParams::new().with_max_iterations(1);
    let mut optimizer = NonlinearOptimizer::levenberg_marquardt(&graph, initial, params)?;
    let mut previous = initial_error;
    for _ in 0..5 {
        optimizer.iterate()?;
        assert!(optimizer.error() <= previous);
        previous = optimizer.error();
    }
    assert_eq!(optimizer.iterations(), 5);
    assert!(optimizer.error() < initial_error);
    Ok(())
}

#[test]
fn starting_at_the_solution_needs_no_iteration() -> TestResult {
    let (graph, truth) = circle_graph()?;
    let params = NonlinearOptimizerParams::new().with_error_tol(1e-12);
    let mut optimizer = NonlinearOptimizer::dog_leg(&graph, truth.clone(), params)?;
    optimizer.run()?;
    assert_eq!(optimizer.iterations(), 0);
    assert_eq!(optimizer.termination(), Some(TerminationReason::AlreadyConverged));
    Ok(())
}

#[test]
fn max_iterations_bounds_the_run() -> TestResult {
    let (graph, truth) = circle_graph()?;
    let initial = perturbed(&truth, 11)?;
    let params = NonlinearOptimizerParams::new()
        .with_max_iterations(2)
        .with_relative_error_tol(0.0)
        .with_absolute_error_tol(-1.0);
    let mut optimizer = NonlinearOptimizer::levenberg_marquardt(&graph, initial, params)?;
    optimizer.run()?;
    assert_eq!(optimizer.iterations(), 2);
    assert_eq!(optimizer.termination(), Some(TerminationReason::MaxIterationsReached));
    Ok(())
}

#[test]
fn loop_closure_pulls_drifted_chain_back() -> TestResult {
    // odometry slightly too long; the loop closure spreads the error
    let truth = circle(POSES, 5.0);
    let mut graph = PoseGraph2D::new();
    graph.add_hard_constraint(0, truth.pose2(0)?.clone())?;
    let noise = DiagonalNoise::isotropic(3, 0.1)?;
    for i in 0..POSES - 1 {
        let z = truth.pose2(i)?.between(truth.pose2(i + 1)?);
        let long = SE2::from_xy_angle(z.x() * 1.02, z.y() * 1.02, z.angle());
        graph.add_between(i, i + 1, long, noise.clone())?;
    }
    let closure = truth.pose2(POSES - 1)?.between(truth.pose2(0)?);
    graph.add_between(POSES - 1, 0, closure, DiagonalNoise::isotropic(3, 0.01)?)?;

    let mut optimizer = NonlinearOptimizer::levenberg_marquardt(
        &graph,
        truth.clone(),
        NonlinearOptimizerParams::new(),
    )?;
    let initial_error = optimizer.error();
    optimizer.run()?;
    assert!(optimizer.error() < initial_error);
    assert!(max_pose_error(&truth, optimizer.values())? < 0.5);
    Ok(())
}

#[test]
fn chain_seeded_at_identity_converges() -> TestResult {
    let steps = [
        SE2::from_xy_angle(1.0, 0.0, 0.3),
        SE2::from_xy_angle(0.8, 0.2, -0.2),
        SE2::from_xy_angle(1.2, -0.1, 0.5),
    ];
    let mut graph = PoseGraph2D::new();
    graph.add_hard_constraint(0, SE2::identity())?;
    let mut truth = Values::new();
    let mut initial = Values::new();
    let mut pose = SE2::identity();
    truth.insert(0, pose.clone());
    initial.insert(0, SE2::identity());
    let noise = DiagonalNoise::isotropic(3, 0.1)?;
    for (i, step) in steps.iter().enumerate() {
        graph.add_between(i, i + 1, step.clone(), noise.clone())?;
        pose = pose.compose(step);
        truth.insert(i + 1, pose.clone());
        initial.insert(i + 1, SE2::identity());
    }

    let base = NonlinearOptimizerParams::new()
        .with_relative_error_tol(1e-12)
        .with_absolute_error_tol(1e-14);
    for params in [
        base.clone(),
        base.clone().with_linear_solver_type(LinearSolverType::ExternalCholesky),
        base.with_linear_solver_type(LinearSolverType::ExternalQr),
    ] {
        let family = params.linear_solver_type;
        let mut optimizer =
            NonlinearOptimizer::levenberg_marquardt(&graph, initial.clone(), params)?;
        assert!(optimizer.error().is_finite());
        optimizer.run()?;
        let worst = max_pose_error(&truth, optimizer.values())?;
        assert!(worst < 1e-6, "{family}: worst pose error {worst}");
    }
    Ok(())
}
