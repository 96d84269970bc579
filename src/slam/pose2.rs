//! Planar pose graphs.
//!
//! ```
//! use graphopt::core::noise_model::DiagonalNoise;
//! use graphopt::manifold::SE2;
//! use graphopt::optimizer::{NonlinearOptimizer, NonlinearOptimizerParams};
//! use graphopt::slam::pose2::{PoseGraph2D, circle};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let truth = circle(4, 1.0);
//! let mut graph = PoseGraph2D::new();
//! graph.add_hard_constraint(0, truth.pose2(0)?.clone())?;
//! for i in 0..4 {
//!     let j = (i + 1) % 4;
//!     let z = truth.pose2(i)?.between(truth.pose2(j)?);
//!     graph.add_between(i, j, z, DiagonalNoise::isotropic(3, 0.1)?)?;
//! }
//!
//! let mut optimizer = NonlinearOptimizer::levenberg_marquardt(
//!     &graph,
//!     truth.clone(),
//!     NonlinearOptimizerParams::new(),
//! )?;
//! optimizer.run()?;
//! assert!(optimizer.error() < 1e-9);
//! # Ok(())
//! # }
//! ```

use std::f64::consts::{FRAC_PI_2, PI};

use crate::core::factor_graph::FactorGraph;
use crate::core::noise_model::DiagonalNoise;
use crate::core::problem::NonlinearProblem;
use crate::core::values::Values;
use crate::core::{CoreResult, Key};
use crate::factors::{BetweenFactor, Pose2PriorFactor};
use crate::linalg::{LinearSystem, VectorValues};
use crate::manifold::SE2;

/// Standard deviation of the stiff prior that stands in for a hard constraint.
pub const HARD_CONSTRAINT_SIGMA: f64 = 1e-5;

/// Factor graph over SE(2) poses.
#[derive(Default)]
pub struct PoseGraph2D {
    graph: FactorGraph,
}

impl PoseGraph2D {
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft prior on the pose at `key`.
    pub fn add_prior(&mut self, key: Key, pose: SE2, noise: DiagonalNoise) -> CoreResult<usize> {
        self.graph
            .add_factor(&[key], Box::new(Pose2PriorFactor::new(pose)), Some(noise))
    }

    /// Odometry or loop closure `z = xᵢ⁻¹ ∘ xⱼ`.
    pub fn add_between(
        &mut self,
        i: Key,
        j: Key,
        measured: SE2,
        noise: DiagonalNoise,
    ) -> CoreResult<usize> {
        self.graph
            .add_factor(&[i, j], Box::new(BetweenFactor::new(measured)), Some(noise))
    }

    /// Pin the pose at `key` with a prior of [`HARD_CONSTRAINT_SIGMA`].
    pub fn add_hard_constraint(&mut self, key: Key, pose: SE2) -> CoreResult<usize> {
        let noise = DiagonalNoise::isotropic(SE2::DOF, HARD_CONSTRAINT_SIGMA)?;
        self.add_prior(key, pose, noise)
    }

    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}

impl NonlinearProblem for PoseGraph2D {
    type Values = Values;

    fn error(&self, values: &Values) -> CoreResult<f64> {
        self.graph.error(values)
    }

    fn linearize(&self, values: &Values) -> CoreResult<LinearSystem> {
        self.graph.linearize(values)
    }

    fn retract(&self, values: &Values, step: &VectorValues) -> CoreResult<Values> {
        self.graph.retract(values, step)
    }

    fn keys(&self) -> Vec<Key> {
        self.graph.keys()
    }
}

/// `n` poses evenly spaced on a circle of radius `radius`, each heading along the tangent.
///
/// Pose `i` sits at angle `θ = 2πi/n`: `(r·cos θ, r·sin θ, π/2 + θ)`.
pub fn circle(n: usize, radius: f64) -> Values {
    let mut values = Values::new();
    let step = if n == 0 { 0.0 } else { 2.0 * PI / n as f64 };
    for i in 0..n {
        let theta = step * i as f64;
        values.insert(
            i,
            SE2::from_xy_angle(radius * theta.cos(), radius * theta.sin(), FRAC_PI_2 + theta),
        );
    }
    values
}
