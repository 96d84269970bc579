//! Ready-made problem builders on top of [`FactorGraph`](crate::core::factor_graph::FactorGraph).

pub mod pose2;

pub use pose2::{HARD_CONSTRAINT_SIGMA, PoseGraph2D, circle};
