//! Prior factors (unary constraints).

use nalgebra::{DMatrix, DVector};

use super::{Factor, expect_params};
use crate::core::{CoreError, CoreResult};
use crate::manifold::SE2;

/// Prior on a Euclidean variable: `r = x - x_prior`, `J = I`.
///
/// ```
/// use graphopt::factors::{Factor, PriorFactor};
/// use nalgebra::DVector;
///
/// let prior = PriorFactor::new(DVector::from_vec(vec![1.0, 2.0]));
/// let (residual, _) = prior.linearize(&[DVector::from_vec(vec![1.5, 2.3])], false).unwrap();
/// assert!((residual[0] - 0.5).abs() < 1e-10);
/// ```
#[derive(Debug, Clone)]
pub struct PriorFactor {
    pub data: DVector<f64>,
}

impl PriorFactor {
    pub fn new(data: DVector<f64>) -> Self {
        PriorFactor { data }
    }
}

impl Factor for PriorFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        expect_params(params, 1)?;
        if params[0].len() != self.data.len() {
            return Err(CoreError::DimensionMismatch(format!(
                "prior of dimension {} on variable of dimension {}",
                self.data.len(),
                params[0].len()
            ))
            .log());
        }
        let residual = &params[0] - &self.data;
        let jacobian =
            compute_jacobian.then(|| DMatrix::identity(residual.nrows(), residual.nrows()));
        Ok((residual, jacobian))
    }

    fn get_dimension(&self) -> usize {
        self.data.len()
    }
}

/// Prior on a planar pose in local coordinates: `r = Log(prior⁻¹ ∘ x)`.
///
/// The Jacobian is approximated by the identity, exact at `r = 0`.
#[derive(Debug, Clone)]
pub struct Pose2PriorFactor {
    pub prior: SE2,
}

impl Pose2PriorFactor {
    pub fn new(prior: SE2) -> Self {
        Pose2PriorFactor { prior }
    }
}

impl Factor for Pose2PriorFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        expect_params(params, 1)?;
        let pose = SE2::try_from(&params[0])?;
        let r = self.prior.local(&pose);
        let residual = DVector::from_column_slice(r.as_slice());
        let jacobian = compute_jacobian.then(|| DMatrix::identity(SE2::DOF, SE2::DOF));
        Ok((residual, jacobian))
    }

    fn get_dimension(&self) -> usize {
        SE2::DOF
    }
}
