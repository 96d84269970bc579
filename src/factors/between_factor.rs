use nalgebra::{DMatrix, DVector, Matrix3};

use super::{Factor, expect_params};
use crate::core::CoreResult;
use crate::manifold::SE2;

/// Relative pose measurement between two planar poses.
///
/// ```text
/// r = Log(z⁻¹ ∘ Tᵢ⁻¹ ∘ Tⱼ)
/// ```
///
/// With right perturbations `Tᵢ ∘ Exp(δᵢ)`, `Tⱼ ∘ Exp(δⱼ)` the Jacobian blocks are
/// `∂r/∂δᵢ = -Ad(h⁻¹)` and `∂r/∂δⱼ = I` where `h = Tᵢ⁻¹ ∘ Tⱼ`, dropping the right Jacobian
/// of `Log` (exact when the measurement is satisfied). The returned Jacobian is 3×6.
///
/// ```
/// use graphopt::factors::{BetweenFactor, Factor};
/// use graphopt::manifold::SE2;
/// use nalgebra::DVector;
///
/// let between = BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.1));
/// let pose_i = DVector::from_vec(vec![0.0, 0.0, 0.0]);
/// let pose_j = DVector::from_vec(vec![0.95, 0.05, 0.12]);
/// let (residual, jacobian) = between.linearize(&[pose_i, pose_j], true).unwrap();
/// assert_eq!(residual.len(), 3);
/// assert_eq!(jacobian.map(|j| j.shape()), Some((3, 6)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BetweenFactor {
    pub relative_pose: SE2,
}

impl BetweenFactor {
    pub fn new(relative_pose: SE2) -> Self {
        Self { relative_pose }
    }
}

impl Factor for BetweenFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        expect_params(params, 2)?;
        let pose_i = SE2::try_from(&params[0])?;
        let pose_j = SE2::try_from(&params[1])?;

        let predicted = pose_i.between(&pose_j);
        let r = self.relative_pose.local(&predicted);
        let residual = DVector::from_column_slice(r.as_slice());

        let jacobian = compute_jacobian.then(|| {
            let jacobian_i = -predicted.inverse().adjoint();
            let mut jacobian = DMatrix::zeros(SE2::DOF, 2 * SE2::DOF);
            jacobian.view_mut((0, 0), (3, 3)).copy_from(&jacobian_i);
            jacobian
                .view_mut((0, 3), (3, 3))
                .copy_from(&Matrix3::<f64>::identity());
            jacobian
        });
        Ok((residual, jacobian))
    }

    fn get_dimension(&self) -> usize {
        SE2::DOF
    }
}
