//! Diagonal Gaussian noise models.
//!
//! A factor with noise sigmas `σ` contributes `½‖diag(1/σ)·r‖²` to the total error; the
//! same weights scale its Jacobian rows.

use nalgebra::{DMatrix, DVector};

use crate::core::{CoreError, CoreResult};

#[derive(Clone, Debug, PartialEq)]
pub struct DiagonalNoise {
    sigmas: DVector<f64>,
    inverse_sigmas: DVector<f64>,
}

impl DiagonalNoise {
    /// Noise model from per-component standard deviations. All sigmas must be positive.
    pub fn from_sigmas(sigmas: DVector<f64>) -> CoreResult<Self> {
        if sigmas.is_empty() || sigmas.iter().any(|&s| !(s > 0.0 && s.is_finite())) {
            return Err(CoreError::InvalidInput(format!(
                "noise sigmas must be positive and finite, got {:?}",
                sigmas.as_slice()
            ))
            .log());
        }
        let inverse_sigmas = sigmas.map(|s| 1.0 / s);
        Ok(DiagonalNoise {
            sigmas,
            inverse_sigmas,
        })
    }

    pub fn isotropic(dim: usize, sigma: f64) -> CoreResult<Self> {
        Self::from_sigmas(DVector::from_element(dim, sigma))
    }

    /// Unit sigmas: whitening is the identity.
    pub fn unit(dim: usize) -> CoreResult<Self> {
        Self::isotropic(dim, 1.0)
    }

    pub fn dim(&self) -> usize {
        self.sigmas.len()
    }

    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    pub fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        residual.component_mul(&self.inverse_sigmas)
    }

    pub fn whiten_jacobian(&self, jacobian: &DMatrix<f64>) -> DMatrix<f64> {
        let mut whitened = jacobian.clone();
        for (mut row, &w) in whitened.row_iter_mut().zip(self.inverse_sigmas.iter()) {
            row *= w;
        }
        whitened
    }
}
