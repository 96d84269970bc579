use faer::{
    Mat,
    linalg::solvers::Solve,
    sparse::SparseColMat,
    sparse::linalg::solvers::{Qr, SymbolicQr},
};

use crate::linalg::{
    LinAlgError, LinAlgResult, SparseLinearSolver, normal_equations, same_pattern,
};

/// Sparse QR solver applied to the square normal equations `JᵀJ·dx = -Jᵀr`.
///
/// Slower than [`SparseCholeskySolver`](super::SparseCholeskySolver) but tolerates
/// semi-definite Hessians that make the Cholesky pivot fail.
#[derive(Debug, Clone, Default)]
pub struct SparseQRSolver {
    symbolic_factorization: Option<SymbolicQr<usize>>,
    hessian: Option<SparseColMat<usize, f64>>,
    gradient: Option<Mat<f64>>,
}

impl SparseQRSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_symbolic(&self) -> bool {
        self.symbolic_factorization.is_some()
    }
}

impl SparseLinearSolver for SparseQRSolver {
    fn solve_normal_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<Mat<f64>> {
        let (hessian, gradient) = normal_equations(residuals, jacobians)?;

        if let Some(previous) = &self.hessian
            && !same_pattern(previous, &hessian)
        {
            self.symbolic_factorization = None;
        }

        let symbolic = match &self.symbolic_factorization {
            Some(cached) => cached.clone(),
            None => {
                let fresh = SymbolicQr::try_new(hessian.symbolic()).map_err(|e| {
                    LinAlgError::FactorizationFailed("symbolic QR of JᵀJ failed".to_string())
                        .log_with_source(e)
                })?;
                self.symbolic_factorization = Some(fresh.clone());
                fresh
            }
        };

        let factor = match Qr::try_new_with_symbolic(symbolic, hessian.as_ref()) {
            Ok(factor) => factor,
            Err(e) => {
                // the cached analysis is only trusted once paired with a stored Hessian
                self.symbolic_factorization = None;
                return Err(LinAlgError::SingularMatrix.log_with_source(e));
            }
        };

        let dx = factor.solve(-&gradient);
        if (0..dx.nrows()).any(|i| !dx[(i, 0)].is_finite()) {
            return Err(LinAlgError::SingularMatrix.log());
        }
        self.hessian = Some(hessian);
        self.gradient = Some(gradient);

        Ok(dx)
    }

    fn get_hessian(&self) -> Option<&SparseColMat<usize, f64>> {
        self.hessian.as_ref()
    }

    fn get_gradient(&self) -> Option<&Mat<f64>> {
        self.gradient.as_ref()
    }

    fn reset(&mut self) {
        self.symbolic_factorization = None;
        self.hessian = None;
        self.gradient = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::Triplet;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_known_solution() -> TestResult {
        let mut solver = SparseQRSolver::new();
        // J = diag(2, 4), r = [2, -4] => dx = [-1, 1]
        let triplets = vec![Triplet::new(0, 0, 2.0), Triplet::new(1, 1, 4.0)];
        let jacobian = SparseColMat::try_new_from_triplets(2, 2, &triplets)?;
        let residuals = Mat::from_fn(2, 1, |i, _| [2.0, -4.0][i]);

        let dx = solver.solve_normal_equation(&residuals, &jacobian)?;
        assert!((dx[(0, 0)] + 1.0).abs() < 1e-10);
        assert!((dx[(1, 0)] - 1.0).abs() < 1e-10);
        assert!(solver.has_symbolic());

        let again = solver.solve_normal_equation(&residuals, &jacobian)?;
        assert!((again[(1, 0)] - 1.0).abs() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_reset_clears_cache() -> TestResult {
        let mut solver = SparseQRSolver::new();
        let triplets = vec![Triplet::new(0, 0, 1.0)];
        let jacobian = SparseColMat::try_new_from_triplets(1, 1, &triplets)?;
        solver.solve_normal_equation(&Mat::from_fn(1, 1, |_, _| 3.0), &jacobian)?;
        solver.reset();
        assert!(!solver.has_symbolic());
        Ok(())
    }
}
