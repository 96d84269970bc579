use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::SparseColMat,
    sparse::linalg::solvers::{Llt, SymbolicLlt},
};

use crate::linalg::{
    LinAlgError, LinAlgResult, SparseLinearSolver, normal_equations, same_pattern,
};

/// Sparse Cholesky solver for the normal equations `JᵀJ·dx = -Jᵀr`.
///
/// The symbolic factorization is computed on the first solve and reused afterwards; call
/// [`SparseLinearSolver::reset`] when the sparsity pattern of `J` changes.
#[derive(Debug, Clone, Default)]
pub struct SparseCholeskySolver {
    symbolic_factorization: Option<SymbolicLlt<usize>>,
    hessian: Option<SparseColMat<usize, f64>>,
    gradient: Option<Mat<f64>>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a symbolic factorization is cached.
    pub fn has_symbolic(&self) -> bool {
        self.symbolic_factorization.is_some()
    }
}

impl SparseLinearSolver for SparseCholeskySolver {
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
            // reference counted
            Some(cached) => cached.clone(),
            None => {
                let fresh = SymbolicLlt::try_new(hessian.symbolic(), Side::Lower).map_err(|e| {
                    LinAlgError::FactorizationFailed(
                        "symbolic analysis of JᵀJ failed".to_string(),
                    )
                    .log_with_source(e)
                })?;
                self.symbolic_factorization = Some(fresh.clone());
                fresh
            }
        };

        let factor = match Llt::try_new_with_symbolic(symbolic, hessian.as_ref(), Side::Lower) {
            Ok(factor) => factor,
            Err(e) => {
                // the cached analysis is only trusted once paired with a stored Hessian
                self.symbolic_factorization = None;
                return Err(LinAlgError::SingularMatrix.log_with_source(e));
            }
        };

        let dx = factor.solve(-&gradient);
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
