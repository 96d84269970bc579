//! Sparse direct elimination over the whole block structure.
//!
//! Columns are laid out in the elimination ordering before factorization, so an explicit
//! ordering controls the column permutation handed to faer.

use faer::{
    Mat,
    linalg::solvers::SolveLstsqCore,
    sparse::SparseColMat,
    sparse::linalg::solvers::{Qr, SymbolicQr},
};

use crate::linalg::{
    ColumnLayout, EliminationFunction, LinAlgError, LinAlgResult, LinearSystem, Ordering,
    SparseCholeskySolver, SparseLinearSolver, VectorValues,
};

/// Solve `min ½‖J·δ + r‖²` with a sparse factorization.
///
/// `cholesky` carries the cached symbolic factorization between iterations.
pub fn solve(
    system: &LinearSystem,
    ordering: &Ordering,
    elimination: EliminationFunction,
    cholesky: &mut SparseCholeskySolver,
) -> LinAlgResult<VectorValues> {
    let layout = ColumnLayout::new(system, ordering)?;
    let (jacobian, residual) = system.assemble_sparse(&layout)?;
    let dx = match elimination {
        EliminationFunction::Cholesky => cholesky.solve_normal_equation(&residual, &jacobian)?,
        EliminationFunction::Qr => least_squares_qr(&jacobian, &residual)?,
    };
    ensure_finite(&dx)?;
    Ok(layout.scatter_mat(&dx))
}

/// Least-squares solve of `J·dx = -r` by sparse QR of `J` itself.
fn least_squares_qr(
    jacobian: &SparseColMat<usize, f64>,
    residual: &Mat<f64>,
) -> LinAlgResult<Mat<f64>> {
    let (nrows, ncols) = (jacobian.nrows(), jacobian.ncols());
    if nrows < ncols {
        return Err(LinAlgError::FactorizationFailed(format!(
            "underdetermined system: {nrows} rows for {ncols} unknowns"
        ))
        .log());
    }
    let symbolic = SymbolicQr::try_new(jacobian.symbolic()).map_err(|e| {
        LinAlgError::FactorizationFailed("symbolic QR of J failed".to_string()).log_with_source(e)
    })?;
    let qr = Qr::try_new_with_symbolic(symbolic, jacobian.as_ref()).map_err(|e| {
        LinAlgError::FactorizationFailed("sparse QR of J failed".to_string()).log_with_source(e)
    })?;
    let mut rhs = -residual;
    qr.solve_lstsq_in_place_with_conj(faer::Conj::No, rhs.as_mut());
    Ok(rhs.as_ref().submatrix(0, 0, ncols, 1).to_owned())
}

pub(crate) fn ensure_finite(dx: &Mat<f64>) -> LinAlgResult<()> {
    if (0..dx.nrows()).all(|i| dx[(i, 0)].is_finite()) {
        Ok(())
    } else {
        Err(LinAlgError::SingularMatrix.log())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::linear_system::tests::chain_system;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// Normal equations of the chain system: [[2,-1],[-1,2]] x = [-1, 4.5].
    fn expected() -> (f64, f64) {
        let b = [-1.0, 4.5];
        ((2.0 * b[0] + b[1]) / 3.0, (b[0] + 2.0 * b[1]) / 3.0)
    }

    #[test]
    fn test_cholesky_and_qr_agree() -> TestResult {
        let system = chain_system()?;
        let (x0, x1) = expected();
        for elimination in [EliminationFunction::Cholesky, EliminationFunction::Qr] {
            let mut cholesky = SparseCholeskySolver::new();
            let dx = solve(&system, &Ordering::new(vec![1, 0]), elimination, &mut cholesky)?;
            let d0 = dx.get(0).ok_or("missing key 0")?[0];
            let d1 = dx.get(1).ok_or("missing key 1")?[0];
            assert!((d0 - x0).abs() < 1e-9, "{elimination}: {d0} vs {x0}");
            assert!((d1 - x1).abs() < 1e-9, "{elimination}: {d1} vs {x1}");
        }
        Ok(())
    }

    #[test]
    fn test_rejects_incomplete_ordering() -> TestResult {
        let system = chain_system()?;
        let mut cholesky = SparseCholeskySolver::new();
        let result = solve(
            &system,
            &Ordering::new(vec![0]),
            EliminationFunction::Cholesky,
            &mut cholesky,
        );
        assert!(matches!(result, Err(LinAlgError::InvalidOrdering(_))));
        Ok(())
    }
}
