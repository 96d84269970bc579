//! Dense elimination in ordering order.
//!
//! The system is flattened with columns in elimination order and factorized with nalgebra.
//! Suitable for small problems and as a reference for the sparse back ends.

use nalgebra::{DMatrix, DVector};

use crate::linalg::{
    ColumnLayout, EliminationFunction, LinAlgError, LinAlgResult, LinearSystem, Ordering,
    VectorValues,
};

pub fn solve(
    system: &LinearSystem,
    ordering: &Ordering,
    elimination: EliminationFunction,
) -> LinAlgResult<VectorValues> {
    let layout = ColumnLayout::new(system, ordering)?;
    let (jacobian, residual) = system.assemble_dense(&layout)?;
    let dx = match elimination {
        EliminationFunction::Cholesky => eliminate_cholesky(&jacobian, &residual)?,
        EliminationFunction::Qr => eliminate_qr(jacobian, &residual)?,
    };
    if dx.iter().any(|v| !v.is_finite()) {
        return Err(LinAlgError::SingularMatrix.log());
    }
    Ok(layout.scatter(&dx))
}

fn eliminate_cholesky(
    jacobian: &DMatrix<f64>,
    residual: &DVector<f64>,
) -> LinAlgResult<DVector<f64>> {
    let hessian = jacobian.transpose() * jacobian;
    let gradient = jacobian.transpose() * residual;
    let cholesky = hessian.cholesky().ok_or_else(|| LinAlgError::SingularMatrix.log())?;
    Ok(cholesky.solve(&(-gradient)))
}

fn eliminate_qr(jacobian: DMatrix<f64>, residual: &DVector<f64>) -> LinAlgResult<DVector<f64>> {
    let (nrows, ncols) = jacobian.shape();
    if nrows < ncols {
        return Err(LinAlgError::FactorizationFailed(format!(
            "underdetermined system: {nrows} rows for {ncols} unknowns"
        ))
        .log());
    }
    let qr = jacobian.qr();
    let rhs = -(qr.q().transpose() * residual);
    qr.r()
        .solve_upper_triangular(&rhs)
        .ok_or_else(|| LinAlgError::SingularMatrix.log())
}
