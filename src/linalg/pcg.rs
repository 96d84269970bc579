//! Matrix-free preconditioned conjugate gradients on the normal equations.
//!
//! Solves `JᵀJ·δ = -Jᵀr` using only Jacobian-vector products from the
//! [`LinearSystem`] blocks; the Hessian is never formed.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::DMatrix;
use tracing::debug;

use crate::core::Key;
use crate::linalg::{LinAlgError, LinAlgResult, LinearSystem, VectorValues};

/// Preconditioner applied at every CG iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionerType {
    Identity,
    /// Inverse of the Hessian diagonal
    #[default]
    Jacobi,
    /// Inverse of each variable's diagonal Hessian block
    BlockJacobi,
}

impl fmt::Display for PreconditionerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreconditionerType::Identity => write!(f, "IDENTITY"),
            PreconditionerType::Jacobi => write!(f, "JACOBI"),
            PreconditionerType::BlockJacobi => write!(f, "BLOCK_JACOBI"),
        }
    }
}

/// Conjugate gradient configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PcgParams {
    pub max_iterations: usize,
    /// Stop when `‖r‖ ≤ epsilon_rel · ‖r₀‖`
    pub epsilon_rel: f64,
    /// Stop when `‖r‖ ≤ epsilon_abs`
    pub epsilon_abs: f64,
    pub preconditioner: PreconditionerType,
}

impl Default for PcgParams {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            epsilon_rel: 1e-8,
            epsilon_abs: 1e-12,
            preconditioner: PreconditionerType::Jacobi,
        }
    }
}

impl PcgParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerances(mut self, epsilon_rel: f64, epsilon_abs: f64) -> Self {
        self.epsilon_rel = epsilon_rel;
        self.epsilon_abs = epsilon_abs;
        self
    }

    pub fn with_preconditioner(mut self, preconditioner: PreconditionerType) -> Self {
        self.preconditioner = preconditioner;
        self
    }
}

/// Approximate inverse `z = M⁻¹ r`.
pub trait Preconditioner {
    fn apply(&self, r: &VectorValues) -> VectorValues;
}

pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn apply(&self, r: &VectorValues) -> VectorValues {
        r.clone()
    }
}

pub struct JacobiPreconditioner {
    inverse_diagonal: VectorValues,
}

impl JacobiPreconditioner {
    pub fn new(system: &LinearSystem) -> LinAlgResult<Self> {
        let mut inverse_diagonal = VectorValues::new();
        for (key, d) in system.hessian_diagonal().iter() {
            if d.iter().any(|&v| v <= 0.0) {
                return Err(LinAlgError::FactorizationFailed(format!(
                    "Jacobi preconditioner: zero Hessian diagonal for key {key}"
                ))
                .log());
            }
            inverse_diagonal.insert(key, d.map(|v| 1.0 / v));
        }
        Ok(JacobiPreconditioner { inverse_diagonal })
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&self, r: &VectorValues) -> VectorValues {
        r.iter()
            .map(|(key, v)| match self.inverse_diagonal.get(key) {
                Some(d) => (key, v.component_mul(d)),
                None => (key, v.clone()),
            })
            .collect()
    }
}

pub struct BlockJacobiPreconditioner {
    inverse_blocks: BTreeMap<Key, DMatrix<f64>>,
}

impl BlockJacobiPreconditioner {
    pub fn new(system: &LinearSystem) -> LinAlgResult<Self> {
        let mut inverse_blocks = BTreeMap::new();
        for (key, block) in system.block_diagonal() {
            let inverse = block
                .cholesky()
                .map(|c| c.inverse())
                .ok_or_else(|| {
                    LinAlgError::FactorizationFailed(format!(
                        "Block-Jacobi preconditioner: block for key {key} is not positive definite"
                    ))
                    .log()
                })?;
            inverse_blocks.insert(key, inverse);
        }
        Ok(BlockJacobiPreconditioner { inverse_blocks })
    }
}

impl Preconditioner for BlockJacobiPreconditioner {
    fn apply(&self, r: &VectorValues) -> VectorValues {
        r.iter()
            .map(|(key, v)| match self.inverse_blocks.get(&key) {
                Some(inverse) => (key, inverse * v),
                None => (key, v.clone()),
            })
            .collect()
    }
}

pub fn build_preconditioner(
    kind: PreconditionerType,
    system: &LinearSystem,
) -> LinAlgResult<Box<dyn Preconditioner>> {
    Ok(match kind {
        PreconditionerType::Identity => Box::new(IdentityPreconditioner),
        PreconditionerType::Jacobi => Box::new(JacobiPreconditioner::new(system)?),
        PreconditionerType::BlockJacobi => Box::new(BlockJacobiPreconditioner::new(system)?),
    })
}

/// Solve the system with the preconditioner selected in `params`.
pub fn solve(system: &LinearSystem, params: &PcgParams) -> LinAlgResult<VectorValues> {
    let preconditioner = build_preconditioner(params.preconditioner, system)?;
    conjugate_gradient(system, preconditioner.as_ref(), params)
}

/// Preconditioned CG starting from zero.
///
/// Hitting `max_iterations` is not an error; the current iterate is returned.
pub fn conjugate_gradient(
    system: &LinearSystem,
    preconditioner: &dyn Preconditioner,
    params: &PcgParams,
) -> LinAlgResult<VectorValues> {
    let mut x = VectorValues::zero(system.dims());
    let mut r = system.gradient().neg();
    let threshold = (params.epsilon_rel * r.norm()).max(params.epsilon_abs);
    if r.norm() <= threshold {
        return Ok(x);
    }

    let mut z = preconditioner.apply(&r);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for iteration in 0..params.max_iterations {
        let ap = system.hessian_vector(&p);
        let curvature = p.dot(&ap);
        if !(curvature > 0.0 && curvature.is_finite()) {
            return Err(LinAlgError::SingularMatrix.log());
        }

        let alpha = rz / curvature;
        x = x.axpy(alpha, &p);
        r = r.axpy(-alpha, &ap);

        let residual_norm = r.norm();
        if residual_norm <= threshold {
            debug!(
                "CG converged after {} iterations, residual {:.3e}",
                iteration + 1,
                residual_norm
            );
            return Ok(x);
        }

        z = preconditioner.apply(&r);
        let rz_next = r.dot(&z);
        p = z.axpy(rz_next / rz, &p);
        rz = rz_next;
    }

    debug!(
        "CG stopped at max iterations ({}), residual {:.3e}",
        params.max_iterations,
        r.norm()
    );
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::linear_system::tests::chain_system;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_every_preconditioner_reaches_exact_solution() -> TestResult {
        let system = chain_system()?;
        for preconditioner in [
            PreconditionerType::Identity,
            PreconditionerType::Jacobi,
            PreconditionerType::BlockJacobi,
        ] {
            let params = PcgParams::new().with_preconditioner(preconditioner);
            let dx = solve(&system, &params)?;
            let d0 = dx.get(0).ok_or("missing key 0")?[0];
            let d1 = dx.get(1).ok_or("missing key 1")?[0];
            assert!((d0 - 2.5 / 3.0).abs() < 1e-8, "{preconditioner}");
            assert!((d1 - 8.0 / 3.0).abs() < 1e-8, "{preconditioner}");
        }
        Ok(())
    }

    #[test]
    fn test_iteration_cap_returns_partial_solution() -> TestResult {
        let system = chain_system()?;
        let params = PcgParams::new()
            .with_preconditioner(PreconditionerType::Identity)
            .with_max_iterations(1);
        let dx = solve(&system, &params)?;
        // One steepest-descent step decreases the quadratic model but is not exact
        let zero = VectorValues::zero(system.dims());
        assert!(system.error(&dx) < system.error(&zero));
        assert!((dx.get(1).ok_or("missing key 1")?[0] - 8.0 / 3.0).abs() > 1e-6);
        Ok(())
    }

    #[test]
    fn test_zero_gradient_returns_zero_step() -> TestResult {
        let system = chain_system()?.damped(1.0, None)?;
        let consistent = {
            let mut s = LinearSystem::new();
            for f in system.factors() {
                s.push(crate::linalg::JacobianFactor::new(
                    f.keys().to_vec(),
                    f.blocks().to_vec(),
                    nalgebra::DVector::zeros(f.rows()),
                )?)?;
            }
            s
        };
        let dx = solve(&consistent, &PcgParams::default())?;
        assert_eq!(dx.norm(), 0.0);
        Ok(())
    }
}
