//! Routing of a linearized sub-problem to one linear solver family.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::debug;

use crate::linalg::{
    ColumnLayout, LinearSystem, Ordering, SparseCholeskySolver, SparseLinearSolver,
    SparseQRSolver, VectorValues, multifrontal, pcg, sequential, subgraph,
};
use crate::optimizer::params::{IterativeParams, LinearSolverType, NonlinearOptimizerParams};
use crate::optimizer::{OptimizerError, OptimizerResult};

/// Solves `min ½‖J·δ + r‖²` with the family named by the parameters.
///
/// Holds the sparse solvers so their symbolic factorizations survive across iterations. The
/// caches are dropped whenever the system structure, the ordering or the family changes.
#[derive(Debug, Default)]
pub struct LinearSolveDispatcher {
    cholesky: SparseCholeskySolver,
    external_cholesky: SparseCholeskySolver,
    external_qr: SparseQRSolver,
    last_structure: Option<u64>,
}

impl LinearSolveDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `system` to the configured family and return the keyed step.
    ///
    /// Missing companion parameters are configuration errors; no other family is tried.
    pub fn solve(
        &mut self,
        system: &LinearSystem,
        params: &NonlinearOptimizerParams,
    ) -> OptimizerResult<VectorValues> {
        let step = match params.linear_solver_type {
            LinearSolverType::Multifrontal => {
                let ordering = resolve_ordering(system, params);
                self.invalidate_if_changed(system, &ordering, params);
                multifrontal::solve(
                    system,
                    &ordering,
                    params.elimination_function,
                    &mut self.cholesky,
                )?
            }
            LinearSolverType::Sequential => {
                let ordering = resolve_ordering(system, params);
                sequential::solve(system, &ordering, params.elimination_function)?
            }
            LinearSolverType::Iterative => match &params.iterative_params {
                None => {
                    return Err(OptimizerError::Configuration(
                        "iterative solver selected without iterative parameters".to_string(),
                    )
                    .log());
                }
                Some(IterativeParams::Pcg(pcg_params)) => pcg::solve(system, pcg_params)?,
                Some(IterativeParams::Subgraph(subgraph_params)) => {
                    let ordering = params.ordering.as_ref().ok_or_else(|| {
                        OptimizerError::Configuration(
                            "Subgraph solver needs an ordering; none was provided".to_string(),
                        )
                        .log()
                    })?;
                    subgraph::solve(system, ordering, subgraph_params)?
                }
            },
            LinearSolverType::ExternalQr | LinearSolverType::ExternalCholesky => {
                let ordering = resolve_ordering(system, params);
                self.invalidate_if_changed(system, &ordering, params);
                let layout = ColumnLayout::new(system, &ordering)?;
                let (jacobian, residual) = system.assemble_sparse(&layout)?;
                let solver: &mut dyn SparseLinearSolver =
                    if params.linear_solver_type == LinearSolverType::ExternalQr {
                        &mut self.external_qr
                    } else {
                        &mut self.external_cholesky
                    };
                let dx = solver.solve_normal_equation(&residual, &jacobian)?;
                multifrontal::ensure_finite(&dx)?;
                layout.scatter_mat(&dx)
            }
        };
        Ok(step)
    }

    fn invalidate_if_changed(
        &mut self,
        system: &LinearSystem,
        ordering: &Ordering,
        params: &NonlinearOptimizerParams,
    ) {
        let mut hasher = DefaultHasher::new();
        system.structure_hash().hash(&mut hasher);
        ordering.keys().hash(&mut hasher);
        params.linear_solver_type.hash(&mut hasher);
        let structure = hasher.finish();

        if self.last_structure != Some(structure) {
            if self.last_structure.is_some() {
                debug!("system structure changed, dropping cached symbolic factorizations");
            }
            self.cholesky.reset();
            self.external_cholesky.reset();
            self.external_qr.reset();
            self.last_structure = Some(structure);
        }
    }
}

/// One-shot solve without symbolic caching.
pub fn solve(
    system: &LinearSystem,
    params: &NonlinearOptimizerParams,
) -> OptimizerResult<VectorValues> {
    LinearSolveDispatcher::new().solve(system, params)
}

fn resolve_ordering(system: &LinearSystem, params: &NonlinearOptimizerParams) -> Ordering {
    params
        .ordering
        .clone()
        .unwrap_or_else(|| Ordering::compute(params.ordering_type, system))
}
