//! Conjugate gradients preconditioned by a spanning subgraph.
//!
//! Factors are visited in elimination order; every unary factor is kept and a multi-key factor
//! is kept only when it joins components not yet connected. The resulting tree-like subsystem is
//! factorized once with sparse Cholesky and used as the preconditioner for CG on the full
//! system.

use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::linalg::solvers::{Llt, SymbolicLlt},
};

use crate::core::Key;
use crate::linalg::pcg::{PcgParams, Preconditioner, conjugate_gradient};
use crate::linalg::{
    ColumnLayout, LinAlgError, LinAlgResult, LinearSystem, Ordering, VectorValues,
    normal_equations,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphParams {
    pub pcg: PcgParams,
    /// Diagonal shift added to the subgraph Hessian before factorization
    pub regularization: f64,
}

impl Default for SubgraphParams {
    fn default() -> Self {
        Self {
            pcg: PcgParams::default(),
            regularization: 1e-9,
        }
    }
}

impl SubgraphParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pcg(mut self, pcg: PcgParams) -> Self {
        self.pcg = pcg;
        self
    }

    pub fn with_regularization(mut self, regularization: f64) -> Self {
        self.regularization = regularization;
        self
    }
}

/// Union-find over variable keys.
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        DisjointSets {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Returns false when `a` and `b` were already connected.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        self.parent[ra] = rb;
        true
    }
}

/// Split `system` into a spanning subgraph, visiting factors by their earliest key in
/// `ordering`.
pub fn spanning_subgraph(system: &LinearSystem, ordering: &Ordering) -> LinAlgResult<LinearSystem> {
    ordering.validate_for(system)?;
    let positions = ordering.positions();
    let position = |key: &Key| positions.get(key).copied().unwrap_or(usize::MAX);

    let mut visit: Vec<usize> = (0..system.len()).collect();
    visit.sort_by_key(|&i| {
        system.factors()[i]
            .keys()
            .iter()
            .map(position)
            .min()
            .unwrap_or(usize::MAX)
    });

    let mut components = DisjointSets::new(ordering.len());
    let mut subgraph = LinearSystem::new();
    for i in visit {
        let factor = &system.factors()[i];
        let keys: Vec<usize> = factor.keys().iter().map(position).collect();
        let keep = match keys.split_first() {
            None => false,
            Some((_, [])) => true,
            Some((&first, rest)) => {
                let mut joined = false;
                for &other in rest {
                    joined |= components.union(first, other);
                }
                joined
            }
        };
        if keep {
            subgraph.push(factor.clone())?;
        }
    }
    Ok(subgraph)
}

/// Sparse Cholesky factor of the subgraph Hessian.
pub struct SubgraphPreconditioner {
    layout: ColumnLayout,
    factor: Llt<usize, f64>,
}

impl SubgraphPreconditioner {
    pub fn new(
        subgraph: &LinearSystem,
        ordering: &Ordering,
        regularization: f64,
    ) -> LinAlgResult<Self> {
        let regularized = if regularization > 0.0 {
            subgraph.damped(regularization, None)?
        } else {
            subgraph.clone()
        };
        let layout = ColumnLayout::new(&regularized, ordering)?;
        let (jacobian, residual) = regularized.assemble_sparse(&layout)?;
        let (hessian, _) = normal_equations(&residual, &jacobian)?;

        let symbolic = SymbolicLlt::try_new(hessian.symbolic(), Side::Lower).map_err(|e| {
            LinAlgError::FactorizationFailed(
                "Symbolic Cholesky of subgraph preconditioner failed".to_string(),
            )
            .log_with_source(e)
        })?;
        let factor = Llt::try_new_with_symbolic(symbolic, hessian.as_ref(), Side::Lower)
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;
        Ok(SubgraphPreconditioner { layout, factor })
    }
}

impl Preconditioner for SubgraphPreconditioner {
    fn apply(&self, r: &VectorValues) -> VectorValues {
        let flat = self.layout.gather(r);
        let rhs = Mat::from_fn(flat.len(), 1, |i, _| flat[i]);
        self.layout.scatter_mat(&self.factor.solve(rhs))
    }
}

/// Solve the full system with CG preconditioned by its spanning subgraph.
pub fn solve(
    system: &LinearSystem,
    ordering: &Ordering,
    params: &SubgraphParams,
) -> LinAlgResult<VectorValues> {
    let subgraph = spanning_subgraph(system, ordering)?;
    let preconditioner = SubgraphPreconditioner::new(&subgraph, ordering, params.regularization)?;
    conjugate_gradient(system, &preconditioner, &params.pcg)
}
