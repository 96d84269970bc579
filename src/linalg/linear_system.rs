//! Linearized sub-problem as a list of Jacobian factors.
//!
//! Each [`JacobianFactor`] holds one dense block per connected key and a residual; the
//! system encodes the quadratic `½‖J·δ + r‖²`. Back ends either work on the blocks directly
//! (iterative, sequential) or assemble a sparse matrix through a [`ColumnLayout`].

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{DefaultHasher, Hash, Hasher};

use faer::{
    Mat,
    sparse::{SparseColMat, Triplet},
};
use nalgebra::{DMatrix, DVector};

use crate::core::Key;
use crate::linalg::{LinAlgError, LinAlgResult, Ordering, VectorValues};

/// Linearized factor `A₁δ₁ + … + Aₖδₖ + r`.
#[derive(Clone, Debug)]
pub struct JacobianFactor {
    keys: Vec<Key>,
    blocks: Vec<DMatrix<f64>>,
    residual: DVector<f64>,
}

impl JacobianFactor {
    pub fn new(
        keys: Vec<Key>,
        blocks: Vec<DMatrix<f64>>,
        residual: DVector<f64>,
    ) -> LinAlgResult<Self> {
        if keys.len() != blocks.len() {
            return Err(LinAlgError::DimensionMismatch(format!(
                "{} keys but {} Jacobian blocks",
                keys.len(),
                blocks.len()
            ))
            .log());
        }
        if let Some(block) = blocks.iter().find(|b| b.nrows() != residual.len()) {
            return Err(LinAlgError::DimensionMismatch(format!(
                "Jacobian block has {} rows, residual has {}",
                block.nrows(),
                residual.len()
            ))
            .log());
        }
        let unique: BTreeSet<_> = keys.iter().collect();
        if unique.len() != keys.len() {
            return Err(
                LinAlgError::DimensionMismatch(format!("duplicate key in factor {keys:?}")).log(),
            );
        }
        Ok(JacobianFactor {
            keys,
            blocks,
            residual,
        })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn blocks(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    pub fn rows(&self) -> usize {
        self.residual.len()
    }

    pub fn block(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.keys
            .iter()
            .position(|&k| k == key)
            .map(|i| &self.blocks[i])
    }

    /// `Σ Aₖ xₖ`, keys absent from `x` contribute nothing.
    pub fn multiply(&self, x: &VectorValues) -> DVector<f64> {
        let mut out = DVector::zeros(self.rows());
        for (key, block) in self.keys.iter().zip(&self.blocks) {
            if let Some(xk) = x.get(*key) {
                out += block * xk;
            }
        }
        out
    }

    /// `out[k] += Aₖᵀ e` for every key of the factor.
    pub fn transpose_multiply_add(&self, e: &DVector<f64>, out: &mut VectorValues) {
        for (key, block) in self.keys.iter().zip(&self.blocks) {
            let contribution = block.transpose() * e;
            match out.get_mut(*key) {
                Some(acc) => *acc += contribution,
                None => {
                    out.insert(*key, contribution);
                }
            }
        }
    }
}

/// Gaussian factor graph produced by linearizing a nonlinear problem.
#[derive(Clone, Debug, Default)]
pub struct LinearSystem {
    factors: Vec<JacobianFactor>,
    dims: BTreeMap<Key, usize>,
}

impl LinearSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factor, checking its block widths against previously seen keys.
    pub fn push(&mut self, factor: JacobianFactor) -> LinAlgResult<()> {
        for (key, block) in factor.keys.iter().zip(&factor.blocks) {
            match self.dims.get(key) {
                Some(&dim) if dim != block.ncols() => {
                    return Err(LinAlgError::DimensionMismatch(format!(
                        "key {key} has dimension {dim} but block has {} columns",
                        block.ncols()
                    ))
                    .log());
                }
                Some(_) => {}
                None => {
                    self.dims.insert(*key, block.ncols());
                }
            }
        }
        self.factors.push(factor);
        Ok(())
    }

    pub fn factors(&self) -> &[JacobianFactor] {
        &self.factors
    }

    pub fn dims(&self) -> &BTreeMap<Key, usize> {
        &self.dims
    }

    pub fn keys(&self) -> Vec<Key> {
        self.dims.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.factors.iter().map(JacobianFactor::rows).sum()
    }

    pub fn total_dim(&self) -> usize {
        self.dims.values().sum()
    }

    /// Quadratic model `½‖J·δ + r‖²` at `step`.
    pub fn error(&self, step: &VectorValues) -> f64 {
        0.5 * self
            .factors
            .iter()
            .map(|f| (f.multiply(step) + &f.residual).norm_squared())
            .sum::<f64>()
    }

    /// Gradient of the quadratic model at zero, `Jᵀr`.
    pub fn gradient(&self) -> VectorValues {
        let mut g = VectorValues::zero(&self.dims);
        for factor in &self.factors {
            factor.transpose_multiply_add(&factor.residual, &mut g);
        }
        g
    }

    /// `J x`, one residual-sized vector per factor.
    pub fn multiply(&self, x: &VectorValues) -> Vec<DVector<f64>> {
        self.factors.iter().map(|f| f.multiply(x)).collect()
    }

    /// `Jᵀ e` for per-factor vectors `e`.
    pub fn transpose_multiply(&self, e: &[DVector<f64>]) -> VectorValues {
        let mut out = VectorValues::zero(&self.dims);
        for (factor, ei) in self.factors.iter().zip(e) {
            factor.transpose_multiply_add(ei, &mut out);
        }
        out
    }

    /// `JᵀJ x` without forming the Hessian.
    pub fn hessian_vector(&self, x: &VectorValues) -> VectorValues {
        self.transpose_multiply(&self.multiply(x))
    }

    /// Diagonal of `JᵀJ`.
    pub fn hessian_diagonal(&self) -> VectorValues {
        let mut diag = VectorValues::zero(&self.dims);
        for factor in &self.factors {
            for (key, block) in factor.keys.iter().zip(&factor.blocks) {
                if let Some(d) = diag.get_mut(*key) {
                    for (j, column) in block.column_iter().enumerate() {
                        d[j] += column.norm_squared();
                    }
                }
            }
        }
        diag
    }

    /// Diagonal blocks `Σ AₖᵀAₖ` of the Hessian, keyed by variable.
    pub fn block_diagonal(&self) -> BTreeMap<Key, DMatrix<f64>> {
        let mut blocks: BTreeMap<Key, DMatrix<f64>> = self
            .dims
            .iter()
            .map(|(&k, &d)| (k, DMatrix::zeros(d, d)))
            .collect();
        for factor in &self.factors {
            for (key, block) in factor.keys.iter().zip(&factor.blocks) {
                if let Some(acc) = blocks.get_mut(key) {
                    *acc += block.transpose() * block;
                }
            }
        }
        blocks
    }

    /// Copy of the system with a damping factor `√(λ dᵢ)` per variable and zero residual.
    ///
    /// With `diagonal = None` every `dᵢ` is 1, giving `JᵀJ + λI`.
    pub fn damped(&self, lambda: f64, diagonal: Option<&VectorValues>) -> LinAlgResult<Self> {
        let mut damped = self.clone();
        for (&key, &dim) in &self.dims {
            let weights = DVector::from_fn(dim, |i, _| {
                let d = diagonal.and_then(|diag| diag.get(key)).map_or(1.0, |v| v[i]);
                (lambda * d).sqrt()
            });
            damped.factors.push(JacobianFactor::new(
                vec![key],
                vec![DMatrix::from_diagonal(&weights)],
                DVector::zeros(dim),
            )?);
        }
        Ok(damped)
    }

    /// Variable adjacency: keys sharing a factor are neighbours. Every key is present.
    pub fn adjacency(&self) -> BTreeMap<Key, BTreeSet<Key>> {
        let mut adjacency: BTreeMap<Key, BTreeSet<Key>> =
            self.dims.keys().map(|&k| (k, BTreeSet::new())).collect();
        for factor in &self.factors {
            for &a in &factor.keys {
                for &b in &factor.keys {
                    if a != b
                        && let Some(neighbours) = adjacency.get_mut(&a)
                    {
                        neighbours.insert(b);
                    }
                }
            }
        }
        adjacency
    }

    /// Hash of keys, block sizes and factor connectivity; equal for systems whose assembled
    /// matrices share a sparsity pattern.
    pub fn structure_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.dims.hash(&mut hasher);
        for factor in &self.factors {
            factor.keys.hash(&mut hasher);
            factor.rows().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Assemble `J` (sparse, columns in layout order) and `r` (dense column).
    pub fn assemble_sparse(
        &self,
        layout: &ColumnLayout,
    ) -> LinAlgResult<(SparseColMat<usize, f64>, Mat<f64>)> {
        let nrows = self.total_rows();
        let mut triplets = Vec::new();
        let mut residual = Mat::zeros(nrows, 1);
        let mut row = 0;
        for factor in &self.factors {
            for (key, block) in factor.keys.iter().zip(&factor.blocks) {
                let col = layout.offset(*key)?;
                // every block entry is structural, zeros included, so the pattern depends
                // only on keys and block sizes
                for j in 0..block.ncols() {
                    for i in 0..block.nrows() {
                        triplets.push(Triplet::new(row + i, col + j, block[(i, j)]));
                    }
                }
            }
            for i in 0..factor.rows() {
                residual[(row + i, 0)] = factor.residual[i];
            }
            row += factor.rows();
        }
        let jacobian =
            SparseColMat::try_new_from_triplets(nrows, layout.total_dim(), &triplets).map_err(
                |e| {
                    LinAlgError::SparseMatrixCreation(
                        "Failed to assemble sparse Jacobian".to_string(),
                    )
                    .log_with_source(e)
                },
            )?;
        Ok((jacobian, residual))
    }

    /// Assemble dense `J` and `r` with columns in layout order.
    pub fn assemble_dense(
        &self,
        layout: &ColumnLayout,
    ) -> LinAlgResult<(DMatrix<f64>, DVector<f64>)> {
        let mut jacobian = DMatrix::zeros(self.total_rows(), layout.total_dim());
        let mut residual = DVector::zeros(self.total_rows());
        let mut row = 0;
        for factor in &self.factors {
            let rows = factor.rows();
            for (key, block) in factor.keys.iter().zip(&factor.blocks) {
                let col = layout.offset(*key)?;
                jacobian
                    .view_mut((row, col), (rows, block.ncols()))
                    .copy_from(block);
            }
            residual.rows_mut(row, rows).copy_from(&factor.residual);
            row += rows;
        }
        Ok((jacobian, residual))
    }
}

/// Column offsets of each key when the system is flattened in a given ordering.
#[derive(Clone, Debug)]
pub struct ColumnLayout {
    order: Vec<Key>,
    offsets: BTreeMap<Key, (usize, usize)>,
    total: usize,
}

impl ColumnLayout {
    pub fn new(system: &LinearSystem, ordering: &Ordering) -> LinAlgResult<Self> {
        ordering.validate_for(system)?;
        let mut offsets = BTreeMap::new();
        let mut total = 0;
        for &key in ordering.keys() {
            let dim = system.dims.get(&key).copied().unwrap_or(0);
            offsets.insert(key, (total, dim));
            total += dim;
        }
        Ok(ColumnLayout {
            order: ordering.keys().to_vec(),
            offsets,
            total,
        })
    }

    pub fn order(&self) -> &[Key] {
        &self.order
    }

    pub fn offset(&self, key: Key) -> LinAlgResult<usize> {
        self.offsets
            .get(&key)
            .map(|&(offset, _)| offset)
            .ok_or_else(|| {
                LinAlgError::InvalidOrdering(format!("key {key} missing from layout")).log()
            })
    }

    pub fn total_dim(&self) -> usize {
        self.total
    }

    /// Split a flat solution column into keyed blocks.
    pub fn scatter(&self, x: &DVector<f64>) -> VectorValues {
        self.offsets
            .iter()
            .map(|(&key, &(offset, dim))| (key, x.rows(offset, dim).into_owned()))
            .collect()
    }

    /// Same as [`scatter`](Self::scatter) for a faer column.
    pub fn scatter_mat(&self, x: &Mat<f64>) -> VectorValues {
        self.offsets
            .iter()
            .map(|(&key, &(offset, dim))| (key, DVector::from_fn(dim, |i, _| x[(offset + i, 0)])))
            .collect()
    }

    /// Flatten keyed blocks; keys absent from `v` become zeros.
    pub fn gather(&self, v: &VectorValues) -> DVector<f64> {
        let mut out = DVector::zeros(self.total);
        for (&key, &(offset, dim)) in &self.offsets {
            if let Some(block) = v.get(key) {
                out.rows_mut(offset, dim).copy_from(block);
            }
        }
        out
    }
}
