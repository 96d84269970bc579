//! Reference nonlinear problem: a list of factors over keyed variables.
//!
//! Each entry connects a [`Factor`] to an ordered list of keys and an optional diagonal noise
//! model. Error evaluation and linearization run over all entries, in parallel when the
//! `parallel` feature is enabled; results do not depend on scheduling.

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::core::noise_model::DiagonalNoise;
use crate::core::problem::NonlinearProblem;
use crate::core::values::Values;
use crate::core::{CoreError, CoreResult, Key};
use crate::factors::Factor;
use crate::linalg::{JacobianFactor, LinearSystem, VectorValues};

struct FactorEntry {
    keys: Vec<Key>,
    factor: Box<dyn Factor>,
    noise: Option<DiagonalNoise>,
}

#[derive(Default)]
pub struct FactorGraph {
    entries: Vec<FactorEntry>,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factor over `keys`. Returns the index of the new factor.
    pub fn add_factor(
        &mut self,
        keys: &[Key],
        factor: Box<dyn Factor>,
        noise: Option<DiagonalNoise>,
    ) -> CoreResult<usize> {
        if keys.is_empty() {
            return Err(CoreError::InvalidInput("factor without keys".to_string()).log());
        }
        let unique: BTreeSet<_> = keys.iter().collect();
        if unique.len() != keys.len() {
            return Err(
                CoreError::InvalidInput(format!("factor repeats a key: {keys:?}")).log(),
            );
        }
        if let Some(ref noise) = noise
            && noise.dim() != factor.get_dimension()
        {
            return Err(CoreError::DimensionMismatch(format!(
                "noise model of dimension {} for factor of dimension {}",
                noise.dim(),
                factor.get_dimension()
            ))
            .log());
        }
        self.entries.push(FactorEntry {
            keys: keys.to_vec(),
            factor,
            noise,
        });
        Ok(self.entries.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whitened residual and Jacobian of one entry.
    fn evaluate(
        &self,
        entry: &FactorEntry,
        values: &Values,
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let params = entry
            .keys
            .iter()
            .map(|&key| values.at(key).map(|v| v.to_vector()))
            .collect::<CoreResult<Vec<_>>>()?;
        let (residual, jacobian) = entry.factor.linearize(&params, compute_jacobian)?;
        if residual.len() != entry.factor.get_dimension() {
            return Err(CoreError::FactorLinearization(format!(
                "residual of size {} from factor of dimension {}",
                residual.len(),
                entry.factor.get_dimension()
            ))
            .log());
        }
        Ok(match &entry.noise {
            Some(noise) => (
                noise.whiten(&residual),
                jacobian.map(|j| noise.whiten_jacobian(&j)),
            ),
            None => (residual, jacobian),
        })
    }

    fn linearize_entry(&self, entry: &FactorEntry, values: &Values) -> CoreResult<JacobianFactor> {
        let (residual, jacobian) = self.evaluate(entry, values, true)?;
        let jacobian = jacobian.ok_or_else(|| {
            CoreError::FactorLinearization("factor returned no Jacobian".to_string()).log()
        })?;

        let mut blocks = Vec::with_capacity(entry.keys.len());
        let mut column = 0;
        for &key in &entry.keys {
            let dim = values.at(key)?.dim();
            if column + dim > jacobian.ncols() {
                return Err(CoreError::DimensionMismatch(format!(
                    "Jacobian with {} columns too narrow for keys {:?}",
                    jacobian.ncols(),
                    entry.keys
                ))
                .log());
            }
            blocks.push(jacobian.columns(column, dim).into_owned());
            column += dim;
        }
        if column != jacobian.ncols() {
            return Err(CoreError::DimensionMismatch(format!(
                "Jacobian has {} columns, variables have {column}",
                jacobian.ncols()
            ))
            .log());
        }
        JacobianFactor::new(entry.keys.clone(), blocks, residual)
            .map_err(|e| CoreError::FactorLinearization(e.to_string()))
    }
}

impl NonlinearProblem for FactorGraph {
    type Values = Values;

    fn error(&self, values: &Values) -> CoreResult<f64> {
        let squared_norm = |entry: &FactorEntry| {
            self.evaluate(entry, values, false)
                .map(|(residual, _)| residual.norm_squared())
        };

        #[cfg(feature = "parallel")]
        let terms: CoreResult<Vec<f64>> = self.entries.par_iter().map(squared_norm).collect();

        #[cfg(not(feature = "parallel"))]
        let terms: CoreResult<Vec<f64>> = self.entries.iter().map(squared_norm).collect();

        Ok(0.5 * terms?.iter().sum::<f64>())
    }

    fn linearize(&self, values: &Values) -> CoreResult<LinearSystem> {
        #[cfg(feature = "parallel")]
        let factors: CoreResult<Vec<JacobianFactor>> = self
            .entries
            .par_iter()
            .map(|entry| self.linearize_entry(entry, values))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let factors: CoreResult<Vec<JacobianFactor>> = self
            .entries
            .iter()
            .map(|entry| self.linearize_entry(entry, values))
            .collect();

        let mut system = LinearSystem::new();
        for factor in factors? {
            system
                .push(factor)
                .map_err(|e| CoreError::DimensionMismatch(e.to_string()))?;
        }
        Ok(system)
    }

    fn retract(&self, values: &Values, step: &VectorValues) -> CoreResult<Values> {
        values.retract(step)
    }

    fn keys(&self) -> Vec<Key> {
        let keys: BTreeSet<Key> = self
            .entries
            .iter()
            .flat_map(|entry| entry.keys.iter().copied())
            .collect();
        keys.into_iter().collect()
    }
}
