//! Keyed tangent-space vectors: linear solutions, gradients and Hessian-vector products.

use std::collections::BTreeMap;

use nalgebra::DVector;

use crate::core::Key;

/// Map from variable key to a tangent-space vector.
///
/// Arithmetic treats keys missing from one operand as zero blocks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorValues {
    entries: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// All-zero vector with the given block dimensions.
    pub fn zero(dims: &BTreeMap<Key, usize>) -> Self {
        VectorValues {
            entries: dims
                .iter()
                .map(|(&key, &dim)| (key, DVector::zeros(dim)))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: Key, value: DVector<f64>) -> Option<DVector<f64>> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut DVector<f64>> {
        self.entries.get_mut(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVector<f64>)> {
        self.entries.iter().map(|(&k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total scalar dimension over all blocks.
    pub fn dim(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    pub fn dot(&self, other: &VectorValues) -> f64 {
        self.entries
            .iter()
            .filter_map(|(key, v)| other.entries.get(key).map(|w| v.dot(w)))
            .sum()
    }

    pub fn squared_norm(&self) -> f64 {
        self.entries.values().map(|v| v.norm_squared()).sum()
    }

    pub fn norm(&self) -> f64 {
        self.squared_norm().sqrt()
    }

    /// Largest absolute component, 0 for an empty vector.
    pub fn max_abs(&self) -> f64 {
        self.entries
            .values()
            .flat_map(|v| v.iter())
            .fold(0.0_f64, |acc, x| acc.max(x.abs()))
    }

    pub fn scale(&self, alpha: f64) -> VectorValues {
        VectorValues {
            entries: self
                .entries
                .iter()
                .map(|(&k, v)| (k, v * alpha))
                .collect(),
        }
    }

    /// `self + alpha * other`
    pub fn axpy(&self, alpha: f64, other: &VectorValues) -> VectorValues {
        let mut result = self.clone();
        for (key, w) in other.iter() {
            match result.entries.get_mut(&key) {
                Some(v) => *v += w * alpha,
                None => {
                    result.entries.insert(key, w * alpha);
                }
            }
        }
        result
    }

    pub fn add(&self, other: &VectorValues) -> VectorValues {
        self.axpy(1.0, other)
    }

    pub fn sub(&self, other: &VectorValues) -> VectorValues {
        self.axpy(-1.0, other)
    }

    pub fn neg(&self) -> VectorValues {
        self.scale(-1.0)
    }
}

impl FromIterator<(Key, DVector<f64>)> for VectorValues {
    fn from_iter<I: IntoIterator<Item = (Key, DVector<f64>)>>(iter: I) -> Self {
        VectorValues {
            entries: iter.into_iter().collect(),
        }
    }
}
