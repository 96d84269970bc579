//! Variable elimination orderings.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::Key;
use crate::linalg::{LinAlgError, LinAlgResult, LinearSystem};

/// How to compute an ordering when none is given explicitly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OrderingType {
    /// Ascending key order
    Natural,
    /// Greedy minimum degree on the variable adjacency graph
    #[default]
    MinimumDegree,
}

impl fmt::Display for OrderingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingType::Natural => write!(f, "NATURAL"),
            OrderingType::MinimumDegree => write!(f, "MINIMUM_DEGREE"),
        }
    }
}

/// Explicit elimination sequence of variable keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ordering(Vec<Key>);

impl Ordering {
    pub fn new(keys: Vec<Key>) -> Self {
        Ordering(keys)
    }

    /// Ascending, de-duplicated key order.
    pub fn natural<I: IntoIterator<Item = Key>>(keys: I) -> Self {
        let keys: BTreeSet<Key> = keys.into_iter().collect();
        Ordering(keys.into_iter().collect())
    }

    /// Greedy minimum degree: repeatedly eliminate the variable with the fewest neighbours
    /// (smallest key on ties), connecting its neighbours into a clique.
    pub fn minimum_degree(adjacency: &BTreeMap<Key, BTreeSet<Key>>) -> Self {
        let mut graph = adjacency.clone();
        let mut order = Vec::with_capacity(graph.len());
        while let Some(next) = graph
            .iter()
            .min_by_key(|(key, neighbours)| (neighbours.len(), **key))
            .map(|(key, _)| *key)
        {
            let neighbours = graph.remove(&next).unwrap_or_default();
            for &a in &neighbours {
                if let Some(set) = graph.get_mut(&a) {
                    set.remove(&next);
                    set.extend(neighbours.iter().copied().filter(|&b| b != a));
                }
            }
            order.push(next);
        }
        Ordering(order)
    }

    /// Compute an ordering of the given type for a linear system.
    pub fn compute(ordering_type: OrderingType, system: &LinearSystem) -> Self {
        match ordering_type {
            OrderingType::Natural => Ordering::natural(system.keys()),
            OrderingType::MinimumDegree => Ordering::minimum_degree(&system.adjacency()),
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of each key in the ordering.
    pub fn positions(&self) -> BTreeMap<Key, usize> {
        self.0.iter().enumerate().map(|(i, &k)| (k, i)).collect()
    }

    /// The ordering must be a permutation of the system's keys.
    pub fn validate_for(&self, system: &LinearSystem) -> LinAlgResult<()> {
        let ordered: BTreeSet<Key> = self.0.iter().copied().collect();
        if ordered.len() != self.0.len() {
            return Err(LinAlgError::InvalidOrdering("ordering repeats a key".to_string()).log());
        }
        let expected: BTreeSet<Key> = system.dims().keys().copied().collect();
        if let Some(missing) = expected.difference(&ordered).next() {
            return Err(
                LinAlgError::InvalidOrdering(format!("key {missing} missing from ordering")).log(),
            );
        }
        if let Some(extra) = ordered.difference(&expected).next() {
            return Err(LinAlgError::InvalidOrdering(format!(
                "key {extra} is not a variable of the system"
            ))
            .log());
        }
        Ok(())
    }
}

impl From<Vec<Key>> for Ordering {
    fn from(keys: Vec<Key>) -> Self {
        Ordering(keys)
    }
}
