//! Keyed estimate of all variables in a factor graph.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::{DVector, Vector3};

use crate::core::{CoreError, CoreResult, Key};
use crate::linalg::VectorValues;
use crate::manifold::SE2;

/// A single variable assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum VariableEnum {
    /// Euclidean vector, updated additively
    Vector(DVector<f64>),
    /// Planar pose, updated through the exponential map
    Pose2(SE2),
}

impl VariableEnum {
    /// Tangent-space dimension.
    pub fn dim(&self) -> usize {
        match self {
            VariableEnum::Vector(v) => v.len(),
            VariableEnum::Pose2(_) => SE2::DOF,
        }
    }

    /// Coordinates handed to factors: the vector itself, or `[x, y, θ]` for a pose.
    pub fn to_vector(&self) -> DVector<f64> {
        match self {
            VariableEnum::Vector(v) => v.clone(),
            VariableEnum::Pose2(pose) => DVector::from(pose),
        }
    }

    /// `self ⊕ delta`
    pub fn retract(&self, delta: &DVector<f64>) -> CoreResult<VariableEnum> {
        if delta.len() != self.dim() {
            return Err(CoreError::DimensionMismatch(format!(
                "update of size {} for variable of dimension {}",
                delta.len(),
                self.dim()
            ))
            .log());
        }
        if delta.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::InvalidInput("non-finite update".to_string()).log());
        }
        Ok(match self {
            VariableEnum::Vector(v) => VariableEnum::Vector(v + delta),
            VariableEnum::Pose2(pose) => {
                VariableEnum::Pose2(pose.retract(&Vector3::new(delta[0], delta[1], delta[2])))
            }
        })
    }

    /// `other ⊖ self`
    pub fn local(&self, other: &VariableEnum) -> CoreResult<DVector<f64>> {
        match (self, other) {
            (VariableEnum::Vector(a), VariableEnum::Vector(b)) if a.len() == b.len() => Ok(b - a),
            (VariableEnum::Pose2(a), VariableEnum::Pose2(b)) => {
                let v = a.local(b);
                Ok(DVector::from_column_slice(v.as_slice()))
            }
            _ => Err(CoreError::Variable(
                "local coordinates between variables of different kinds".to_string(),
            )
            .log()),
        }
    }
}

impl From<SE2> for VariableEnum {
    fn from(pose: SE2) -> Self {
        VariableEnum::Pose2(pose)
    }
}

impl From<DVector<f64>> for VariableEnum {
    fn from(v: DVector<f64>) -> Self {
        VariableEnum::Vector(v)
    }
}

impl fmt::Display for VariableEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableEnum::Vector(v) => write!(f, "{:?}", v.as_slice()),
            VariableEnum::Pose2(pose) => write!(f, "{pose}"),
        }
    }
}

/// Mapping from keys to variable assignments. Replaced wholesale by `retract`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Values {
    variables: BTreeMap<Key, VariableEnum>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Key, value: impl Into<VariableEnum>) -> Option<VariableEnum> {
        self.variables.insert(key, value.into())
    }

    pub fn get(&self, key: Key) -> Option<&VariableEnum> {
        self.variables.get(&key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.variables.contains_key(&key)
    }

    pub fn at(&self, key: Key) -> CoreResult<&VariableEnum> {
        self.variables
            .get(&key)
            .ok_or_else(|| CoreError::Variable(format!("key {key} not found in values")).log())
    }

    pub fn pose2(&self, key: Key) -> CoreResult<&SE2> {
        match self.at(key)? {
            VariableEnum::Pose2(pose) => Ok(pose),
            VariableEnum::Vector(_) => {
                Err(CoreError::Variable(format!("key {key} is not a Pose2")).log())
            }
        }
    }

    pub fn vector(&self, key: Key) -> CoreResult<&DVector<f64>> {
        match self.at(key)? {
            VariableEnum::Vector(v) => Ok(v),
            VariableEnum::Pose2(_) => {
                Err(CoreError::Variable(format!("key {key} is not a vector")).log())
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.variables.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &VariableEnum)> {
        self.variables.iter().map(|(&k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Apply a keyed tangent update. Keys absent from `step` are copied unchanged.
    pub fn retract(&self, step: &VectorValues) -> CoreResult<Values> {
        let mut variables = self.variables.clone();
        for (key, delta) in step.iter() {
            let current = variables.get(&key).ok_or_else(|| {
                CoreError::Variable(format!("update for unknown key {key}")).log()
            })?;
            let updated = current.retract(delta)?;
            variables.insert(key, updated);
        }
        Ok(Values { variables })
    }

    /// Keyed tangent vector taking `self` to `other` (`other ⊖ self`).
    pub fn local(&self, other: &Values) -> CoreResult<VectorValues> {
        self.iter()
            .map(|(key, value)| Ok((key, value.local(other.at(key)?)?)))
            .collect()
    }
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Values with {} variables:", self.len())?;
        for (key, value) in self.iter() {
            writeln!(f, "  {key}: {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample() -> Values {
        let mut values = Values::new();
        values.insert(0, SE2::from_xy_angle(1.0, 2.0, 0.5));
        values.insert(1, DVector::from_vec(vec![3.0]));
        values
    }

    #[test]
    fn test_typed_accessors() -> TestResult {
        let values = sample();
        assert_eq!(values.len(), 2);
        assert!((values.pose2(0)?.x() - 1.0).abs() < 1e-12);
        assert_eq!(values.vector(1)?[0], 3.0);
        assert!(values.pose2(1).is_err());
        assert!(values.at(7).is_err());
        Ok(())
    }

    #[test]
    fn test_retract_is_not_in_place() -> TestResult {
        let values = sample();
        let mut step = VectorValues::new();
        step.insert(1, DVector::from_vec(vec![-1.0]));
        let updated = values.retract(&step)?;
        assert_eq!(values.vector(1)?[0], 3.0);
        assert_eq!(updated.vector(1)?[0], 2.0);
        assert_eq!(updated.pose2(0)?, values.pose2(0)?);
        Ok(())
    }

    #[test]
    fn test_retract_rejects_unknown_key_and_bad_dims() {
        let values = sample();
        let mut step = VectorValues::new();
        step.insert(9, DVector::from_vec(vec![1.0]));
        assert!(values.retract(&step).is_err());

        let mut step = VectorValues::new();
        step.insert(0, DVector::from_vec(vec![1.0]));
        assert!(values.retract(&step).is_err());
    }

    #[test]
    fn test_local_inverts_retract() -> TestResult {
        let values = sample();
        let mut step = VectorValues::new();
        step.insert(0, DVector::from_vec(vec![0.1, -0.2, 0.3]));
        step.insert(1, DVector::from_vec(vec![0.5]));
        let moved = values.retract(&step)?;
        let recovered = values.local(&moved)?;
        assert!(recovered.sub(&step).norm() < 1e-10);
        Ok(())
    }
}
