//! Special Euclidean group SE(2): rigid motions in the plane.
//!
//! Elements are stored as a translation and a unit complex rotation. The tangent space is
//! ordered `[vx, vy, ω]`, matching the coordinate layout `[x, y, θ]` used when poses are
//! flattened into `DVector`s for factor evaluation.

use std::fmt;

use nalgebra::{DVector, Matrix2, Matrix3, UnitComplex, Vector2, Vector3};

use crate::manifold::{ManifoldError, ManifoldResult};

/// Planar pose: rotation followed by translation.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2 {
    translation: Vector2<f64>,
    rotation: UnitComplex<f64>,
}

impl fmt::Display for SE2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(x: {:.4}, y: {:.4}, θ: {:.4})",
            self.x(),
            self.y(),
            self.angle()
        )
    }
}

impl Default for SE2 {
    fn default() -> Self {
        Self::identity()
    }
}

impl TryFrom<&DVector<f64>> for SE2 {
    type Error = ManifoldError;

    fn try_from(data: &DVector<f64>) -> ManifoldResult<Self> {
        if data.len() != 3 {
            return Err(ManifoldError::DimensionMismatch {
                expected: 3,
                actual: data.len(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ManifoldError::InvalidNumber);
        }
        Ok(SE2::from_xy_angle(data[0], data[1], data[2]))
    }
}

impl From<&SE2> for DVector<f64> {
    fn from(pose: &SE2) -> Self {
        DVector::from_vec(vec![pose.x(), pose.y(), pose.angle()])
    }
}

/// `(sin w / w, (1 - cos w) / w)`. `1 - cos w` is taken as `2·sin²(w/2)` to keep precision.
fn left_jacobian_coefficients(w: f64) -> (f64, f64) {
    let w_sq = w * w;
    if w_sq < f64::EPSILON {
        (1.0 - w_sq / 6.0, 0.5 * w - w * w_sq / 24.0)
    } else {
        let half = 0.5 * w;
        (w.sin() / w, 2.0 * half.sin() * half.sin() / w)
    }
}

impl SE2 {
    /// Degrees of freedom of the tangent space.
    pub const DOF: usize = 3;

    pub fn identity() -> Self {
        SE2 {
            translation: Vector2::zeros(),
            rotation: UnitComplex::identity(),
        }
    }

    pub fn new(translation: Vector2<f64>, rotation: UnitComplex<f64>) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        SE2 {
            translation: Vector2::new(x, y),
            rotation: UnitComplex::new(theta),
        }
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    /// Rotation angle in `(-π, π]`.
    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    pub fn rotation(&self) -> UnitComplex<f64> {
        self.rotation
    }

    /// `self ∘ other`
    pub fn compose(&self, other: &SE2) -> SE2 {
        SE2 {
            translation: self.translation + self.rotation * other.translation,
            rotation: self.rotation * other.rotation,
        }
    }

    pub fn inverse(&self) -> SE2 {
        let rotation = self.rotation.inverse();
        SE2 {
            translation: -(rotation * self.translation),
            rotation,
        }
    }

    /// Relative pose `self⁻¹ ∘ other`.
    pub fn between(&self, other: &SE2) -> SE2 {
        self.inverse().compose(other)
    }

    /// Exponential map from the tangent vector `[vx, vy, ω]`.
    pub fn exp(tangent: &Vector3<f64>) -> SE2 {
        let w = tangent.z;
        let (a, b) = left_jacobian_coefficients(w);
        let left_jacobian = Matrix2::new(a, -b, b, a);
        SE2 {
            translation: left_jacobian * Vector2::new(tangent.x, tangent.y),
            rotation: UnitComplex::new(w),
        }
    }

    /// Logarithmic map to the tangent vector `[vx, vy, ω]`.
    pub fn log(&self) -> Vector3<f64> {
        let w = self.angle();
        let (a, b) = left_jacobian_coefficients(w);
        // inverse of [[a, -b], [b, a]]; a² + b² stays near 1 for |w| ≤ π
        let scale = 1.0 / (a * a + b * b);
        let inverse_left_jacobian = Matrix2::new(a, b, -b, a) * scale;
        let v = inverse_left_jacobian * self.translation;
        Vector3::new(v.x, v.y, w)
    }

    /// Adjoint matrix mapping tangent vectors at identity through `X (·) X⁻¹`.
    pub fn adjoint(&self) -> Matrix3<f64> {
        let (s, c) = (self.rotation.sin_angle(), self.rotation.cos_angle());
        Matrix3::new(c, -s, self.y(), s, c, -self.x(), 0.0, 0.0, 1.0)
    }

    /// `self ⊕ delta = self ∘ Exp(delta)`
    pub fn retract(&self, delta: &Vector3<f64>) -> SE2 {
        self.compose(&SE2::exp(delta))
    }

    /// `other ⊖ self = Log(self⁻¹ ∘ other)`
    pub fn local(&self, other: &SE2) -> Vector3<f64> {
        self.between(other).log()
    }
}
