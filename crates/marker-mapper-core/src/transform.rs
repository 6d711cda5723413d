//! Rigid 4×4 homogeneous transforms.
//!
//! Every transform in the pipeline (camera-to-marker, base-to-marker,
//! perturbations) is a [`RigidTransform`]. Construction from axis-angle and
//! translation vectors always yields an orthonormal rotation block; matrices
//! coming from outside (deserialized maps) go through
//! [`RigidTransform::try_from_matrix`], which rejects anything that is not a
//! rigid motion.

use std::ops::Mul;

use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Orthonormality tolerance used when validating external matrices.
pub const RIGID_TOLERANCE: f64 = 1e-6;

/// Errors produced when a matrix does not describe a rigid motion.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("transform contains non-finite entries")]
    NonFinite,
    #[error("bottom row must be [0, 0, 0, 1]")]
    InvalidBottomRow,
    #[error("rotation block is not orthonormal (deviation {deviation:.3e})")]
    NotOrthonormal { deviation: f64 },
    #[error("rotation block is a reflection (det = {det:.6})")]
    Reflection { det: f64 },
}

/// A rotation + translation stored as a homogeneous 4×4 matrix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 4]; 4]", into = "[[f64; 4]; 4]")]
pub struct RigidTransform {
    m: Matrix4<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            m: Matrix4::identity(),
        }
    }

    /// Build from an axis-angle rotation vector and a translation vector.
    pub fn from_vectors(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Self {
        Self::from_parts(&Rotation3::new(*rvec), tvec)
    }

    pub fn from_parts(rotation: &Rotation3<f64>, translation: &Vector3<f64>) -> Self {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation.matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        Self { m }
    }

    /// Validate an arbitrary 4×4 matrix as a rigid transform.
    pub fn try_from_matrix(m: Matrix4<f64>) -> Result<Self, TransformError> {
        if m.iter().any(|v| !v.is_finite()) {
            return Err(TransformError::NonFinite);
        }
        let bottom = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)]];
        if bottom
            .iter()
            .zip([0.0, 0.0, 0.0, 1.0])
            .any(|(a, b)| (a - b).abs() > RIGID_TOLERANCE)
        {
            return Err(TransformError::InvalidBottomRow);
        }
        let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let deviation = orthonormality_deviation(&r);
        if deviation > RIGID_TOLERANCE {
            return Err(TransformError::NotOrthonormal { deviation });
        }
        let det = r.determinant();
        if det < 0.0 {
            return Err(TransformError::Reflection { det });
        }
        Ok(Self { m })
    }

    pub fn from_rows(rows: [[f64; 4]; 4]) -> Result<Self, TransformError> {
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::try_from_matrix(Matrix4::from_row_slice(&flat))
    }

    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.m[(r, c)];
            }
        }
        out
    }

    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.m
    }

    #[inline]
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.m.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_matrix_unchecked(self.rotation_matrix())
    }

    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.m.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Axis-angle vector of the rotation block.
    ///
    /// Goes through a unit quaternion so rotations close to π keep their axis.
    pub fn rvec(&self) -> Vector3<f64> {
        UnitQuaternion::from_rotation_matrix(&self.rotation()).scaled_axis()
    }

    /// Exact rigid inverse: `[Rᵀ | -Rᵀt]`.
    pub fn inverse(&self) -> Self {
        let rt = self.rotation_matrix().transpose();
        let t = -(rt * self.translation());
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rt);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
        Self { m }
    }

    /// `self · other`: apply `other` first, then `self`.
    #[inline]
    pub fn compose(&self, other: &RigidTransform) -> Self {
        Self { m: self.m * other.m }
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        let v = self.m * p.to_homogeneous();
        Point3::new(v[0] / v[3], v[1] / v[3], v[2] / v[3])
    }

    /// Homogenize, transform, de-homogenize a set of points.
    pub fn transform_points(&self, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    pub fn is_rigid(&self, tol: f64) -> bool {
        orthonormality_deviation(&self.rotation_matrix()) <= tol
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> RigidTransform {
        self.compose(&rhs)
    }
}

impl<'a> Mul<&'a RigidTransform> for &'a RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: &'a RigidTransform) -> RigidTransform {
        self.compose(rhs)
    }
}

impl TryFrom<[[f64; 4]; 4]> for RigidTransform {
    type Error = TransformError;

    fn try_from(rows: [[f64; 4]; 4]) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<RigidTransform> for [[f64; 4]; 4] {
    fn from(t: RigidTransform) -> Self {
        t.to_rows()
    }
}

/// Largest absolute entry of `RᵀR - I`.
fn orthonormality_deviation(r: &Matrix3<f64>) -> f64 {
    (r.transpose() * r - Matrix3::identity()).amax()
}
