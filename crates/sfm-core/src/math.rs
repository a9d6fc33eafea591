//! Mathematical type definitions shared by every crate in the workspace.

use nalgebra::{Isometry3, Matrix3, Matrix3x4, Point2, Point3, Vector2, Vector3};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 3×4 matrix with [`Real`] entries (camera projection matrices).
pub type Mat34 = Matrix3x4<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;

/// Build the 3×4 matrix `[R | t]` of a world-to-camera pose.
pub fn pose_matrix(pose: &Iso3) -> Mat34 {
    let r = pose.rotation.to_rotation_matrix().into_inner();
    let t = pose.translation.vector;
    let mut m = Mat34::zeros();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    m.set_column(3, &t);
    m
}
