//! Linear triangulation of 3D points from multiple views.
//!
//! Uses the homogeneous DLT formulation: every view contributes the rows
//! `u * P[2] - P[0]` and `v * P[2] - P[1]`, and the point is the null vector
//! of the stacked system.

use crate::math::null_vector;
use anyhow::Result;
use nalgebra::DMatrix;
use sfm_core::{pose_matrix, FxFyCxCySkew, Iso3, Mat34, Pt2, Pt3, Real};

/// Pixel projection matrix `P = K [R | t]` of a `T_C_W` pose.
pub fn projection_matrix(k: &FxFyCxCySkew<Real>, pose: &Iso3) -> Mat34 {
    k.k_matrix() * pose_matrix(pose)
}

/// Linear triangulation from two or more views.
///
/// `cameras` are projection matrices and `points` the corresponding image
/// coordinates in the same units (pixels for `K [R | t]`, normalized
/// coordinates for `[R | t]`). The result is expressed in the world frame of
/// the projection matrices. Points at infinity are reported as errors.
pub fn triangulate_point_linear(cameras: &[Mat34], points: &[Pt2]) -> Result<Pt3> {
    if cameras.len() < 2 {
        anyhow::bail!("need at least 2 views, got {}", cameras.len());
    }
    if cameras.len() != points.len() {
        anyhow::bail!(
            "mismatched number of cameras ({}) and points ({})",
            cameras.len(),
            points.len()
        );
    }

    let mut a = DMatrix::<Real>::zeros(2 * cameras.len(), 4);
    for (i, (p, cam)) in points.iter().zip(cameras.iter()).enumerate() {
        let row2 = cam.row(2);
        a.row_mut(2 * i).copy_from(&(p.x * row2 - cam.row(0)));
        a.row_mut(2 * i + 1).copy_from(&(p.y * row2 - cam.row(1)));
    }

    let x_h = null_vector(&a).ok_or_else(|| anyhow::anyhow!("svd failed during triangulation"))?;
    let w = x_h[3];
    if w.abs() <= Real::EPSILON {
        anyhow::bail!("triangulation produced a point at infinity");
    }
    let pt = Pt3::new(x_h[0] / w, x_h[1] / w, x_h[2] / w);
    if !(pt.x.is_finite() && pt.y.is_finite() && pt.z.is_finite()) {
        anyhow::bail!("triangulation produced a non-finite point");
    }
    Ok(pt)
}
