//! Rigid alignment used by the minimal and control-point PnP solvers.

use anyhow::Result;
use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use sfm_core::{Iso3, Mat3, Pt3, Real, Vec3};

/// Recover `T_C_W` from world points and the same points in the camera frame.
///
/// Kabsch alignment: SVD of the cross-covariance, reflection fixed so that
/// the rotation is proper, translation from the centroids.
pub(super) fn pose_from_points(world: &[Pt3], camera: &[Vec3]) -> Result<Iso3> {
    if world.len() != camera.len() || world.len() < 3 {
        anyhow::bail!(
            "need at least 3 paired points, got {} world and {} camera",
            world.len(),
            camera.len()
        );
    }

    let n = world.len() as Real;
    let c_w = world.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords) / n;
    let c_c = camera.iter().fold(Vec3::zeros(), |acc, p| acc + p) / n;

    let mut h = Mat3::zeros();
    for (pw, pc) in world.iter().zip(camera.iter()) {
        h += (pc - c_c) * (pw.coords - c_w).transpose();
    }

    let svd = h.svd(true, true);
    let mut u = svd.u.ok_or_else(|| anyhow::anyhow!("svd failed in pose alignment"))?;
    let v_t = svd.v_t.ok_or_else(|| anyhow::anyhow!("svd failed in pose alignment"))?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r = u * v_t;

    let t = c_c - r * c_w;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Iso3::from_parts(Translation3::from(t), rot))
}
