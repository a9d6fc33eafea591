//! Essential matrix decomposition into rotation and translation.

use anyhow::Result;
use nalgebra::Vector3;
use sfm_core::{Mat3, Vec3};

/// Project a 3×3 matrix onto the essential manifold.
///
/// The singular values are replaced by `(σ, σ, 0)` with `σ` the mean of the
/// two largest ones.
pub(crate) fn enforce_essential_constraints(e: &Mat3) -> Result<Mat3> {
    let svd = e.svd(true, true);
    let u = svd.u.ok_or_else(|| anyhow::anyhow!("svd failed"))?;
    let v_t = svd.v_t.ok_or_else(|| anyhow::anyhow!("svd failed"))?;

    let s = svd.singular_values;
    let sigma = 0.5 * (s[0] + s[1]);
    if sigma <= f64::EPSILON {
        anyhow::bail!("essential matrix is numerically zero");
    }

    let s_mat = Mat3::from_diagonal(&Vector3::new(sigma, sigma, 0.0));
    Ok(u * s_mat * v_t)
}

/// Decompose an essential matrix into its four `(R, t)` candidates.
///
/// Every rotation is proper (`det R = +1`) and every translation is unit
/// length. The physically valid candidate is selected by cheirality, see
/// [`recover_pose`](super::recover_pose).
pub fn decompose_essential(e: &Mat3) -> Result<[(Mat3, Vec3); 4]> {
    let e = enforce_essential_constraints(e)?;
    let svd = e.svd(true, true);
    let mut u = svd.u.ok_or_else(|| anyhow::anyhow!("svd failed"))?;
    let mut v_t = svd.v_t.ok_or_else(|| anyhow::anyhow!("svd failed"))?;

    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    if v_t.determinant() < 0.0 {
        v_t.row_mut(2).neg_mut();
    }

    let w = Mat3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t = u.column(2).normalize();

    Ok([(r1, t), (r1, -t), (r2, t), (r2, -t)])
}
